use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::PaymentConfirmationRequested;
use tracing::{error, info};

/// Enqueue-only hand-off to the mail worker. Implementations must return
/// without waiting for delivery; failures are logged, never returned.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: PaymentConfirmationRequested);
}

pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

impl Notifier for KafkaNotifier {
    fn notify(&self, event: PaymentConfirmationRequested) {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize confirmation for payment {}: {}", event.payment_id, e);
                return;
            }
        };
        let key = event.message_key();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key);

        // send_result only places the record on the producer's local queue
        match self.producer.send_result(record) {
            Ok(delivery) => {
                let payment_id = event.payment_id;
                let reference = event.booking_reference;
                tokio::spawn(async move {
                    match delivery.await {
                        Ok(Ok((partition, offset))) => info!(
                            "Queued confirmation email for {} ({}) at {}:{}",
                            reference, payment_id, partition, offset
                        ),
                        Ok(Err((e, _))) => error!(
                            "Failed to deliver confirmation for {} ({}): {}",
                            reference, payment_id, e
                        ),
                        Err(_) => error!(
                            "Confirmation delivery for {} ({}) was cancelled",
                            reference, payment_id
                        ),
                    }
                });
            }
            Err((e, _)) => {
                error!("Failed to queue confirmation for {}: {}", event.booking_reference, e);
            }
        }
    }
}
