use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use diesel::PgConnection;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

use anyhow::Result;
use clap::Parser;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel::Connection;
use payment_service::api;
use payment_service::config::Config;
use payment_service::gateway::{ChapaClient, PaymentGateway};
use payment_service::ledger::PgPaymentLedger;
use payment_service::notifier::KafkaNotifier;
use payment_service::service::PaymentService;
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let config = Config::parse();

    // Run migrations first
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&config.database_url)?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let manager = diesel_async::pooled_connection::AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
    let pool = Pool::builder().build(manager).await?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    let gateway = ChapaClient::new(config.chapa())?;
    if gateway.ensure_configured().is_err() {
        warn!("CHAPA_SECRET_KEY not configured; gateway-bound requests will fail");
    }

    let service = PaymentService::new(
        Arc::new(PgPaymentLedger::new(pool)),
        Arc::new(gateway),
        Arc::new(KafkaNotifier::new(producer, config.notification_topic.clone())),
        config.service_settings(),
    );

    let app = api::create_router(api::AppState {
        service: Arc::new(service),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    info!("Payment service web server started on port {}", config.port);
    info!("Payment service ready to accept HTTP requests at http://0.0.0.0:{}/payments", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
