diesel::table! {
    payments (id) {
        id -> Uuid,
        booking_reference -> Varchar,
        amount -> Numeric,
        currency -> Varchar,
        status -> Varchar,
        transaction_id -> Nullable<Varchar>,
        checkout_url -> Nullable<Varchar>,
        email -> Varchar,
        metadata -> Nullable<Jsonb>,
        user_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
