diesel::table! {
    slots (id) {
        id -> Uuid,
        slot_number -> Varchar,
        vehicle_type -> Varchar,
        price_per_hour -> Numeric,
        status -> Varchar,
        version -> Int8,
    }
}

diesel::table! {
    vehicles (id) {
        id -> Uuid,
        license_plate -> Varchar,
        make -> Nullable<Varchar>,
        model -> Nullable<Varchar>,
        owner_id -> Uuid,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        code -> Varchar,
        slot_id -> Uuid,
        user_id -> Uuid,
        vehicle_id -> Uuid,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
        status -> Varchar,
        payment_method -> Varchar,
        check_in_time -> Nullable<Timestamptz>,
        check_out_time -> Nullable<Timestamptz>,
        cancel_reason -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        booking_id -> Uuid,
        amount -> Numeric,
        currency -> Varchar,
        method -> Varchar,
        status -> Varchar,
        provider_order_id -> Nullable<Varchar>,
        provider_transaction_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    gate_logs (id) {
        id -> Uuid,
        staff_id -> Uuid,
        booking_id -> Uuid,
        action -> Varchar,
        vehicle_plate -> Varchar,
        timestamp -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(bookings -> slots (slot_id));
diesel::joinable!(payments -> bookings (booking_id));
diesel::joinable!(gate_logs -> bookings (booking_id));

diesel::allow_tables_to_appear_in_same_query!(
    slots,
    vehicles,
    bookings,
    payments,
    gate_logs,
    outbox_events,
);
