use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::slots)]
pub struct DbSlot {
    pub id: Uuid,
    pub slot_number: String,
    pub vehicle_type: String,
    pub price_per_hour: BigDecimal,
    pub status: String,
    pub version: i64,
}

#[derive(Debug, Clone, Queryable)]
pub struct DbVehicle {
    pub id: Uuid,
    pub license_plate: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub owner_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct DbBooking {
    pub id: Uuid,
    pub code: String,
    pub slot_id: Uuid,
    pub user_id: Uuid,
    pub vehicle_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub payment_method: String,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct DbPayment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: String,
    pub status: String,
    pub provider_order_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::gate_logs)]
pub struct DbGateLog {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub booking_id: Uuid,
    pub action: String,
    pub vehicle_plate: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbSlot> for Slot {
    type Error = anyhow::Error;

    fn try_from(row: DbSlot) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            number: row.slot_number,
            vehicle_type: row.vehicle_type,
            price_per_hour: row.price_per_hour,
            status: row.status.parse()?,
            version: row.version,
        })
    }
}

impl From<&Slot> for DbSlot {
    fn from(slot: &Slot) -> Self {
        Self {
            id: slot.id,
            slot_number: slot.number.clone(),
            vehicle_type: slot.vehicle_type.clone(),
            price_per_hour: slot.price_per_hour.clone(),
            status: slot.status.as_str().to_string(),
            version: slot.version,
        }
    }
}

impl From<DbVehicle> for Vehicle {
    fn from(row: DbVehicle) -> Self {
        Self {
            id: row.id,
            license_plate: row.license_plate,
            make: row.make,
            model: row.model,
            owner_id: row.owner_id,
        }
    }
}

impl TryFrom<DbBooking> for Booking {
    type Error = anyhow::Error;

    fn try_from(row: DbBooking) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            code: row.code,
            slot_id: row.slot_id,
            user_id: row.user_id,
            vehicle_id: row.vehicle_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status.parse()?,
            payment_method: row.payment_method.parse()?,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            cancel_reason: row.cancel_reason.map(|r| r.parse()).transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Booking> for DbBooking {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id,
            code: booking.code.clone(),
            slot_id: booking.slot_id,
            user_id: booking.user_id,
            vehicle_id: booking.vehicle_id,
            start_time: booking.start_time,
            end_time: booking.end_time,
            status: booking.status.as_str().to_string(),
            payment_method: booking.payment_method.as_str().to_string(),
            check_in_time: booking.check_in_time,
            check_out_time: booking.check_out_time,
            cancel_reason: booking.cancel_reason.map(|r| r.as_str().to_string()),
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

impl TryFrom<DbPayment> for Payment {
    type Error = anyhow::Error;

    fn try_from(row: DbPayment) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            booking_id: row.booking_id,
            amount: row.amount,
            currency: row.currency,
            method: row.method.parse()?,
            status: row.status.parse()?,
            provider_order_id: row.provider_order_id,
            provider_transaction_id: row.provider_transaction_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Payment> for DbPayment {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            booking_id: payment.booking_id,
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            method: payment.method.as_str().to_string(),
            status: payment.status.as_str().to_string(),
            provider_order_id: payment.provider_order_id.clone(),
            provider_transaction_id: payment.provider_transaction_id.clone(),
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

impl TryFrom<DbGateLog> for GateLogEntry {
    type Error = anyhow::Error;

    fn try_from(row: DbGateLog) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            staff_id: row.staff_id,
            booking_id: row.booking_id,
            action: row.action.parse()?,
            vehicle_plate: row.vehicle_plate,
            timestamp: row.timestamp,
        })
    }
}

impl From<&GateLogEntry> for DbGateLog {
    fn from(entry: &GateLogEntry) -> Self {
        Self {
            id: entry.id,
            staff_id: entry.staff_id,
            booking_id: entry.booking_id,
            action: entry.action.as_str().to_string(),
            vehicle_plate: entry.vehicle_plate.clone(),
            timestamp: entry.timestamp,
        }
    }
}

impl From<OutboxEvent> for DbOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: event.processed,
            created_at: event.created_at,
        }
    }
}

impl From<DbOutboxEvent> for OutboxEvent {
    fn from(row: DbOutboxEvent) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            event_data: row.event_data,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}
