use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Booking, GateLogEntry, Payment, Slot};

/// Frames pushed to real-time subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeMessage {
    Snapshot { slots: Vec<Slot> },
    SlotUpdate { slot: Slot },
}

/// Booking lifecycle facts recorded in the outbox alongside the change itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ParkingEvent {
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        booking: Booking,
        payment: Payment,
    },
    BookingCancelled {
        booking: Booking,
    },
    VehicleCheckedIn {
        booking: Booking,
        entry: GateLogEntry,
    },
    VehicleCheckedOut {
        booking: Booking,
        entry: GateLogEntry,
        payment: Option<Payment>,
        slot_number: String,
        price_per_hour: BigDecimal,
    },
}

impl ParkingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BookingCreated { .. } => "booking_created",
            Self::BookingConfirmed { .. } => "booking_confirmed",
            Self::BookingCancelled { .. } => "booking_cancelled",
            Self::VehicleCheckedIn { .. } => "vehicle_checked_in",
            Self::VehicleCheckedOut { .. } => "vehicle_checked_out",
        }
    }

    pub fn booking(&self) -> &Booking {
        match self {
            Self::BookingCreated { booking }
            | Self::BookingConfirmed { booking, .. }
            | Self::BookingCancelled { booking }
            | Self::VehicleCheckedIn { booking, .. }
            | Self::VehicleCheckedOut { booking, .. } => booking,
        }
    }

    /// Wraps the event for the outbox, stamped with the time of the write it
    /// belongs to.
    pub fn into_outbox(self, at: DateTime<Utc>) -> anyhow::Result<OutboxEvent> {
        Ok(OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: self.booking().id,
            event_type: self.event_type().to_string(),
            event_data: serde_json::to_value(&self)?,
            processed: false,
            created_at: at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}
