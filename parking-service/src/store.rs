use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::*;
use uuid::Uuid;

/// Compare-and-set on a slot's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTransition {
    pub slot_id: Uuid,
    pub from: SlotStatus,
    pub to: SlotStatus,
}

#[derive(Debug, Clone)]
pub enum BookingWrite {
    Insert(Booking),
    /// Replace the booking with `next`, only if it is still in `from`.
    Advance { from: BookingStatus, next: Booking },
}

#[derive(Debug, Clone)]
pub enum PaymentWrite {
    Insert(Payment),
    /// Replace the payment with `next`, only if it is still in `from`.
    Update { from: PaymentStatus, next: Payment },
}

/// A set of writes that land together or not at all.
///
/// Every conditional part (slot transition, booking advance, payment update)
/// is checked before anything is written; a failed check aborts the whole unit
/// with `ParkingError::Conflict`.
#[derive(Debug, Clone, Default)]
pub struct Mutation {
    pub slot: Option<SlotTransition>,
    pub booking: Option<BookingWrite>,
    pub payment: Option<PaymentWrite>,
    pub gate_log: Option<GateLogEntry>,
    pub events: Vec<OutboxEvent>,
}

impl Mutation {
    pub fn transition(slot_id: Uuid, from: SlotStatus, to: SlotStatus) -> Self {
        Self {
            slot: Some(SlotTransition { slot_id, from, to }),
            ..Self::default()
        }
    }

    pub fn with_booking(mut self, write: BookingWrite) -> Self {
        self.booking = Some(write);
        self
    }

    pub fn with_payment(mut self, write: PaymentWrite) -> Self {
        self.payment = Some(write);
        self
    }

    pub fn with_gate_log(mut self, entry: GateLogEntry) -> Self {
        self.gate_log = Some(entry);
        self
    }

    pub fn with_event(mut self, event: ParkingEvent, at: DateTime<Utc>) -> ParkingResult<Self> {
        self.events.push(event.into_outbox(at)?);
        Ok(self)
    }
}

/// Durable state behind the parking core.
///
/// Reads may be served from any consistent snapshot. `apply` is the only write
/// path and must be atomic and linearizable per slot.
#[async_trait]
pub trait ParkingStore: Send + Sync {
    /// All slots ordered by slot number, read as one consistent snapshot.
    async fn list_slots(&self) -> ParkingResult<Vec<Slot>>;
    async fn get_slot(&self, slot_id: Uuid) -> ParkingResult<Option<Slot>>;
    async fn insert_slot(&self, slot: Slot) -> ParkingResult<Slot>;

    async fn get_vehicle(&self, vehicle_id: Uuid) -> ParkingResult<Option<Vehicle>>;

    async fn get_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Booking>>;
    async fn get_booking_by_code(&self, code: &str) -> ParkingResult<Option<Booking>>;
    async fn bookings_for_slot(
        &self,
        slot_id: Uuid,
        statuses: &[BookingStatus],
    ) -> ParkingResult<Vec<Booking>>;
    /// Newest start first.
    async fn bookings_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Booking>>;
    async fn pending_bookings_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> ParkingResult<Vec<Booking>>;
    async fn count_bookings(&self) -> ParkingResult<i64>;
    async fn next_booking_number(&self) -> ParkingResult<i64>;

    async fn get_payment_for_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Payment>>;
    async fn get_payment_by_order(&self, order_id: &str) -> ParkingResult<Option<Payment>>;
    async fn payments_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Payment>>;

    /// Newest first.
    async fn list_gate_logs(&self) -> ParkingResult<Vec<GateLogEntry>>;

    async fn unprocessed_events(&self, limit: i64) -> ParkingResult<Vec<OutboxEvent>>;
    async fn mark_event_processed(&self, event_id: Uuid) -> ParkingResult<()>;

    /// Applies the unit of work and returns the slot as it stands afterwards,
    /// when the unit carried a slot transition.
    async fn apply(&self, mutation: Mutation) -> ParkingResult<Option<Slot>>;
}
