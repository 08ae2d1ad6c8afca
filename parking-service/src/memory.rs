use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::*;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{BookingWrite, Mutation, ParkingStore, PaymentWrite};

#[derive(Default)]
struct MemoryState {
    slots: HashMap<Uuid, Slot>,
    vehicles: HashMap<Uuid, Vehicle>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    gate_logs: Vec<GateLogEntry>,
    outbox: Vec<OutboxEvent>,
    next_number: i64,
}

/// In-process store. One lock guards the whole state, so every unit of work
/// is trivially linearizable.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_number: FIRST_BOOKING_NUMBER,
                ..MemoryState::default()
            }),
        }
    }

    /// Vehicles belong to the profile subsystem; this is how they get here.
    pub async fn add_vehicle(&self, vehicle: Vehicle) {
        self.state.write().await.vehicles.insert(vehicle.id, vehicle);
    }

    pub async fn outbox(&self) -> Vec<OutboxEvent> {
        self.state.read().await.outbox.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn check(&self, mutation: &Mutation) -> ParkingResult<()> {
        if let Some(t) = &mutation.slot {
            let slot = self
                .slots
                .get(&t.slot_id)
                .ok_or_else(|| ParkingError::NotFound(format!("slot {}", t.slot_id)))?;
            if slot.status != t.from {
                return Err(ParkingError::Conflict(format!(
                    "slot {} is {}, expected {}",
                    slot.number, slot.status, t.from
                )));
            }
        }

        match &mutation.booking {
            Some(BookingWrite::Insert(booking)) => {
                if self.bookings.contains_key(&booking.id)
                    || self.bookings.values().any(|b| b.code == booking.code)
                {
                    return Err(ParkingError::Conflict(format!(
                        "booking {} already exists",
                        booking.code
                    )));
                }
            }
            Some(BookingWrite::Advance { from, next }) => {
                let current = self
                    .bookings
                    .get(&next.id)
                    .ok_or_else(|| ParkingError::NotFound(format!("booking {}", next.id)))?;
                if current.status != *from {
                    return Err(ParkingError::Conflict(format!(
                        "booking {} is {}, expected {}",
                        current.code, current.status, from
                    )));
                }
            }
            None => {}
        }

        match &mutation.payment {
            Some(PaymentWrite::Insert(payment)) => {
                if self.payments.values().any(|p| p.booking_id == payment.booking_id) {
                    return Err(ParkingError::Conflict(format!(
                        "booking {} already has a payment",
                        payment.booking_id
                    )));
                }
            }
            Some(PaymentWrite::Update { from, next }) => {
                let current = self
                    .payments
                    .get(&next.id)
                    .ok_or_else(|| ParkingError::NotFound(format!("payment {}", next.id)))?;
                if current.status != *from {
                    return Err(ParkingError::Conflict(format!(
                        "payment {} is {}, expected {}",
                        current.id, current.status, from
                    )));
                }
            }
            None => {}
        }

        Ok(())
    }
}

#[async_trait]
impl ParkingStore for MemoryStore {
    async fn list_slots(&self) -> ParkingResult<Vec<Slot>> {
        let state = self.state.read().await;
        let mut slots: Vec<Slot> = state.slots.values().cloned().collect();
        slots.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(slots)
    }

    async fn get_slot(&self, slot_id: Uuid) -> ParkingResult<Option<Slot>> {
        Ok(self.state.read().await.slots.get(&slot_id).cloned())
    }

    async fn insert_slot(&self, slot: Slot) -> ParkingResult<Slot> {
        let mut state = self.state.write().await;
        if state.slots.values().any(|s| s.number == slot.number) {
            return Err(ParkingError::Conflict(format!("slot {} already exists", slot.number)));
        }
        state.slots.insert(slot.id, slot.clone());
        Ok(slot)
    }

    async fn get_vehicle(&self, vehicle_id: Uuid) -> ParkingResult<Option<Vehicle>> {
        Ok(self.state.read().await.vehicles.get(&vehicle_id).cloned())
    }

    async fn get_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Booking>> {
        Ok(self.state.read().await.bookings.get(&booking_id).cloned())
    }

    async fn get_booking_by_code(&self, code: &str) -> ParkingResult<Option<Booking>> {
        let state = self.state.read().await;
        Ok(state.bookings.values().find(|b| b.code == code).cloned())
    }

    async fn bookings_for_slot(
        &self,
        slot_id: Uuid,
        statuses: &[BookingStatus],
    ) -> ParkingResult<Vec<Booking>> {
        let state = self.state.read().await;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.slot_id == slot_id && statuses.contains(&b.status))
            .cloned()
            .collect())
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Booking>> {
        let state = self.state.read().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(bookings)
    }

    async fn pending_bookings_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> ParkingResult<Vec<Booking>> {
        let state = self.state.read().await;
        let mut stale: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.created_at);
        Ok(stale)
    }

    async fn count_bookings(&self) -> ParkingResult<i64> {
        Ok(self.state.read().await.bookings.len() as i64)
    }

    async fn next_booking_number(&self) -> ParkingResult<i64> {
        let mut state = self.state.write().await;
        let number = state.next_number;
        state.next_number += 1;
        Ok(number)
    }

    async fn get_payment_for_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state.payments.values().find(|p| p.booking_id == booking_id).cloned())
    }

    async fn get_payment_by_order(&self, order_id: &str) -> ParkingResult<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.provider_order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn payments_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| {
                state
                    .bookings
                    .get(&p.booking_id)
                    .map_or(false, |b| b.user_id == user_id)
            })
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn list_gate_logs(&self) -> ParkingResult<Vec<GateLogEntry>> {
        let state = self.state.read().await;
        let mut logs = state.gate_logs.clone();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(logs)
    }

    async fn unprocessed_events(&self, limit: i64) -> ParkingResult<Vec<OutboxEvent>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| !e.processed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> ParkingResult<()> {
        let mut state = self.state.write().await;
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == event_id) {
            event.processed = true;
        }
        Ok(())
    }

    async fn apply(&self, mutation: Mutation) -> ParkingResult<Option<Slot>> {
        let mut state = self.state.write().await;
        state.check(&mutation)?;

        let mut updated = None;
        if let Some(t) = mutation.slot {
            if let Some(slot) = state.slots.get_mut(&t.slot_id) {
                slot.status = t.to;
                slot.version += 1;
                updated = Some(slot.clone());
            }
        }

        match mutation.booking {
            Some(BookingWrite::Insert(booking))
            | Some(BookingWrite::Advance { next: booking, .. }) => {
                state.bookings.insert(booking.id, booking);
            }
            None => {}
        }

        match mutation.payment {
            Some(PaymentWrite::Insert(payment))
            | Some(PaymentWrite::Update { next: payment, .. }) => {
                state.payments.insert(payment.id, payment);
            }
            None => {}
        }

        if let Some(entry) = mutation.gate_log {
            state.gate_logs.push(entry);
        }
        state.outbox.extend(mutation.events);

        Ok(updated)
    }
}
