use bigdecimal::BigDecimal;
use num_traits::Zero;
use shared::*;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::broadcaster::RealtimeBroadcaster;
use crate::store::{Mutation, ParkingStore};

/// Authoritative slot state and the only place a slot's status changes.
///
/// Every committed transition is mirrored to the broadcaster after the store
/// has accepted it, so subscribers never see a state that was rolled back.
pub struct SlotRegistry {
    store: Arc<dyn ParkingStore>,
    broadcaster: RealtimeBroadcaster,
}

impl SlotRegistry {
    pub fn new(store: Arc<dyn ParkingStore>, broadcaster: RealtimeBroadcaster) -> Self {
        Self { store, broadcaster }
    }

    pub fn broadcaster(&self) -> &RealtimeBroadcaster {
        &self.broadcaster
    }

    pub async fn snapshot(&self) -> ParkingResult<Vec<Slot>> {
        self.store.list_slots().await
    }

    pub async fn get(&self, slot_id: Uuid) -> ParkingResult<Slot> {
        self.store
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| ParkingError::NotFound(format!("slot {}", slot_id)))
    }

    /// Compare-and-set on a single slot's status.
    pub async fn transition(
        &self,
        slot_id: Uuid,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> ParkingResult<Slot> {
        let slot = self.commit(Mutation::transition(slot_id, expected, next)).await?;
        slot.ok_or_else(|| ParkingError::NotFound(format!("slot {}", slot_id)))
    }

    /// Applies a unit of work; a slot transition in it is checked against the
    /// legal edges first and published once the store accepts it.
    pub async fn commit(&self, mutation: Mutation) -> ParkingResult<Option<Slot>> {
        if let Some(t) = &mutation.slot {
            if !t.from.can_transition_to(t.to) {
                return Err(ParkingError::Validation(format!(
                    "slot cannot move from {} to {}",
                    t.from, t.to
                )));
            }
        }

        let updated = self.store.apply(mutation).await?;
        if let Some(slot) = &updated {
            self.broadcaster.publish(slot.clone());
        }
        Ok(updated)
    }

    pub async fn register(&self, request: NewSlot) -> ParkingResult<Slot> {
        let number = request.number.trim().to_string();
        if number.is_empty() {
            return Err(ParkingError::Validation("slot number is required".to_string()));
        }
        if request.price_per_hour <= BigDecimal::zero() {
            return Err(ParkingError::Validation("price per hour must be positive".to_string()));
        }

        let slot = self
            .store
            .insert_slot(Slot {
                id: Uuid::new_v4(),
                number,
                vehicle_type: request.vehicle_type,
                price_per_hour: request.price_per_hour,
                status: SlotStatus::Available,
                version: 0,
            })
            .await?;

        info!(slot_id = %slot.id, number = %slot.number, "slot registered");
        self.broadcaster.publish(slot.clone());
        Ok(slot)
    }

    pub async fn stats(&self) -> ParkingResult<SlotStats> {
        let slots = self.store.list_slots().await?;
        let total_bookings = self.store.count_bookings().await?;
        Ok(SlotStats::from_slots(&slots, total_bookings))
    }
}
