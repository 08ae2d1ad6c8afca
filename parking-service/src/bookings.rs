use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::registry::SlotRegistry;
use crate::store::{BookingWrite, Mutation, ParkingStore, SlotTransition};

/// How far a requested start may trail the server clock.
const START_SKEW: i64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub slot_id: Uuid,
    pub vehicle_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub payment_method: PaymentMethod,
}

/// Everything a receipt renderer needs for a finished stay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub booking: Booking,
    pub payment: Option<Payment>,
    pub slot: Slot,
    pub vehicle_plate: String,
}

/// Owns the booking lifecycle. Every booking status change goes through
/// [`BookingOrchestrator::advance`], which pairs it with the slot edge it
/// implies and commits both through the registry.
pub struct BookingOrchestrator {
    store: Arc<dyn ParkingStore>,
    registry: Arc<SlotRegistry>,
    clock: Arc<dyn Clock>,
}

impl BookingOrchestrator {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        registry: Arc<SlotRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, registry, clock }
    }

    pub async fn create_booking(
        &self,
        caller: &Caller,
        request: BookingRequest,
    ) -> ParkingResult<Booking> {
        let now = self.clock.now();
        if request.start_time >= request.end_time {
            return Err(ParkingError::Validation("start time must be before end time".to_string()));
        }
        if request.start_time < now - Duration::minutes(START_SKEW) {
            return Err(ParkingError::Validation("booking window is in the past".to_string()));
        }

        let vehicle = self
            .store
            .get_vehicle(request.vehicle_id)
            .await?
            .ok_or_else(|| {
                ParkingError::Validation(format!("vehicle {} not found", request.vehicle_id))
            })?;
        if vehicle.owner_id != caller.user_id {
            return Err(ParkingError::Validation("vehicle belongs to another user".to_string()));
        }

        let slot = self.registry.get(request.slot_id).await?;
        if slot.status == SlotStatus::Maintenance {
            return Err(ParkingError::Conflict(format!(
                "slot {} is under maintenance",
                slot.number
            )));
        }

        let holding = self.store.bookings_for_slot(slot.id, &BookingStatus::HOLDING).await?;
        if let Some(clash) = holding
            .iter()
            .find(|b| b.overlaps(request.start_time, request.end_time))
        {
            debug!(
                slot = %slot.number,
                clash = %clash.code,
                "requested window overlaps an existing booking"
            );
            return Err(ParkingError::Conflict(format!(
                "slot {} is already booked for that time",
                slot.number
            )));
        }

        let number = self.store.next_booking_number().await?;
        let status = match request.payment_method {
            PaymentMethod::Online => BookingStatus::Pending,
            PaymentMethod::Cash => BookingStatus::Upcoming,
        };
        let booking = Booking {
            id: Uuid::new_v4(),
            code: booking_code(number),
            slot_id: slot.id,
            user_id: caller.user_id,
            vehicle_id: vehicle.id,
            start_time: request.start_time,
            end_time: request.end_time,
            status,
            payment_method: request.payment_method,
            check_in_time: None,
            check_out_time: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };

        let mutation = Mutation::transition(slot.id, SlotStatus::Available, SlotStatus::Reserved)
            .with_booking(BookingWrite::Insert(booking.clone()))
            .with_event(ParkingEvent::BookingCreated { booking: booking.clone() }, now)?;

        match self.registry.commit(mutation).await {
            Ok(_) => {}
            Err(err) if err.is_conflict() => {
                debug!(slot = %slot.number, error = %err, "lost the race for slot");
                return Err(ParkingError::Conflict(format!(
                    "slot {} is no longer available",
                    slot.number
                )));
            }
            Err(err) => return Err(err),
        }

        info!(
            booking = %booking.code,
            slot = %slot.number,
            status = %booking.status,
            "booking created"
        );
        Ok(booking)
    }

    pub async fn cancel_booking(
        &self,
        caller: &Caller,
        booking_id: Uuid,
    ) -> ParkingResult<Booking> {
        let booking = self.get(booking_id).await?;
        caller.require_owner_or_admin(booking.user_id)?;
        if !booking.status.is_cancellable() {
            return Err(ParkingError::Conflict(format!(
                "booking {} is {} and can no longer be cancelled",
                booking.code, booking.status
            )));
        }
        self.release(&booking, CancelReason::Requested).await
    }

    /// Cancels a stale pending booking on behalf of the reaper.
    pub async fn expire(&self, booking: &Booking) -> ParkingResult<Booking> {
        self.release(booking, CancelReason::Expired).await
    }

    async fn release(&self, booking: &Booking, reason: CancelReason) -> ParkingResult<Booking> {
        let now = self.clock.now();
        let mut next = booking.advanced(BookingStatus::Cancelled, now);
        next.cancel_reason = Some(reason);
        let effects = Mutation::default()
            .with_event(ParkingEvent::BookingCancelled { booking: next.clone() }, now)?;

        let cancelled = self.advance(booking, next, effects).await?;
        info!(booking = %cancelled.code, reason = %reason, "booking cancelled");
        Ok(cancelled)
    }

    /// Moves `current` to `next` together with `effects`, adding the slot
    /// edge the booking edge implies. Fails with a conflict if the booking
    /// or its slot moved since `current` was read.
    pub async fn advance(
        &self,
        current: &Booking,
        next: Booking,
        effects: Mutation,
    ) -> ParkingResult<Booking> {
        if !current.status.can_advance_to(next.status) {
            return Err(ParkingError::Conflict(format!(
                "booking {} cannot move from {} to {}",
                current.code, current.status, next.status
            )));
        }

        let mut mutation = effects.with_booking(BookingWrite::Advance {
            from: current.status,
            next: next.clone(),
        });
        if let Some((from, to)) = current.status.slot_effect(next.status) {
            mutation.slot = Some(SlotTransition {
                slot_id: current.slot_id,
                from,
                to,
            });
        }

        self.registry.commit(mutation).await?;
        Ok(next)
    }

    pub async fn get(&self, booking_id: Uuid) -> ParkingResult<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| ParkingError::NotFound(format!("booking {}", booking_id)))
    }

    pub async fn get_by_code(&self, code: &str) -> ParkingResult<Booking> {
        self.store
            .get_booking_by_code(code)
            .await?
            .ok_or_else(|| ParkingError::NotFound(format!("booking {}", code)))
    }

    pub async fn bookings_for(&self, caller: &Caller) -> ParkingResult<Vec<Booking>> {
        self.store.bookings_for_user(caller.user_id).await
    }

    pub async fn receipt(&self, caller: &Caller, booking_id: Uuid) -> ParkingResult<Receipt> {
        let booking = self.get(booking_id).await?;
        caller.require_owner_or_admin(booking.user_id)?;
        if booking.status != BookingStatus::Completed {
            return Err(ParkingError::Conflict(format!(
                "booking {} is {}, receipts are issued after check-out",
                booking.code, booking.status
            )));
        }

        let payment = self.store.get_payment_for_booking(booking.id).await?;
        let slot = self.registry.get(booking.slot_id).await?;
        let vehicle_plate = self
            .store
            .get_vehicle(booking.vehicle_id)
            .await?
            .map(|v| v.license_plate)
            .unwrap_or_default();

        Ok(Receipt {
            booking,
            payment,
            slot,
            vehicle_plate,
        })
    }

    pub async fn set_maintenance(&self, slot_id: Uuid, enabled: bool) -> ParkingResult<Slot> {
        let (from, to) = if enabled {
            (SlotStatus::Available, SlotStatus::Maintenance)
        } else {
            (SlotStatus::Maintenance, SlotStatus::Available)
        };
        let slot = self.registry.transition(slot_id, from, to).await?;
        info!(slot = %slot.number, enabled, "maintenance toggled");
        Ok(slot)
    }
}
