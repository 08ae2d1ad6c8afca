use bigdecimal::BigDecimal;
use chrono::Duration;
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::bookings::BookingOrchestrator;
use crate::clock::Clock;
use crate::registry::SlotRegistry;
use crate::store::{Mutation, ParkingStore, PaymentWrite};

const GATE_ROLES: [Role; 2] = [Role::Staff, Role::Admin];

/// Returned to the gate terminal after a successful scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatePass {
    pub booking: Booking,
    pub entry: GateLogEntry,
    pub slot_number: String,
    /// Amount to collect at the barrier; only cash stays have one.
    pub fee: Option<BigDecimal>,
}

pub struct GateController {
    store: Arc<dyn ParkingStore>,
    registry: Arc<SlotRegistry>,
    bookings: Arc<BookingOrchestrator>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    currency: String,
}

impl GateController {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        registry: Arc<SlotRegistry>,
        bookings: Arc<BookingOrchestrator>,
        clock: Arc<dyn Clock>,
        grace: Duration,
        currency: String,
    ) -> Self {
        Self {
            store,
            registry,
            bookings,
            clock,
            grace,
            currency,
        }
    }

    pub async fn check_in(&self, caller: &Caller, code: &str) -> ParkingResult<GatePass> {
        caller.require(&GATE_ROLES)?;
        let booking = self.bookings.get_by_code(code.trim()).await?;
        if booking.status != BookingStatus::Upcoming {
            return Err(ParkingError::Conflict(format!(
                "booking {} is {}, cannot check in",
                booking.code, booking.status
            )));
        }

        let now = self.clock.now();
        if now < booking.start_time - self.grace {
            return Err(ParkingError::Validation(format!(
                "booking {} starts at {}, too early to check in",
                booking.code, booking.start_time
            )));
        }

        let slot = self.registry.get(booking.slot_id).await?;
        let entry = GateLogEntry::new(
            caller.user_id,
            booking.id,
            GateAction::CheckIn,
            self.plate_for(&booking).await?,
            now,
        );
        let next = booking.advanced(BookingStatus::Active, now);
        let effects = Mutation::default()
            .with_gate_log(entry.clone())
            .with_event(
                ParkingEvent::VehicleCheckedIn {
                    booking: next.clone(),
                    entry: entry.clone(),
                },
                now,
            )?;

        let booking = self.bookings.advance(&booking, next, effects).await?;
        info!(
            booking = %booking.code,
            slot = %slot.number,
            plate = %entry.vehicle_plate,
            "vehicle checked in"
        );

        Ok(GatePass {
            booking,
            entry,
            slot_number: slot.number,
            fee: None,
        })
    }

    pub async fn check_out(&self, caller: &Caller, code: &str) -> ParkingResult<GatePass> {
        caller.require(&GATE_ROLES)?;
        let booking = self.bookings.get_by_code(code.trim()).await?;
        if booking.status != BookingStatus::Active {
            return Err(ParkingError::Conflict(format!(
                "booking {} is {}, cannot check out",
                booking.code, booking.status
            )));
        }

        let now = self.clock.now();
        let slot = self.registry.get(booking.slot_id).await?;
        let entry = GateLogEntry::new(
            caller.user_id,
            booking.id,
            GateAction::CheckOut,
            self.plate_for(&booking).await?,
            now,
        );
        let next = booking.advanced(BookingStatus::Completed, now);

        let settlement = match booking.payment_method {
            PaymentMethod::Cash => {
                let checked_in = booking.check_in_time.unwrap_or(booking.start_time);
                let fee = hourly_charge(now - checked_in, &slot.price_per_hour);
                Some(Payment {
                    id: Uuid::new_v4(),
                    booking_id: booking.id,
                    amount: fee,
                    currency: self.currency.clone(),
                    method: PaymentMethod::Cash,
                    status: PaymentStatus::Completed,
                    provider_order_id: None,
                    provider_transaction_id: None,
                    created_at: now,
                    updated_at: now,
                })
            }
            PaymentMethod::Online => None,
        };

        let mut effects = Mutation::default().with_gate_log(entry.clone());
        if let Some(payment) = &settlement {
            effects = effects.with_payment(PaymentWrite::Insert(payment.clone()));
        }
        let effects = effects.with_event(
            ParkingEvent::VehicleCheckedOut {
                booking: next.clone(),
                entry: entry.clone(),
                payment: settlement.clone(),
                slot_number: slot.number.clone(),
                price_per_hour: slot.price_per_hour.clone(),
            },
            now,
        )?;

        let booking = self.bookings.advance(&booking, next, effects).await?;
        let fee = settlement.map(|p| p.amount);
        info!(
            booking = %booking.code,
            slot = %slot.number,
            fee = ?fee.as_ref().map(|f| f.to_string()),
            "vehicle checked out"
        );

        Ok(GatePass {
            booking,
            entry,
            slot_number: slot.number,
            fee,
        })
    }

    pub async fn logs(&self, caller: &Caller) -> ParkingResult<Vec<GateLogEntry>> {
        caller.require(&GATE_ROLES)?;
        self.store.list_gate_logs().await
    }

    async fn plate_for(&self, booking: &Booking) -> ParkingResult<String> {
        Ok(self
            .store
            .get_vehicle(booking.vehicle_id)
            .await?
            .map(|v| v.license_plate)
            .unwrap_or_default())
    }
}
