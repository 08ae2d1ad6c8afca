use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bookings::BookingOrchestrator;
use crate::clock::Clock;
use crate::gateway::{GatewayOrder, PaymentGateway};
use crate::registry::SlotRegistry;
use crate::store::{Mutation, ParkingStore, PaymentWrite};

/// What the client needs to open the gateway's checkout.
#[derive(Debug, Clone, Serialize)]
pub struct OrderTicket {
    pub key_id: String,
    pub order: GatewayOrder,
    pub payment: Payment,
}

/// The checkout widget's success callback, relayed by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
    pub booking_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentConfirmation {
    pub booking: Booking,
    pub payment: Payment,
}

pub struct PaymentCoordinator {
    store: Arc<dyn ParkingStore>,
    registry: Arc<SlotRegistry>,
    bookings: Arc<BookingOrchestrator>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    currency: String,
}

impl PaymentCoordinator {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        registry: Arc<SlotRegistry>,
        bookings: Arc<BookingOrchestrator>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        currency: String,
    ) -> Self {
        Self {
            store,
            registry,
            bookings,
            gateway,
            clock,
            currency,
        }
    }

    /// Opens a gateway order for a pending online booking, or hands back the
    /// order still open for it. Touches neither the slot nor the booking.
    pub async fn create_order(
        &self,
        caller: &Caller,
        booking_id: Uuid,
    ) -> ParkingResult<OrderTicket> {
        let booking = self.bookings.get(booking_id).await?;
        caller.require_owner_or_admin(booking.user_id)?;
        if booking.payment_method != PaymentMethod::Online {
            return Err(ParkingError::Validation(format!(
                "booking {} is paid in cash at the gate",
                booking.code
            )));
        }
        if booking.is_expired() {
            return Err(ParkingError::ExpiredReservation(format!(
                "booking {} expired before payment",
                booking.code
            )));
        }
        if booking.status != BookingStatus::Pending {
            return Err(ParkingError::Conflict(format!(
                "booking {} is {}, not awaiting payment",
                booking.code, booking.status
            )));
        }

        let existing = self.store.get_payment_for_booking(booking.id).await?;
        if let Some(payment) = &existing {
            if matches!(payment.status, PaymentStatus::Completed | PaymentStatus::Refunded) {
                return Err(ParkingError::Conflict(format!(
                    "booking {} already has a {} payment",
                    booking.code, payment.status
                )));
            }
            // An open order may still be captured; only a failed one is replaced.
            if let (PaymentStatus::Pending, Some(order_id)) =
                (payment.status, &payment.provider_order_id)
            {
                return Ok(OrderTicket {
                    key_id: self.gateway.key_id().to_string(),
                    order: GatewayOrder {
                        id: order_id.clone(),
                        amount: minor_units(&payment.amount)?,
                        currency: payment.currency.clone(),
                        receipt: booking.code.clone(),
                    },
                    payment: payment.clone(),
                });
            }
        }

        let amount = self.amount_due(&booking).await?;
        let order = self
            .gateway
            .create_order(minor_units(&amount)?, &self.currency, &booking.code)
            .await?;

        let now = self.clock.now();
        let write = match existing {
            Some(previous) => {
                let mut next = previous.clone();
                next.amount = amount;
                next.currency = self.currency.clone();
                next.status = PaymentStatus::Pending;
                next.provider_order_id = Some(order.id.clone());
                next.provider_transaction_id = None;
                next.updated_at = now;
                PaymentWrite::Update {
                    from: previous.status,
                    next,
                }
            }
            None => PaymentWrite::Insert(Payment {
                id: Uuid::new_v4(),
                booking_id: booking.id,
                amount,
                currency: self.currency.clone(),
                method: PaymentMethod::Online,
                status: PaymentStatus::Pending,
                provider_order_id: Some(order.id.clone()),
                provider_transaction_id: None,
                created_at: now,
                updated_at: now,
            }),
        };
        let payment = match &write {
            PaymentWrite::Insert(p) | PaymentWrite::Update { next: p, .. } => p.clone(),
        };

        self.registry.commit(Mutation::default().with_payment(write)).await?;
        info!(
            booking = %booking.code,
            order_id = %order.id,
            amount = %payment.amount,
            "payment order opened"
        );

        Ok(OrderTicket {
            key_id: self.gateway.key_id().to_string(),
            order,
            payment,
        })
    }

    /// Settles a checkout callback. A replay of an already settled callback
    /// returns the earlier result and changes nothing.
    pub async fn verify_payment(
        &self,
        caller: &Caller,
        callback: PaymentCallback,
    ) -> ParkingResult<PaymentConfirmation> {
        let payment = self
            .store
            .get_payment_by_order(&callback.order_id)
            .await?
            .ok_or_else(|| ParkingError::NotFound(format!("payment order {}", callback.order_id)))?;
        let booking = self.bookings.get(payment.booking_id).await?;
        caller.require_owner_or_admin(booking.user_id)?;

        let signed = self
            .gateway
            .verify_signature(&callback.order_id, &callback.payment_id, &callback.signature);

        match payment.status {
            PaymentStatus::Completed => {
                if signed
                    && payment.provider_transaction_id.as_deref()
                        == Some(callback.payment_id.as_str())
                {
                    return Ok(PaymentConfirmation { booking, payment });
                }
                return Err(ParkingError::Payment("payment already settled".to_string()));
            }
            PaymentStatus::Refunded => {
                return Err(ParkingError::ExpiredReservation(format!(
                    "booking {} expired and its payment was refunded",
                    booking.code
                )));
            }
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }

        let amount_matches = payment.amount == self.amount_due(&booking).await?;
        if !signed || callback.booking_id != booking.id || !amount_matches {
            self.mark_failed(&payment, &callback).await;
            return Err(ParkingError::Payment("payment verification failed".to_string()));
        }

        if booking.status != BookingStatus::Pending {
            return self.settle_orphan(booking, payment, &callback).await;
        }

        let now = self.clock.now();
        let next_booking = booking.advanced(BookingStatus::Upcoming, now);
        let mut next_payment = payment.clone();
        next_payment.status = PaymentStatus::Completed;
        next_payment.provider_transaction_id = Some(callback.payment_id.clone());
        next_payment.updated_at = now;

        let effects = Mutation::default()
            .with_payment(PaymentWrite::Update {
                from: payment.status,
                next: next_payment.clone(),
            })
            .with_event(
                ParkingEvent::BookingConfirmed {
                    booking: next_booking.clone(),
                    payment: next_payment.clone(),
                },
                now,
            )?;

        match self.bookings.advance(&booking, next_booking, effects).await {
            Ok(confirmed) => {
                info!(
                    booking = %confirmed.code,
                    payment_id = %callback.payment_id,
                    "payment verified"
                );
                Ok(PaymentConfirmation {
                    booking: confirmed,
                    payment: next_payment,
                })
            }
            Err(err) if err.is_conflict() => {
                // Lost to the reaper, a cancel, or a concurrent replay.
                let booking = self.bookings.get(booking.id).await?;
                let payment = self
                    .store
                    .get_payment_for_booking(booking.id)
                    .await?
                    .ok_or_else(|| {
                        ParkingError::NotFound(format!("payment for booking {}", booking.code))
                    })?;
                if payment.status == PaymentStatus::Completed
                    && payment.provider_transaction_id.as_deref()
                        == Some(callback.payment_id.as_str())
                {
                    return Ok(PaymentConfirmation { booking, payment });
                }
                self.settle_orphan(booking, payment, &callback).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn payments_for(&self, caller: &Caller) -> ParkingResult<Vec<Payment>> {
        self.store.payments_for_user(caller.user_id).await
    }

    async fn amount_due(&self, booking: &Booking) -> ParkingResult<BigDecimal> {
        let slot = self.registry.get(booking.slot_id).await?;
        Ok(hourly_charge(booking.end_time - booking.start_time, &slot.price_per_hour))
    }

    async fn mark_failed(&self, payment: &Payment, callback: &PaymentCallback) {
        let mut next = payment.clone();
        next.status = PaymentStatus::Failed;
        next.provider_transaction_id = Some(callback.payment_id.clone());
        next.updated_at = self.clock.now();

        let write = PaymentWrite::Update {
            from: payment.status,
            next,
        };
        match self.registry.commit(Mutation::default().with_payment(write)).await {
            Ok(_) => warn!(order_id = %callback.order_id, "payment verification failed"),
            Err(e) => error!(
                order_id = %callback.order_id,
                error = %e,
                "could not record failed payment"
            ),
        }
    }

    /// A valid payment arrived for a booking that no longer waits for one.
    /// Money for a cancelled reservation goes back to the payer.
    async fn settle_orphan(
        &self,
        booking: Booking,
        payment: Payment,
        callback: &PaymentCallback,
    ) -> ParkingResult<PaymentConfirmation> {
        if booking.status != BookingStatus::Cancelled {
            return Err(ParkingError::Conflict(format!(
                "booking {} is {}, not awaiting payment",
                booking.code, booking.status
            )));
        }

        match self.gateway.refund(&callback.payment_id, minor_units(&payment.amount)?).await {
            Ok(refund_id) => {
                let mut next = payment.clone();
                next.status = PaymentStatus::Refunded;
                next.provider_transaction_id = Some(callback.payment_id.clone());
                next.updated_at = self.clock.now();
                self.registry
                    .commit(Mutation::default().with_payment(PaymentWrite::Update {
                        from: payment.status,
                        next,
                    }))
                    .await?;
                info!(
                    booking = %booking.code,
                    %refund_id,
                    "payment refunded for cancelled booking"
                );
            }
            Err(e) => {
                error!(
                    booking = %booking.code,
                    payment_id = %callback.payment_id,
                    error = %e,
                    "refund failed"
                );
            }
        }

        if booking.is_expired() {
            Err(ParkingError::ExpiredReservation(format!(
                "booking {} expired before payment was verified",
                booking.code
            )))
        } else {
            Err(ParkingError::Conflict(format!(
                "booking {} was cancelled before payment was verified",
                booking.code
            )))
        }
    }
}

/// Gateways take integer minor units (paise, cents).
fn minor_units(amount: &BigDecimal) -> ParkingResult<i64> {
    (amount.clone() * BigDecimal::from(100))
        .round(0)
        .to_i64()
        .ok_or_else(|| ParkingError::Validation(format!("amount {} is out of range", amount)))
}
