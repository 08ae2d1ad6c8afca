mod common;

use chrono::Duration;
use common::*;
use parking_service::payments::PaymentCallback;
use parking_service::store::{BookingWrite, Mutation, ParkingStore};
use shared::*;

fn callback(h: &Harness, order_id: &str, payment_id: &str, booking: &Booking) -> PaymentCallback {
    PaymentCallback {
        order_id: order_id.to_string(),
        payment_id: payment_id.to_string(),
        signature: h.gateway.sign(order_id, payment_id),
        booking_id: booking.id,
    }
}

#[tokio::test]
async fn verified_payment_confirms_the_booking_once() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;
    let ticket = h.service.payments.create_order(&h.user, booking.id).await.unwrap();
    assert_eq!(ticket.key_id, "sandbox");

    let confirmed = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &ticket.order.id, "pay_1", &booking))
        .await
        .unwrap();
    assert_eq!(confirmed.booking.status, BookingStatus::Upcoming);
    assert_eq!(confirmed.payment.status, PaymentStatus::Completed);
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Reserved);
    let events_after_first = h.store.outbox().await.len();

    let replay = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &ticket.order.id, "pay_1", &booking))
        .await
        .unwrap();
    assert_eq!(replay, confirmed);
    assert_eq!(h.store.outbox().await.len(), events_after_first);

    let err = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &ticket.order.id, "pay_2", &booking))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Payment);
    let payment = h.store.get_payment_for_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.provider_transaction_id.as_deref(), Some("pay_1"));

    let err = h.service.payments.create_order(&h.user, booking.id).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn open_order_is_reused_until_it_fails() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;

    let first = h.service.payments.create_order(&h.user, booking.id).await.unwrap();
    let again = h.service.payments.create_order(&h.user, booking.id).await.unwrap();
    assert_eq!(again.order, first.order);
    assert_eq!(again.payment, first.payment);

    // The checkout opened with the first ticket still settles.
    let confirmed = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &first.order.id, "pay_1", &booking))
        .await
        .unwrap();
    assert_eq!(confirmed.booking.status, BookingStatus::Upcoming);
    assert_eq!(confirmed.payment.provider_order_id.as_deref(), Some(first.order.id.as_str()));
    assert!(h.gateway.refunds().is_empty());
}

#[tokio::test]
async fn failed_payment_can_be_retried_with_a_new_order() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;
    let first = h.service.payments.create_order(&h.user, booking.id).await.unwrap();

    let mut forged = callback(&h, &first.order.id, "pay_1", &booking);
    forged.booking_id = uuid::Uuid::new_v4();
    let err = h.service.payments.verify_payment(&h.user, forged).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Payment);

    let second = h.service.payments.create_order(&h.user, booking.id).await.unwrap();
    assert_ne!(second.order.id, first.order.id);
    assert_eq!(second.payment.id, first.payment.id);
    assert_eq!(second.payment.status, PaymentStatus::Pending);

    let confirmed = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &second.order.id, "pay_2", &booking))
        .await
        .unwrap();
    assert_eq!(confirmed.booking.status, BookingStatus::Upcoming);
    assert_eq!(h.service.payments.payments_for(&h.user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cash_bookings_have_nothing_to_pay_online() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Cash).await;

    let err = h.service.payments.create_order(&h.user, booking.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn stranger_cannot_pay_for_someone_elses_booking() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;
    let (stranger, _) = h.add_user("TN09ZZ0001").await;

    let err = h.service.payments.create_order(&stranger, booking.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[tokio::test]
async fn payment_after_expiry_is_refunded() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;
    let ticket = h.service.payments.create_order(&h.user, booking.id).await.unwrap();

    h.clock.advance(Duration::minutes(16));
    let reaper = h.service.reaper(std::time::Duration::from_secs(30));
    assert_eq!(reaper.sweep().await.unwrap(), 1);
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Available);

    let err = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &ticket.order.id, "pay_late", &booking))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExpiredReservation);
    assert_eq!(h.gateway.refunds(), vec![("pay_late".to_string(), 1000)]);
    let payment = h.store.get_payment_for_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert!(h.booking(&booking).await.is_expired());

    let err = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &ticket.order.id, "pay_late", &booking))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExpiredReservation);
    assert_eq!(h.gateway.refunds().len(), 1);

    let err = h.service.payments.create_order(&h.user, booking.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExpiredReservation);
}

#[tokio::test]
async fn refused_refund_leaves_the_payment_pending() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;
    let ticket = h.service.payments.create_order(&h.user, booking.id).await.unwrap();

    h.clock.advance(Duration::minutes(16));
    h.service.reaper(std::time::Duration::from_secs(30)).sweep().await.unwrap();
    h.gateway.refuse_refunds(true);

    let err = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &ticket.order.id, "pay_late", &booking))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExpiredReservation);
    let payment = h.store.get_payment_for_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn expiry_landing_during_verification_refunds_the_payment() {
    // The reaper expires the booking between the read and the confirming write.
    let h = Harness::over(|memory| {
        HookedStore::new(memory, |mutation: &Mutation| match &mutation.booking {
            Some(BookingWrite::Advance { next, .. }) if next.status == BookingStatus::Upcoming => {
                let mut expired = next.clone();
                expired.status = BookingStatus::Cancelled;
                expired.cancel_reason = Some(CancelReason::Expired);
                let release =
                    Mutation::transition(next.slot_id, SlotStatus::Reserved, SlotStatus::Available);
                Ok(Some(release.with_booking(BookingWrite::Advance {
                    from: BookingStatus::Pending,
                    next: expired,
                })))
            }
            _ => Ok(None),
        })
    })
    .await;
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;
    let ticket = h.service.payments.create_order(&h.user, booking.id).await.unwrap();

    let err = h
        .service
        .payments
        .verify_payment(&h.user, callback(&h, &ticket.order.id, "pay_1", &booking))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExpiredReservation);
    assert_eq!(h.gateway.refunds(), vec![("pay_1".to_string(), 1000)]);
    let payment = h.store.get_payment_for_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert!(h.booking(&booking).await.is_expired());
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Available);
}
