mod common;

use bigdecimal::BigDecimal;
use common::*;
use parking_service::payments::PaymentCallback;
use parking_service::store::ParkingStore;
use shared::*;

#[tokio::test]
async fn cash_stay_from_booking_to_receipt() {
    let h = Harness::new().await;
    let slot = h.add_slot("A-01", 5).await;

    let booking = h.book(&slot, PaymentMethod::Cash).await;
    assert_eq!(booking.code, "SPS-1001");
    assert_eq!(booking.status, BookingStatus::Upcoming);
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Reserved);

    h.clock.set(at(10, 5));
    let pass = h.service.gate.check_in(&h.staff, "SPS-1001").await.unwrap();
    assert_eq!(pass.booking.status, BookingStatus::Active);
    assert_eq!(pass.booking.check_in_time, Some(at(10, 5)));
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Booked);
    let logs = h.service.gate.logs(&h.staff).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, GateAction::CheckIn);

    h.clock.set(at(12, 10));
    let pass = h.service.gate.check_out(&h.staff, "SPS-1001").await.unwrap();
    assert_eq!(pass.booking.status, BookingStatus::Completed);
    assert_eq!(pass.fee, Some(BigDecimal::from(15)));
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Available);
    let logs = h.service.gate.logs(&h.staff).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].action, GateAction::CheckOut);

    let receipt = h.service.bookings.receipt(&h.user, booking.id).await.unwrap();
    let payment = receipt.payment.unwrap();
    assert_eq!(payment.method, PaymentMethod::Cash);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.amount, BigDecimal::from(15));
    assert_eq!(receipt.vehicle_plate, "KA01AB1234");

    let outbox = h.store.outbox().await;
    let events: Vec<&str> = outbox.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(events, vec!["booking_created", "vehicle_checked_in", "vehicle_checked_out"]);
    let stamped: Vec<_> = outbox.iter().map(|e| e.created_at).collect();
    assert_eq!(stamped, vec![at(9, 0), at(10, 5), at(12, 10)]);
}

#[tokio::test]
async fn simultaneous_bookings_for_one_slot_have_one_winner() {
    let h = Harness::new().await;
    let slot = h.add_slot("B-02", 5).await;
    let (rival, rival_vehicle) = h.add_user("DL3CAB0001").await;

    let mut rival_request = h.request(&slot, PaymentMethod::Cash);
    rival_request.vehicle_id = rival_vehicle;

    let (first, second) = tokio::join!(
        h.service.bookings.create_booking(&h.user, h.request(&slot, PaymentMethod::Cash)),
        h.service.bookings.create_booking(&rival, rival_request),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(loser.is_conflict());
    assert_eq!(h.store.count_bookings().await.unwrap(), 1);
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Reserved);
}

#[tokio::test]
async fn tampered_signature_fails_the_payment_only() {
    let h = Harness::new().await;
    let slot = h.add_slot("C-03", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;

    let ticket = h.service.payments.create_order(&h.user, booking.id).await.unwrap();
    assert_eq!(ticket.order.amount, 1000);
    assert_eq!(ticket.order.currency, "INR");

    let mut signature = h.gateway.sign(&ticket.order.id, "pay_1");
    signature.replace_range(0..2, if signature.starts_with("00") { "11" } else { "00" });
    let err = h
        .service
        .payments
        .verify_payment(
            &h.user,
            PaymentCallback {
                order_id: ticket.order.id.clone(),
                payment_id: "pay_1".to_string(),
                signature,
                booking_id: booking.id,
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Payment);
    let payment = h.store.get_payment_for_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(h.booking(&booking).await.status, BookingStatus::Pending);
    assert_eq!(h.slot_status(&slot).await, SlotStatus::Reserved);
}
