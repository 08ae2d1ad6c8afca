mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use parking_service::api::{create_router, AppState, ROLE_HEADER, USER_ID_HEADER};
use serde_json::{json, Value};
use shared::*;
use tower::ServiceExt;

fn router(h: &Harness) -> Router {
    create_router(AppState {
        service: h.service.clone(),
    })
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    caller: Option<&Caller>,
    body: Option<Value>) -> (StatusCode,
    Value,
) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        request = request
            .header(USER_ID_HEADER, caller.user_id.to_string())
            .header(ROLE_HEADER, caller.role.as_str());
    }
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn booking_body(h: &Harness, slot: &Slot, start: &str, end: &str) -> Value {
    json!({
        "slot_id": slot.id,
        "vehicle_id": h.vehicle_id,
        "start_time": start,
        "end_time": end,
        "payment_method": "cash",
    })
}

#[tokio::test]
async fn health_needs_no_identity() {
    let h = Harness::new().await;
    let response = router(&h)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_identity_is_forbidden() {
    let h = Harness::new().await;
    let app = router(&h);

    let (status, body) = call(&app, "GET", "/api/v1/bookings/me", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "authorization_error");
}

#[tokio::test]
async fn only_admins_manage_slots() {
    let h = Harness::new().await;
    let app = router(&h);
    let slot = json!({ "number": "A-01", "price_per_hour": "5" });

    let (status, _) = call(&app, "POST", "/api/v1/slots", Some(&h.user), Some(slot.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) =
        call(&app, "POST", "/api/v1/slots", Some(&h.admin), Some(slot.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "available");
    assert_eq!(created["vehicle_type"], "Car");

    let (status, body) = call(&app, "POST", "/api/v1/slots", Some(&h.admin), Some(slot)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict_error");

    let uri = format!("/api/v1/slots/{}/maintenance", created["id"].as_str().unwrap());
    let (status, updated) =
        call(&app, "PUT", &uri, Some(&h.admin), Some(json!({ "enabled": true }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "maintenance");

    let (status, slots) = call(&app, "GET", "/api/v1/slots", Some(&h.user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn booking_errors_map_to_statuses() {
    let h = Harness::new().await;
    let app = router(&h);
    let slot = h.add_slot("A-01", 5).await;

    let body = booking_body(&h, &slot, "2025-06-02T10:00:00Z", "2025-06-02T12:00:00Z");
    let (status, booking) =
        call(&app, "POST", "/api/v1/bookings", Some(&h.user), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["code"], "SPS-1001");
    assert_eq!(booking["status"], "upcoming");

    let (status, err) = call(&app, "POST", "/api/v1/bookings", Some(&h.user), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "conflict_error");

    let backwards = booking_body(&h, &slot, "2025-06-02T12:00:00Z", "2025-06-02T10:00:00Z");
    let (status, err) =
        call(&app, "POST", "/api/v1/bookings", Some(&h.user), Some(backwards)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "validation_error");

    let later = booking_body(&h, &slot, "2025-06-02T14:00:00Z", "2025-06-02T15:00:00Z");
    let (status, _) = call(&app, "POST", "/api/v1/bookings", Some(&h.staff), Some(later)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, mine) = call(&app, "GET", "/api/v1/bookings/me", Some(&h.user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn gate_is_staff_only() {
    let h = Harness::new().await;
    let app = router(&h);
    let slot = h.add_slot("A-01", 5).await;
    h.book(&slot, PaymentMethod::Cash).await;
    h.clock.set(at(10, 5));

    let scan = json!({ "booking_code": "SPS-1001" });
    let (status, _) =
        call(&app, "POST", "/api/v1/gate/checkin", Some(&h.user), Some(scan.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, err) = call(
        &app,
        "POST",
        "/api/v1/gate/checkin",
        Some(&h.staff),
        Some(json!({ "booking_code": "SPS-4242" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "not_found_error");

    let (status, pass) =
        call(&app, "POST", "/api/v1/gate/checkin", Some(&h.staff), Some(scan)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pass["booking"]["status"], "active");
    assert_eq!(pass["slot_number"], "A-01");

    let (status, logs) = call(&app, "GET", "/api/v1/gate/logs", Some(&h.admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs[0]["action"], "check_in");

    let (status, stats) = call(&app, "GET", "/api/v1/admin/stats", Some(&h.admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["occupied_slots"], 1);
    assert_eq!(stats["total_bookings"], 1);

    let (status, _) = call(&app, "GET", "/api/v1/admin/stats", Some(&h.staff), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn expired_reservation_is_gone() {
    let h = Harness::new().await;
    let app = router(&h);
    let slot = h.add_slot("A-01", 5).await;
    let booking = h.book(&slot, PaymentMethod::Online).await;

    h.clock.advance(chrono::Duration::minutes(16));
    h.service.reaper(std::time::Duration::from_secs(30)).sweep().await.unwrap();

    let (status, err) = call(
        &app,
        "POST",
        "/api/v1/payments/create-order",
        Some(&h.user),
        Some(json!({ "booking_id": booking.id })),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(err["error"], "expired_reservation_error");
}
