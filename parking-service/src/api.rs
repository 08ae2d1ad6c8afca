use axum::{
    async_trait,
    extract::{
        ws::{Message, WebSocket},
        FromRequestParts, Path, State, WebSocketUpgrade,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use serde::{Deserialize, Serialize};
use shared::*;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::bookings::{BookingRequest, Receipt};
use crate::broadcaster::SlotFeed;
use crate::gate::GatePass;
use crate::payments::{OrderTicket, PaymentCallback, PaymentConfirmation};
use crate::service::ParkingService;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub service: ParkingService,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub struct ApiError(pub ParkingError);

impl From<ParkingError> for ApiError {
    fn from(err: ParkingError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Payment => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::ExpiredReservation => StatusCode::GONE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self.0 {
            ParkingError::Internal(e) => {
                error!("Internal error: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: kind.as_str().to_string(),
                message,
            }),
        )
            .into_response()
    }
}

/// The caller as asserted by the upstream auth proxy.
pub struct Identity(pub Caller);

impl Identity {
    pub fn allow(&self, roles: &[Role]) -> ParkingResult<Caller> {
        self.0.require(roles)?;
        Ok(self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
        };
        let user_id = header(USER_ID_HEADER).and_then(|v| Uuid::parse_str(v).ok());
        let role = header(ROLE_HEADER).and_then(|v| v.parse::<Role>().ok());

        match (user_id, role) {
            (Some(user_id), Some(role)) => Ok(Self(Caller::new(user_id, role))),
            _ => Err(ApiError(ParkingError::Authorization(
                "missing or invalid identity headers".to_string(),
            ))),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub booking_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct GateScan {
    #[serde(alias = "code")]
    pub booking_code: String,
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/slots", get(list_slots).post(register_slot))
        .route("/slots/:id/maintenance", put(set_maintenance))
        .route("/bookings", post(create_booking))
        .route("/bookings/me", get(my_bookings))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/receipt", get(booking_receipt))
        .route("/payments/create-order", post(create_payment_order))
        .route("/payments/verify-payment", post(verify_payment))
        .route("/payments/me", get(my_payments))
        .route("/gate/checkin", post(gate_check_in))
        .route("/gate/checkout", post(gate_check_out))
        .route("/gate/logs", get(gate_logs))
        .route("/admin/stats", get(admin_stats))
        .route("/ws/slots", get(slot_socket));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn list_slots(State(state): State<AppState>) -> ApiResult<Vec<Slot>> {
    Ok(Json(state.service.registry.snapshot().await?))
}

pub async fn register_slot(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<NewSlot>,
) -> Result<(StatusCode, Json<Slot>), ApiError> {
    identity.allow(&[Role::Admin])?;
    let slot = state.service.registry.register(request).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

pub async fn set_maintenance(
    State(state): State<AppState>,
    identity: Identity,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<MaintenanceRequest>,
) -> ApiResult<Slot> {
    identity.allow(&[Role::Admin])?;
    Ok(Json(state.service.bookings.set_maintenance(slot_id, request.enabled).await?))
}

pub async fn create_booking(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let caller = identity.allow(&[Role::User])?;
    let booking = state.service.bookings.create_booking(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn my_bookings(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Vec<Booking>> {
    let caller = identity.allow(&[Role::User])?;
    Ok(Json(state.service.bookings.bookings_for(&caller).await?))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    identity: Identity,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Booking> {
    let caller = identity.allow(&[Role::User, Role::Admin])?;
    Ok(Json(state.service.bookings.cancel_booking(&caller, booking_id).await?))
}

pub async fn booking_receipt(
    State(state): State<AppState>,
    identity: Identity,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Receipt> {
    let caller = identity.allow(&[Role::User, Role::Admin])?;
    Ok(Json(state.service.bookings.receipt(&caller, booking_id).await?))
}

pub async fn create_payment_order(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<OrderTicket>), ApiError> {
    let caller = identity.allow(&[Role::User])?;
    let ticket = state.service.payments.create_order(&caller, request.booking_id).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    identity: Identity,
    Json(callback): Json<PaymentCallback>,
) -> ApiResult<PaymentConfirmation> {
    let caller = identity.allow(&[Role::User])?;
    Ok(Json(state.service.payments.verify_payment(&caller, callback).await?))
}

pub async fn my_payments(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Vec<Payment>> {
    let caller = identity.allow(&[Role::User])?;
    Ok(Json(state.service.payments.payments_for(&caller).await?))
}

pub async fn gate_check_in(
    State(state): State<AppState>,
    identity: Identity,
    Json(scan): Json<GateScan>,
) -> ApiResult<GatePass> {
    let caller = identity.allow(&[Role::Staff, Role::Admin])?;
    Ok(Json(state.service.gate.check_in(&caller, &scan.booking_code).await?))
}

pub async fn gate_check_out(
    State(state): State<AppState>,
    identity: Identity,
    Json(scan): Json<GateScan>,
) -> ApiResult<GatePass> {
    let caller = identity.allow(&[Role::Staff, Role::Admin])?;
    Ok(Json(state.service.gate.check_out(&caller, &scan.booking_code).await?))
}

pub async fn gate_logs(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Vec<GateLogEntry>> {
    let caller = identity.allow(&[Role::Staff, Role::Admin])?;
    Ok(Json(state.service.gate.logs(&caller).await?))
}

pub async fn admin_stats(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<SlotStats> {
    identity.allow(&[Role::Admin])?;
    Ok(Json(state.service.registry.stats().await?))
}

pub async fn slot_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_slots(socket, state.service))
}

/// Subscribes before the first snapshot so no transition can fall between
/// the two; every gap or `resync` request is answered with a fresh snapshot.
async fn stream_slots(socket: WebSocket, service: ParkingService) {
    let mut feed = service.broadcaster().subscribe();
    let (mut sender, mut receiver) = socket.split();
    info!(subscribers = service.broadcaster().subscriber_count(), "slot feed connected");

    if let Err(e) = push_snapshot(&mut sender, &service).await {
        debug!("Client disconnected before snapshot: {}", e);
        return;
    }

    loop {
        let outcome = tokio::select! {
            update = feed.next() => match update {
                Some(SlotFeed::Update(slot)) => {
                    push(&mut sender, &RealtimeMessage::SlotUpdate { slot }).await
                }
                Some(SlotFeed::Gap { missed }) => {
                    debug!(missed, "slot feed lagged, resending snapshot");
                    push_snapshot(&mut sender, &service).await
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) if text.trim() == "resync" => {
                    push_snapshot(&mut sender, &service).await
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => Ok(()),
            },
        };

        if let Err(e) = outcome {
            debug!("Slot feed closed: {}", e);
            break;
        }
    }

    info!("slot feed disconnected");
}

async fn push_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    service: &ParkingService,
) -> anyhow::Result<()> {
    let slots = service.registry.snapshot().await?;
    push(sender, &RealtimeMessage::Snapshot { slots }).await
}

async fn push(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &RealtimeMessage,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}

pub async fn health_check() -> &'static str {
    "OK"
}
