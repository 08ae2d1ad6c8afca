#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use parking_service::bookings::BookingRequest;
use parking_service::clock::ManualClock;
use parking_service::config::CoreSettings;
use parking_service::gateway::SandboxGateway;
use parking_service::memory::MemoryStore;
use parking_service::service::ParkingService;
use parking_service::store::{Mutation, ParkingStore};
use shared::*;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const SECRET: &str = "test-secret";

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
}

pub struct Harness {
    pub service: ParkingService,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<SandboxGateway>,
    pub clock: Arc<ManualClock>,
    pub user: Caller,
    pub staff: Caller,
    pub admin: Caller,
    pub vehicle_id: Uuid,
}

impl Harness {
    /// Clock starts at 09:00 with one registered vehicle for `user`.
    pub async fn new() -> Self {
        Self::over(|store| store).await
    }

    /// Like `new`, with the service writing through whatever `wrap` builds
    /// around the memory store.
    pub async fn over(wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn ParkingStore>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(SandboxGateway::new(SECRET));
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let service = ParkingService::new(
            wrap(store.clone()),
            gateway.clone(),
            clock.clone(),
            CoreSettings::default(),
        );

        let user = Caller::new(Uuid::new_v4(), Role::User);
        let vehicle_id = Uuid::new_v4();
        store
            .add_vehicle(Vehicle {
                id: vehicle_id,
                license_plate: "KA01AB1234".to_string(),
                make: Some("Maruti".to_string()),
                model: Some("Swift".to_string()),
                owner_id: user.user_id,
            })
            .await;

        Self {
            service,
            store,
            gateway,
            clock,
            user,
            staff: Caller::new(Uuid::new_v4(), Role::Staff),
            admin: Caller::new(Uuid::new_v4(), Role::Admin),
            vehicle_id,
        }
    }

    pub async fn add_slot(&self, number: &str, price: i64) -> Slot {
        self.service
            .registry
            .register(NewSlot {
                number: number.to_string(),
                vehicle_type: "Car".to_string(),
                price_per_hour: BigDecimal::from(price),
            })
            .await
            .unwrap()
    }

    /// A second user with a vehicle of their own.
    pub async fn add_user(&self, plate: &str) -> (Caller, Uuid) {
        let caller = Caller::new(Uuid::new_v4(), Role::User);
        let vehicle_id = Uuid::new_v4();
        self.store
            .add_vehicle(Vehicle {
                id: vehicle_id,
                license_plate: plate.to_string(),
                make: None,
                model: None,
                owner_id: caller.user_id,
            })
            .await;
        (caller, vehicle_id)
    }

    pub fn request(&self, slot: &Slot, method: PaymentMethod) -> BookingRequest {
        BookingRequest {
            slot_id: slot.id,
            vehicle_id: self.vehicle_id,
            start_time: at(10, 0),
            end_time: at(12, 0),
            payment_method: method,
        }
    }

    pub async fn book(&self, slot: &Slot, method: PaymentMethod) -> Booking {
        self.service
            .bookings
            .create_booking(&self.user, self.request(slot, method))
            .await
            .unwrap()
    }

    pub async fn slot_status(&self, slot: &Slot) -> SlotStatus {
        self.service.registry.get(slot.id).await.unwrap().status
    }

    pub async fn booking(&self, booking: &Booking) -> Booking {
        self.service.bookings.get(booking.id).await.unwrap()
    }
}

type ApplyHook = Box<dyn FnMut(&Mutation) -> ParkingResult<Option<Mutation>> + Send>;

/// A memory store that runs `hook` before every unit of work. The hook can
/// fail the unit, or return another unit that lands first.
pub struct HookedStore {
    inner: Arc<MemoryStore>,
    hook: Mutex<ApplyHook>,
}

impl HookedStore {
    pub fn new(
        inner: Arc<MemoryStore>,
        hook: impl FnMut(&Mutation) -> ParkingResult<Option<Mutation>> + Send + 'static,
    ) -> Arc<dyn ParkingStore> {
        Arc::new(Self {
            inner,
            hook: Mutex::new(Box::new(hook)),
        })
    }
}

#[async_trait]
impl ParkingStore for HookedStore {
    async fn list_slots(&self) -> ParkingResult<Vec<Slot>> {
        self.inner.list_slots().await
    }
    async fn get_slot(&self, slot_id: Uuid) -> ParkingResult<Option<Slot>> {
        self.inner.get_slot(slot_id).await
    }
    async fn insert_slot(&self, slot: Slot) -> ParkingResult<Slot> {
        self.inner.insert_slot(slot).await
    }
    async fn get_vehicle(&self, vehicle_id: Uuid) -> ParkingResult<Option<Vehicle>> {
        self.inner.get_vehicle(vehicle_id).await
    }
    async fn get_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Booking>> {
        self.inner.get_booking(booking_id).await
    }
    async fn get_booking_by_code(&self, code: &str) -> ParkingResult<Option<Booking>> {
        self.inner.get_booking_by_code(code).await
    }
    async fn bookings_for_slot(
        &self,
        slot_id: Uuid,
        statuses: &[BookingStatus],
    ) -> ParkingResult<Vec<Booking>> {
        self.inner.bookings_for_slot(slot_id, statuses).await
    }
    async fn bookings_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Booking>> {
        self.inner.bookings_for_user(user_id).await
    }
    async fn pending_bookings_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> ParkingResult<Vec<Booking>> {
        self.inner.pending_bookings_created_before(cutoff).await
    }
    async fn count_bookings(&self) -> ParkingResult<i64> {
        self.inner.count_bookings().await
    }
    async fn next_booking_number(&self) -> ParkingResult<i64> {
        self.inner.next_booking_number().await
    }
    async fn get_payment_for_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Payment>> {
        self.inner.get_payment_for_booking(booking_id).await
    }
    async fn get_payment_by_order(&self, order_id: &str) -> ParkingResult<Option<Payment>> {
        self.inner.get_payment_by_order(order_id).await
    }
    async fn payments_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Payment>> {
        self.inner.payments_for_user(user_id).await
    }
    async fn list_gate_logs(&self) -> ParkingResult<Vec<GateLogEntry>> {
        self.inner.list_gate_logs().await
    }
    async fn unprocessed_events(&self, limit: i64) -> ParkingResult<Vec<OutboxEvent>> {
        self.inner.unprocessed_events(limit).await
    }
    async fn mark_event_processed(&self, event_id: Uuid) -> ParkingResult<()> {
        self.inner.mark_event_processed(event_id).await
    }

    async fn apply(&self, mutation: Mutation) -> ParkingResult<Option<Slot>> {
        let first = {
            let mut hook = self.hook.lock().unwrap();
            (&mut **hook)(&mutation)?
        };
        if let Some(first) = first {
            self.inner.apply(first).await?;
        }
        self.inner.apply(mutation).await
    }
}
