use std::sync::Arc;

use crate::bookings::BookingOrchestrator;
use crate::broadcaster::RealtimeBroadcaster;
use crate::clock::Clock;
use crate::config::CoreSettings;
use crate::gate::GateController;
use crate::gateway::PaymentGateway;
use crate::payments::PaymentCoordinator;
use crate::reaper::ReservationReaper;
use crate::registry::SlotRegistry;
use crate::store::ParkingStore;

/// The parking core with every component wired to the same store and clock.
#[derive(Clone)]
pub struct ParkingService {
    pub store: Arc<dyn ParkingStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: CoreSettings,
    pub registry: Arc<SlotRegistry>,
    pub bookings: Arc<BookingOrchestrator>,
    pub payments: Arc<PaymentCoordinator>,
    pub gate: Arc<GateController>,
}

impl ParkingService {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        settings: CoreSettings,
    ) -> Self {
        let broadcaster = RealtimeBroadcaster::new(settings.broadcast_capacity);
        let registry = Arc::new(SlotRegistry::new(store.clone(), broadcaster));
        let bookings = Arc::new(BookingOrchestrator::new(
            store.clone(),
            registry.clone(),
            clock.clone(),
        ));
        let payments = Arc::new(PaymentCoordinator::new(
            store.clone(),
            registry.clone(),
            bookings.clone(),
            gateway,
            clock.clone(),
            settings.currency.clone(),
        ));
        let gate = Arc::new(GateController::new(
            store.clone(),
            registry.clone(),
            bookings.clone(),
            clock.clone(),
            settings.checkin_grace,
            settings.currency.clone(),
        ));

        Self {
            store,
            clock,
            settings,
            registry,
            bookings,
            payments,
            gate,
        }
    }

    pub fn broadcaster(&self) -> &RealtimeBroadcaster {
        self.registry.broadcaster()
    }

    pub fn reaper(&self, interval: std::time::Duration) -> ReservationReaper {
        ReservationReaper::new(
            self.store.clone(),
            self.bookings.clone(),
            self.clock.clone(),
            self.settings.reservation_ttl,
            interval,
        )
    }
}
