use chrono::Duration;
use shared::ParkingResult;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, error, info};

use crate::bookings::BookingOrchestrator;
use crate::clock::Clock;
use crate::store::ParkingStore;

/// Releases slots held by online bookings that were never paid for.
pub struct ReservationReaper {
    store: Arc<dyn ParkingStore>,
    bookings: Arc<BookingOrchestrator>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    interval: std::time::Duration,
}

impl ReservationReaper {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        bookings: Arc<BookingOrchestrator>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            bookings,
            clock,
            ttl,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("Error sweeping stale reservations: {}", e);
            }
        }
    }

    /// Expires every pending booking older than the TTL and returns how many
    /// were expired. Bookings that moved on in the meantime are skipped, and a
    /// booking that fails to expire does not hold up the rest.
    pub async fn sweep(&self) -> ParkingResult<usize> {
        let cutoff = self.clock.now() - self.ttl;
        let stale = self.store.pending_bookings_created_before(cutoff).await?;

        let mut expired = 0;
        for booking in stale {
            match self.bookings.expire(&booking).await {
                Ok(_) => expired += 1,
                Err(e) if e.is_conflict() => {
                    debug!(booking = %booking.code, "booking moved before it could expire");
                }
                Err(e) => {
                    error!(booking = %booking.code, error = %e, "could not expire booking");
                }
            }
        }

        if expired > 0 {
            info!(expired, "stale reservations released");
        }
        Ok(expired)
    }
}
