use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod error;
mod events;

pub use error::{ErrorKind, ParkingError, ParkingResult};
pub use events::{OutboxEvent, ParkingEvent, RealtimeMessage};

/// Human-readable booking codes start here, so the first booking is `SPS-1001`.
pub const FIRST_BOOKING_NUMBER: i64 = 1001;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(anyhow::anyhow!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Reserved,
    Booked,
    Maintenance,
}

string_enum!(SlotStatus {
    Available => "available",
    Reserved => "reserved",
    Booked => "booked",
    Maintenance => "maintenance",
});

impl SlotStatus {
    /// Edges the slot registry accepts. Everything else is a caller bug.
    pub fn can_transition_to(self, next: SlotStatus) -> bool {
        use SlotStatus::*;
        matches!(
            (self, next),
            (Available, Reserved)
                | (Reserved, Available)
                | (Reserved, Booked)
                | (Booked, Available)
                | (Available, Maintenance)
                | (Maintenance, Available)
        )
    }

    pub fn is_occupied(self) -> bool {
        matches!(self, SlotStatus::Reserved | SlotStatus::Booked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Upcoming,
    Active,
    Completed,
    Cancelled,
}

string_enum!(BookingStatus {
    Pending => "pending",
    Upcoming => "upcoming",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl BookingStatus {
    /// Statuses under which a booking keeps its slot out of circulation.
    pub const HOLDING: [BookingStatus; 3] = [
        BookingStatus::Pending,
        BookingStatus::Upcoming,
        BookingStatus::Active,
    ];

    pub fn is_cancellable(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Upcoming)
    }

    pub fn can_advance_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Upcoming)
                | (Upcoming, Active)
                | (Active, Completed)
                | (Pending, Cancelled)
                | (Upcoming, Cancelled)
        )
    }

    /// The slot transition implied by moving a booking from `self` to `next`.
    ///
    /// Slot status is derived from the bookings that hold it, so every booking
    /// edge either leaves the slot alone or moves it along exactly one edge.
    pub fn slot_effect(self, next: BookingStatus) -> Option<(SlotStatus, SlotStatus)> {
        use BookingStatus::*;
        match (self, next) {
            (Pending, Upcoming) => None,
            (Pending | Upcoming, Cancelled) => Some((SlotStatus::Reserved, SlotStatus::Available)),
            (Upcoming, Active) => Some((SlotStatus::Reserved, SlotStatus::Booked)),
            (Active, Completed) => Some((SlotStatus::Booked, SlotStatus::Available)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Online,
}

string_enum!(PaymentMethod {
    Cash => "cash",
    Online => "online",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

string_enum!(PaymentStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Refunded => "refunded",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    CheckIn,
    CheckOut,
}

string_enum!(GateAction {
    CheckIn => "check_in",
    CheckOut => "check_out",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Requested,
    Expired,
}

string_enum!(CancelReason {
    Requested => "requested",
    Expired => "expired",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Staff,
    Admin,
}

string_enum!(Role {
    User => "user",
    Staff => "staff",
    Admin => "admin",
});

/// An already-authenticated identity handed to every core call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require(&self, allowed: &[Role]) -> ParkingResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ParkingError::Authorization(format!(
                "role '{}' may not perform this action",
                self.role
            )))
        }
    }

    /// Owners may act on their own records, admins on anyone's.
    pub fn require_owner_or_admin(&self, owner_id: Uuid) -> ParkingResult<()> {
        if self.user_id == owner_id || self.is_admin() {
            Ok(())
        } else {
            Err(ParkingError::Authorization(
                "booking belongs to another user".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub number: String,
    pub vehicle_type: String,
    pub price_per_hour: BigDecimal,
    pub status: SlotStatus,
    /// Bumped on every transition; lets subscribers drop stale pushes.
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSlot {
    pub number: String,
    #[serde(default = "default_vehicle_type")]
    pub vehicle_type: String,
    pub price_per_hour: BigDecimal,
}

fn default_vehicle_type() -> String {
    "Car".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub license_plate: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub owner_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub code: String,
    pub slot_id: Uuid,
    pub user_id: Uuid,
    pub vehicle_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_method: PaymentMethod,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<CancelReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        windows_overlap(self.start_time, self.end_time, start, end)
    }

    pub fn is_expired(&self) -> bool {
        self.status == BookingStatus::Cancelled && self.cancel_reason == Some(CancelReason::Expired)
    }

    /// The state this booking would be in after moving to `status` at `at`.
    pub fn advanced(&self, status: BookingStatus, at: DateTime<Utc>) -> Booking {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = at;
        match status {
            BookingStatus::Active => next.check_in_time = Some(at),
            BookingStatus::Completed => next.check_out_time = Some(at),
            _ => {}
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub provider_order_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateLogEntry {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub booking_id: Uuid,
    pub action: GateAction,
    pub vehicle_plate: String,
    pub timestamp: DateTime<Utc>,
}

impl GateLogEntry {
    pub fn new(
        staff_id: Uuid,
        booking_id: Uuid,
        action: GateAction,
        vehicle_plate: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            staff_id,
            booking_id,
            action,
            vehicle_plate,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStats {
    pub total_slots: usize,
    pub available_slots: usize,
    pub occupied_slots: usize,
    pub maintenance_slots: usize,
    pub total_bookings: i64,
}

impl SlotStats {
    pub fn from_slots(slots: &[Slot], total_bookings: i64) -> Self {
        let count = |pred: fn(SlotStatus) -> bool| slots.iter().filter(|s| pred(s.status)).count();
        Self {
            total_slots: slots.len(),
            available_slots: count(|s| s == SlotStatus::Available),
            occupied_slots: count(SlotStatus::is_occupied),
            maintenance_slots: count(|s| s == SlotStatus::Maintenance),
            total_bookings,
        }
    }
}

/// Half-open interval intersection: `[a_start, a_end)` meets `[b_start, b_end)`.
pub fn windows_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Whole hours billed for a stay, rounded up, never less than one.
pub fn billable_hours(duration: Duration) -> i64 {
    let seconds = duration.num_seconds().max(0);
    ((seconds + 3599) / 3600).max(1)
}

/// `price_per_hour` times the billable hours of `duration`.
pub fn hourly_charge(duration: Duration, price_per_hour: &BigDecimal) -> BigDecimal {
    BigDecimal::from(billable_hours(duration)) * price_per_hour.clone()
}

pub fn booking_code(number: i64) -> String {
    format!("SPS-{}", number)
}
