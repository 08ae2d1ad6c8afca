use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sql_types::BigInt;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;
use crate::store::{BookingWrite, Mutation, ParkingStore, PaymentWrite};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(QueryableByName)]
struct SequenceValue {
    #[diesel(sql_type = BigInt)]
    value: i64,
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn status_texts(statuses: &[BookingStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn conflict(message: String) -> anyhow::Error {
    ParkingError::Conflict(message).into()
}

/// Unwraps domain errors raised inside a transaction. Unique violations are
/// lost races; anything else is a storage fault.
fn into_parking_error(error: anyhow::Error) -> ParkingError {
    let error = match error.downcast::<ParkingError>() {
        Ok(parking) => return parking,
        Err(other) => other,
    };
    match error.downcast_ref::<diesel::result::Error>() {
        Some(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
            ParkingError::Conflict(info.message().to_string())
        }
        _ => ParkingError::Internal(error),
    }
}

async fn apply_in(
    conn: &mut AsyncPgConnection,
    mutation: Mutation,
) -> anyhow::Result<Option<Slot>> {
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        Box::pin(async move {
            let mut updated = None;

            if let Some(t) = mutation.slot {
                let row = diesel::update(
                    slots::table
                        .filter(slots::id.eq(t.slot_id))
                        .filter(slots::status.eq(t.from.as_str())),
                )
                .set((
                    slots::status.eq(t.to.as_str()),
                    slots::version.eq(slots::version + 1i64),
                ))
                .get_result::<DbSlot>(conn)
                .await
                .optional()?;

                match row {
                    Some(row) => updated = Some(Slot::try_from(row)?),
                    None => {
                        return Err(conflict(format!(
                            "slot {} is no longer {}",
                            t.slot_id, t.from
                        )))
                    }
                }
            }

            match mutation.booking {
                Some(BookingWrite::Insert(booking)) => {
                    diesel::insert_into(bookings::table)
                        .values(DbBooking::from(&booking))
                        .execute(conn)
                        .await?;
                }
                Some(BookingWrite::Advance { from, next }) => {
                    let rows = diesel::update(
                        bookings::table
                            .filter(bookings::id.eq(next.id))
                            .filter(bookings::status.eq(from.as_str())),
                    )
                    .set((
                        bookings::status.eq(next.status.as_str()),
                        bookings::check_in_time.eq(next.check_in_time),
                        bookings::check_out_time.eq(next.check_out_time),
                        bookings::cancel_reason.eq(next.cancel_reason.map(|r| r.as_str())),
                        bookings::updated_at.eq(next.updated_at),
                    ))
                    .execute(conn)
                    .await?;

                    if rows == 0 {
                        return Err(conflict(format!(
                            "booking {} is no longer {}",
                            next.code, from
                        )));
                    }
                }
                None => {}
            }

            match mutation.payment {
                Some(PaymentWrite::Insert(payment)) => {
                    diesel::insert_into(payments::table)
                        .values(DbPayment::from(&payment))
                        .execute(conn)
                        .await?;
                }
                Some(PaymentWrite::Update { from, next }) => {
                    let rows = diesel::update(
                        payments::table
                            .filter(payments::id.eq(next.id))
                            .filter(payments::status.eq(from.as_str())),
                    )
                    .set((
                        payments::amount.eq(next.amount.clone()),
                        payments::status.eq(next.status.as_str()),
                        payments::provider_order_id.eq(next.provider_order_id.clone()),
                        payments::provider_transaction_id.eq(next.provider_transaction_id.clone()),
                        payments::updated_at.eq(next.updated_at),
                    ))
                    .execute(conn)
                    .await?;

                    if rows == 0 {
                        return Err(conflict(format!("payment {} is no longer {}", next.id, from)));
                    }
                }
                None => {}
            }

            if let Some(entry) = mutation.gate_log {
                diesel::insert_into(gate_logs::table)
                    .values(DbGateLog::from(&entry))
                    .execute(conn)
                    .await?;
            }

            if !mutation.events.is_empty() {
                let rows: Vec<DbOutboxEvent> =
                    mutation.events.into_iter().map(DbOutboxEvent::from).collect();
                diesel::insert_into(outbox_events::table)
                    .values(&rows)
                    .execute(conn)
                    .await?;
            }

            Ok(updated)
        })
    })
    .await
}

#[async_trait]
impl ParkingStore for PgStore {
    async fn list_slots(&self) -> ParkingResult<Vec<Slot>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let rows = slots::table
            .order(slots::slot_number.asc())
            .load::<DbSlot>(&mut conn)
            .await
            .context("load slots")?;
        Ok(rows.into_iter().map(Slot::try_from).collect::<anyhow::Result<_>>()?)
    }

    async fn get_slot(&self, slot_id: Uuid) -> ParkingResult<Option<Slot>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let row = slots::table
            .filter(slots::id.eq(slot_id))
            .first::<DbSlot>(&mut conn)
            .await
            .optional()
            .context("load slot")?;
        Ok(row.map(Slot::try_from).transpose()?)
    }

    async fn insert_slot(&self, slot: Slot) -> ParkingResult<Slot> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let inserted = diesel::insert_into(slots::table)
            .values(DbSlot::from(&slot))
            .on_conflict(slots::slot_number)
            .do_nothing()
            .execute(&mut conn)
            .await
            .context("insert slot")?;
        if inserted == 0 {
            return Err(ParkingError::Conflict(format!("slot {} already exists", slot.number)));
        }
        Ok(slot)
    }

    async fn get_vehicle(&self, vehicle_id: Uuid) -> ParkingResult<Option<Vehicle>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let row = vehicles::table
            .filter(vehicles::id.eq(vehicle_id))
            .first::<DbVehicle>(&mut conn)
            .await
            .optional()
            .context("load vehicle")?;
        Ok(row.map(Vehicle::from))
    }

    async fn get_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Booking>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let row = bookings::table
            .filter(bookings::id.eq(booking_id))
            .first::<DbBooking>(&mut conn)
            .await
            .optional()
            .context("load booking")?;
        Ok(row.map(Booking::try_from).transpose()?)
    }

    async fn get_booking_by_code(&self, code: &str) -> ParkingResult<Option<Booking>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let row = bookings::table
            .filter(bookings::code.eq(code))
            .first::<DbBooking>(&mut conn)
            .await
            .optional()
            .context("load booking by code")?;
        Ok(row.map(Booking::try_from).transpose()?)
    }

    async fn bookings_for_slot(
        &self,
        slot_id: Uuid,
        statuses: &[BookingStatus],
    ) -> ParkingResult<Vec<Booking>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let rows = bookings::table
            .filter(bookings::slot_id.eq(slot_id))
            .filter(bookings::status.eq_any(status_texts(statuses)))
            .load::<DbBooking>(&mut conn)
            .await
            .context("load slot bookings")?;
        Ok(rows.into_iter().map(Booking::try_from).collect::<anyhow::Result<_>>()?)
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Booking>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let rows = bookings::table
            .filter(bookings::user_id.eq(user_id))
            .order(bookings::start_time.desc())
            .load::<DbBooking>(&mut conn)
            .await
            .context("load user bookings")?;
        Ok(rows.into_iter().map(Booking::try_from).collect::<anyhow::Result<_>>()?)
    }

    async fn pending_bookings_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> ParkingResult<Vec<Booking>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let rows = bookings::table
            .filter(bookings::status.eq(BookingStatus::Pending.as_str()))
            .filter(bookings::created_at.lt(cutoff))
            .order(bookings::created_at.asc())
            .load::<DbBooking>(&mut conn)
            .await
            .context("load stale reservations")?;
        Ok(rows.into_iter().map(Booking::try_from).collect::<anyhow::Result<_>>()?)
    }

    async fn count_bookings(&self) -> ParkingResult<i64> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let count = bookings::table
            .count()
            .get_result::<i64>(&mut conn)
            .await
            .context("count bookings")?;
        Ok(count)
    }

    async fn next_booking_number(&self) -> ParkingResult<i64> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let next = diesel::sql_query("SELECT nextval('booking_number_seq') AS value")
            .get_result::<SequenceValue>(&mut conn)
            .await
            .context("draw booking number")?;
        Ok(next.value)
    }

    async fn get_payment_for_booking(&self, booking_id: Uuid) -> ParkingResult<Option<Payment>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let row = payments::table
            .filter(payments::booking_id.eq(booking_id))
            .first::<DbPayment>(&mut conn)
            .await
            .optional()
            .context("load payment")?;
        Ok(row.map(Payment::try_from).transpose()?)
    }

    async fn get_payment_by_order(&self, order_id: &str) -> ParkingResult<Option<Payment>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let row = payments::table
            .filter(payments::provider_order_id.eq(order_id))
            .first::<DbPayment>(&mut conn)
            .await
            .optional()
            .context("load payment by order")?;
        Ok(row.map(Payment::try_from).transpose()?)
    }

    async fn payments_for_user(&self, user_id: Uuid) -> ParkingResult<Vec<Payment>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let booking_ids = bookings::table
            .filter(bookings::user_id.eq(user_id))
            .select(bookings::id)
            .load::<Uuid>(&mut conn)
            .await
            .context("load user booking ids")?;
        let rows = payments::table
            .filter(payments::booking_id.eq_any(booking_ids))
            .order(payments::created_at.desc())
            .load::<DbPayment>(&mut conn)
            .await
            .context("load user payments")?;
        Ok(rows.into_iter().map(Payment::try_from).collect::<anyhow::Result<_>>()?)
    }

    async fn list_gate_logs(&self) -> ParkingResult<Vec<GateLogEntry>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let rows = gate_logs::table
            .order(gate_logs::timestamp.desc())
            .load::<DbGateLog>(&mut conn)
            .await
            .context("load gate logs")?;
        Ok(rows.into_iter().map(GateLogEntry::try_from).collect::<anyhow::Result<_>>()?)
    }

    async fn unprocessed_events(&self, limit: i64) -> ParkingResult<Vec<OutboxEvent>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<DbOutboxEvent>(&mut conn)
            .await
            .context("load outbox events")?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> ParkingResult<()> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        diesel::update(outbox_events::table.filter(outbox_events::id.eq(event_id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await
            .context("mark outbox event processed")?;
        Ok(())
    }

    async fn apply(&self, mutation: Mutation) -> ParkingResult<Option<Slot>> {
        let mut conn = self.pool.get().await.context("acquire connection")?;
        apply_in(&mut conn, mutation).await.map_err(into_parking_error)
    }
}
