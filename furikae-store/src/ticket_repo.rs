use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use furikae_core::repository::{DueScope, StoreError, StoreResult, StoreTransaction, TicketStore};
use furikae_core::{Booking, BookingStatus, SlotQuery, Ticket, TicketStatus, TimeSlot};

const TICKET_COLUMNS: &str = "id, student_id, contract_id, origin_lesson_id, brand_id, product_scope, \
     absence_date, issued_at, expires_at, status, booking_id, used_at, cancelled_at, cancel_reason, updated_at";

const SLOT_COLUMNS: &str = "id, school_id, brand_id, slot_date, start_time, end_time, capacity, booked_count";

const BOOKING_COLUMNS: &str =
    "id, ticket_id, slot_id, status, created_at, confirmed_at, released_at, release_reason";

/// Classifies driver errors by SQLSTATE.
pub(crate) fn store_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut => StoreError::Transient(err.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => StoreError::Transient(err.to_string()),
            Some("23505") => StoreError::Conflict(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        },
        _ => StoreError::Backend(err.to_string()),
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    student_id: String,
    contract_id: String,
    origin_lesson_id: String,
    brand_id: String,
    product_scope: Vec<String>,
    absence_date: NaiveDate,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    status: String,
    booking_id: Option<Uuid>,
    used_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TicketStatus>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Ticket {
            id: row.id,
            student_id: row.student_id,
            contract_id: row.contract_id,
            origin_lesson_id: row.origin_lesson_id,
            brand_id: row.brand_id,
            product_scope: row.product_scope,
            absence_date: row.absence_date,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            status,
            booking_id: row.booking_id,
            used_at: row.used_at,
            cancelled_at: row.cancelled_at,
            cancel_reason: row.cancel_reason,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    school_id: String,
    brand_id: String,
    slot_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    capacity: i32,
    booked_count: i32,
}

impl From<SlotRow> for TimeSlot {
    fn from(row: SlotRow) -> Self {
        TimeSlot {
            id: row.id,
            school_id: row.school_id,
            brand_id: row.brand_id,
            date: row.slot_date,
            start_time: row.start_time,
            end_time: row.end_time,
            capacity: row.capacity,
            booked_count: row.booked_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    ticket_id: Uuid,
    slot_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    release_reason: Option<String>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Booking {
            id: row.id,
            ticket_id: row.ticket_id,
            slot_id: row.slot_id,
            status,
            created_at: row.created_at,
            confirmed_at: row.confirmed_at,
            released_at: row.released_at,
            release_reason: row.release_reason,
        })
    }
}

fn tickets(rows: Vec<TicketRow>) -> StoreResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

fn bookings(rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

pub struct PgTicketStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgTicketStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self { pool, lock_timeout_ms }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // Row-lock waits fail fast with 55P03 instead of queueing forever.
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms);
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE id = $1", TICKET_COLUMNS);
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn list_tickets(&self, student_id: &str, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE student_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY issued_at DESC",
            TICKET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(student_id)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        tickets(rows)
    }

    async fn get_slot(&self, id: Uuid) -> StoreResult<Option<TimeSlot>> {
        let sql = format!("SELECT {} FROM time_slots WHERE id = $1", SLOT_COLUMNS);
        let row = sqlx::query_as::<_, SlotRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(TimeSlot::from))
    }

    async fn find_slots(&self, query: &SlotQuery) -> StoreResult<Vec<TimeSlot>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM time_slots
            WHERE brand_id = ANY($1)
              AND slot_date BETWEEN $2 AND $3
              AND ($4::text IS NULL OR school_id = $4)
              AND (slot_date + start_time) > $5
              AND booked_count < capacity
            ORDER BY slot_date, start_time
            "#,
            SLOT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SlotRow>(&sql)
            .bind(&query.brands)
            .bind(query.range.from)
            .bind(query.range.to)
            .bind(query.school_id.as_deref())
            .bind(query.starts_after)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(TimeSlot::from).collect())
    }

    async fn register_slot(&self, slot: &TimeSlot) -> StoreResult<TimeSlot> {
        sqlx::query(
            r#"
            INSERT INTO time_slots (id, school_id, brand_id, slot_date, start_time, end_time, capacity, booked_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(slot.id)
        .bind(&slot.school_id)
        .bind(&slot.brand_id)
        .bind(slot.date)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.capacity)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        self.get_slot(slot.id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("slot {} vanished after insert", slot.id)))
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn bookings_for_ticket(&self, ticket_id: Uuid) -> StoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE ticket_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(ticket_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        bookings(rows)
    }

    async fn started_active_bookings(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(
            r#"
            SELECT b.id, b.ticket_id, b.slot_id, b.status, b.created_at, b.confirmed_at, b.released_at, b.release_reason
            FROM bookings b
            JOIN time_slots s ON s.id = b.slot_id
            WHERE b.status = 'active'
              AND (s.slot_date + s.start_time) <= $1
            ORDER BY b.created_at
            LIMIT $2
            "#,
        )
        .bind(now.naive_utc())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        bookings(rows)
    }
}

/// Row locks are held until commit or drop; sqlx rolls back on drop.
struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_ticket(&mut self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE id = $1 FOR UPDATE", TICKET_COLUMNS);
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn lock_ticket_by_origin(&mut self, origin_lesson_id: &str) -> StoreResult<Option<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE origin_lesson_id = $1 FOR UPDATE",
            TICKET_COLUMNS
        );
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(origin_lesson_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn lock_due_tickets(
        &mut self,
        scope: &DueScope,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM tickets
            WHERE status = 'issued'
              AND expires_at <= $1
              AND ($2::text IS NULL OR student_id = $2)
            ORDER BY expires_at
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
            TICKET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(now)
            .bind(scope.student_id.as_deref())
            .bind(limit as i64)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(store_err)?;
        tickets(rows)
    }

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1 FOR UPDATE", BOOKING_COLUMNS);
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn active_booking(&mut self, ticket_id: Uuid) -> StoreResult<Option<Booking>> {
        // The caller already holds the ticket row, which guards its bookings.
        let sql = format!(
            "SELECT {} FROM bookings WHERE ticket_id = $1 AND status = 'active'",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(ticket_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn lock_slot(&mut self, id: Uuid) -> StoreResult<Option<TimeSlot>> {
        let sql = format!("SELECT {} FROM time_slots WHERE id = $1 FOR UPDATE", SLOT_COLUMNS);
        let row = sqlx::query_as::<_, SlotRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(row.map(TimeSlot::from))
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tickets (id, student_id, contract_id, origin_lesson_id, brand_id, product_scope,
                                 absence_date, issued_at, expires_at, status, booking_id, used_at,
                                 cancelled_at, cancel_reason, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(ticket.id)
        .bind(&ticket.student_id)
        .bind(&ticket.contract_id)
        .bind(&ticket.origin_lesson_id)
        .bind(&ticket.brand_id)
        .bind(&ticket.product_scope)
        .bind(ticket.absence_date)
        .bind(ticket.issued_at)
        .bind(ticket.expires_at)
        .bind(ticket.status.as_str())
        .bind(ticket.booking_id)
        .bind(ticket.used_at)
        .bind(ticket.cancelled_at)
        .bind(&ticket.cancel_reason)
        .bind(ticket.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        // expires_at is written once, on insert.
        sqlx::query(
            r#"
            UPDATE tickets
            SET status = $2, booking_id = $3, used_at = $4, cancelled_at = $5, cancel_reason = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.status.as_str())
        .bind(ticket.booking_id)
        .bind(ticket.used_at)
        .bind(ticket.cancelled_at)
        .bind(&ticket.cancel_reason)
        .bind(ticket.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, ticket_id, slot_id, status, created_at, confirmed_at, released_at, release_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(booking.id)
        .bind(booking.ticket_id)
        .bind(booking.slot_id)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.confirmed_at)
        .bind(booking.released_at)
        .bind(&booking.release_reason)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2, confirmed_at = $3, released_at = $4, release_reason = $5
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.confirmed_at)
        .bind(booking.released_at)
        .bind(&booking.release_reason)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_slot(&mut self, slot: &TimeSlot) -> StoreResult<()> {
        sqlx::query("UPDATE time_slots SET booked_count = $2 WHERE id = $1")
            .bind(slot.id)
            .bind(slot.booked_count)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(store_err)
    }
}
