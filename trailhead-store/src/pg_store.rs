use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use trailhead_core::lifecycle::{confirmation_blocker, BookingEvent, Transition};
use trailhead_core::{
    Booking, BookingStore, ConfirmOutcome, DateRange, Listing, ListingId, OccupancyEntry,
    PaymentSession, PaymentStatus, StoreError, Transaction, TransactionStatus,
};
use uuid::Uuid;

/// PostgreSQL `BookingStore`.
///
/// Occupancy changes lock the listing row (`FOR UPDATE`) before the overlap
/// check, so concurrent holds on one listing are serialized while different
/// listings proceed in parallel.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map_or(false, |e| e.is_unique_violation())
}

// ============================================================================
// Rows
// ============================================================================

const BOOKING_COLUMNS: &str = "id, listing_id, renter_id, start_date, end_date, guest_count, \
     base_cost, currency, status, hold_expires_at, idempotency_key, cancel_reason, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, booking_id, base_amount, service_fee, amount_total, currency, \
     status, redirect_url, idempotency_key, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, booking_id, session_id, provider_reference, base_amount, \
     service_fee, amount, currency, status, refund_reference, created_at";

/// Rows that count as occupying at `$4`.
const OCCUPYING: &str = "(status IN ('CONFIRMED', 'COMPLETED', 'BLOCKED') \
     OR (status = 'HELD' AND (hold_expires_at IS NULL OR hold_expires_at > $4)))";

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: i64,
    owner_id: Uuid,
    title: String,
    nightly_price: i64,
    currency: String,
    max_guests: i32,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Listing {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            nightly_price: row.nightly_price,
            currency: row.currency,
            max_guests: row.max_guests,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    listing_id: i64,
    renter_id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
    guest_count: i32,
    base_cost: i64,
    currency: String,
    status: String,
    hold_expires_at: Option<DateTime<Utc>>,
    idempotency_key: Option<String>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            listing_id: row.listing_id,
            renter_id: row.renter_id,
            dates: DateRange {
                start: row.start_date,
                end: row.end_date,
            },
            guest_count: row.guest_count,
            base_cost: row.base_cost,
            currency: row.currency,
            status: row.status.parse().map_err(StoreError::Database)?,
            hold_expires_at: row.hold_expires_at,
            idempotency_key: row.idempotency_key,
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    booking_id: Uuid,
    base_amount: i64,
    service_fee: i64,
    amount_total: i64,
    currency: String,
    status: String,
    redirect_url: Option<String>,
    idempotency_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for PaymentSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(PaymentSession {
            id: row.id,
            booking_id: row.booking_id,
            base_amount: row.base_amount,
            service_fee: row.service_fee,
            amount_total: row.amount_total,
            currency: row.currency,
            status: row.status.parse().map_err(StoreError::Database)?,
            redirect_url: row.redirect_url,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    booking_id: Uuid,
    session_id: Option<String>,
    provider_reference: String,
    base_amount: i64,
    service_fee: i64,
    amount: i64,
    currency: String,
    status: String,
    refund_reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            booking_id: row.booking_id,
            session_id: row.session_id,
            provider_reference: row.provider_reference,
            base_amount: row.base_amount,
            service_fee: row.service_fee,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse().map_err(StoreError::Database)?,
            refund_reference: row.refund_reference,
            created_at: row.created_at,
        })
    }
}

fn bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}

// ============================================================================
// Connection-level helpers (usable inside a transaction)
// ============================================================================

async fn lock_listing(conn: &mut PgConnection, listing_id: ListingId) -> Result<(), StoreError> {
    let locked: Option<(i64,)> = sqlx::query_as("SELECT id FROM listings WHERE id = $1 FOR UPDATE")
        .bind(listing_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?;

    locked
        .map(|_| ())
        .ok_or_else(|| StoreError::NotFound(format!("listing {}", listing_id)))
}

async fn lock_booking(conn: &mut PgConnection, booking_id: Uuid) -> Result<Booking, StoreError> {
    let sql = format!("SELECT {} FROM bookings WHERE id = $1 FOR UPDATE", BOOKING_COLUMNS);
    let row: Option<BookingRow> = sqlx::query_as(&sql)
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?;

    row.ok_or_else(|| StoreError::NotFound(format!("booking {}", booking_id)))?
        .try_into()
}

/// Lock the listing a booking belongs to, then the booking itself.
/// Listing-before-booking is the lock order everywhere.
async fn lock_booking_and_listing(
    conn: &mut PgConnection,
    booking_id: Uuid,
) -> Result<Booking, StoreError> {
    let listing: Option<(i64,)> = sqlx::query_as("SELECT listing_id FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?;
    let (listing_id,) = listing.ok_or_else(|| StoreError::NotFound(format!("booking {}", booking_id)))?;

    lock_listing(conn, listing_id).await?;
    lock_booking(conn, booking_id).await
}

async fn occupancy(
    conn: &mut PgConnection,
    listing_id: ListingId,
    dates: DateRange,
    now: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<Vec<OccupancyEntry>, StoreError> {
    let sql = format!(
        "SELECT {} FROM bookings \
         WHERE listing_id = $1 AND start_date < $3 AND $2 < end_date AND {} \
         AND ($5::uuid IS NULL OR id <> $5) \
         ORDER BY start_date",
        BOOKING_COLUMNS, OCCUPYING
    );

    let rows: Vec<BookingRow> = sqlx::query_as(&sql)
        .bind(listing_id)
        .bind(dates.start)
        .bind(dates.end)
        .bind(now)
        .bind(exclude)
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;

    Ok(bookings(rows)?
        .iter()
        .filter_map(|b| b.occupancy(now))
        .collect())
}

async fn find_transaction_in(
    conn: &mut PgConnection,
    provider_reference: &str,
) -> Result<Option<Transaction>, StoreError> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE provider_reference = $1",
        TRANSACTION_COLUMNS
    );
    let row: Option<TransactionRow> = sqlx::query_as(&sql)
        .bind(provider_reference)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?;

    row.map(Transaction::try_from).transpose()
}

async fn update_booking_status(conn: &mut PgConnection, booking: &Booking) -> Result<(), StoreError> {
    sqlx::query("UPDATE bookings SET status = $2, cancel_reason = $3, updated_at = $4 WHERE id = $1")
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.cancel_reason.as_deref())
        .bind(booking.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
    Ok(())
}

async fn insert_transaction(conn: &mut PgConnection, t: &Transaction) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions (id, booking_id, session_id, provider_reference, base_amount,
                                  service_fee, amount, currency, status, refund_reference, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(t.id)
    .bind(t.booking_id)
    .bind(t.session_id.as_deref())
    .bind(&t.provider_reference)
    .bind(t.base_amount)
    .bind(t.service_fee)
    .bind(t.amount)
    .bind(&t.currency)
    .bind(t.status.as_str())
    .bind(t.refund_reference.as_deref())
    .bind(t.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ============================================================================
// BookingStore
// ============================================================================

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        let row: Option<ListingRow> = sqlx::query_as(
            "SELECT id, owner_id, title, nightly_price, currency, max_guests FROM listings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        Ok(row.map(Listing::from))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row: Option<BookingRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        row.map(Booking::try_from).transpose()
    }

    async fn list_occupancy(
        &self,
        listing_id: ListingId,
        dates: DateRange,
        now: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<OccupancyEntry>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        occupancy(&mut conn, listing_id, dates, now, exclude).await
    }

    async fn insert_if_free(
        &self,
        booking: Booking,
        now: DateTime<Utc>,
    ) -> Result<Booking, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        // 1. Serialize against every other occupancy change on this listing
        lock_listing(&mut tx, booking.listing_id).await?;

        // 2. Overlap check sees everything committed before we took the lock
        let taken = occupancy(&mut tx, booking.listing_id, booking.dates, now, Some(booking.id)).await?;
        if !taken.is_empty() {
            return Err(StoreError::Conflict {
                listing_id: booking.listing_id,
                dates: booking.dates,
            });
        }

        // 3. Insert
        sqlx::query(
            r#"
            INSERT INTO bookings (id, listing_id, renter_id, start_date, end_date, guest_count, base_cost,
                                  currency, status, hold_expires_at, idempotency_key, cancel_reason,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(booking.id)
        .bind(booking.listing_id)
        .bind(booking.renter_id)
        .bind(booking.dates.start)
        .bind(booking.dates.end)
        .bind(booking.guest_count)
        .bind(booking.base_cost)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.hold_expires_at)
        .bind(booking.idempotency_key.as_deref())
        .bind(booking.cancel_reason.as_deref())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(booking)
    }

    async fn apply_event(
        &self,
        booking_id: Uuid,
        event: BookingEvent,
        now: DateTime<Utc>,
    ) -> Result<(Booking, Transition), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let mut booking = lock_booking_and_listing(&mut tx, booking_id).await?;
        let transition = booking.apply(event, now)?;

        if transition.is_applied() {
            update_booking_status(&mut tx, &booking).await?;
        }

        tx.commit().await.map_err(db)?;
        Ok((booking, transition))
    }

    async fn confirm_payment(
        &self,
        mut transaction: Transaction,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, StoreError> {
        // Fast path for redelivery, no locks taken
        if let Some(existing) = self.find_transaction(&transaction.provider_reference).await? {
            return Ok(ConfirmOutcome::AlreadyReconciled(existing));
        }

        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut booking = lock_booking_and_listing(&mut tx, transaction.booking_id).await?;

        // A racing confirmation may have committed while we waited for the locks
        if let Some(existing) = find_transaction_in(&mut tx, &transaction.provider_reference).await? {
            return Ok(ConfirmOutcome::AlreadyReconciled(existing));
        }

        let dates_free = if booking.is_hold_expired(now) {
            occupancy(&mut tx, booking.listing_id, booking.dates, now, Some(booking.id))
                .await?
                .is_empty()
        } else {
            true
        };

        let blocker = confirmation_blocker(&booking, dates_free, now);
        match blocker {
            None => {
                booking.apply(BookingEvent::PaymentConfirmed, now)?;
                update_booking_status(&mut tx, &booking).await?;
                transaction.status = TransactionStatus::Confirmed;
            }
            Some(_) => transaction.status = TransactionStatus::Cancelled,
        }

        if let Err(err) = insert_transaction(&mut tx, &transaction).await {
            if is_unique_violation(&err) {
                drop(tx);
                let existing = self
                    .find_transaction(&transaction.provider_reference)
                    .await?
                    .ok_or_else(|| StoreError::Database(err.to_string()))?;
                return Ok(ConfirmOutcome::AlreadyReconciled(existing));
            }
            return Err(db(err));
        }

        tx.commit().await.map_err(db)?;

        Ok(match blocker {
            None => ConfirmOutcome::Confirmed { booking, transaction },
            Some(reason) => ConfirmOutcome::NeedsReview { booking, transaction, reason },
        })
    }

    async fn find_transaction(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        find_transaction_in(&mut conn, provider_reference).await
    }

    async fn transactions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE booking_id = $1 ORDER BY created_at",
            TRANSACTION_COLUMNS
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn transactions_awaiting_refund(&self) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT t.id, t.booking_id, t.session_id, t.provider_reference, t.base_amount,
                   t.service_fee, t.amount, t.currency, t.status, t.refund_reference, t.created_at
            FROM transactions t
            JOIN bookings b ON b.id = t.booking_id
            WHERE t.status = 'CONFIRMED' AND b.status = 'CANCELLED'
            ORDER BY t.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn mark_refunded(
        &self,
        transaction_id: Uuid,
        refund_reference: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'REFUNDED', refund_reference = $2 WHERE id = $1",
        )
        .bind(transaction_id)
        .bind(refund_reference)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("transaction {}", transaction_id)));
        }
        Ok(())
    }

    async fn open_session(&self, session: PaymentSession) -> Result<PaymentSession, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(
            "UPDATE payment_sessions SET status = 'EXPIRED', updated_at = $2 \
             WHERE booking_id = $1 AND status = 'PENDING' AND id <> $3",
        )
        .bind(session.booking_id)
        .bind(session.created_at)
        .bind(&session.id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query(
            r#"
            INSERT INTO payment_sessions (id, booking_id, base_amount, service_fee, amount_total, currency,
                                          status, redirect_url, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&session.id)
        .bind(session.booking_id)
        .bind(session.base_amount)
        .bind(session.service_fee)
        .bind(session.amount_total)
        .bind(&session.currency)
        .bind(session.status.as_str())
        .bind(session.redirect_url.as_deref())
        .bind(&session.idempotency_key)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<PaymentSession>, StoreError> {
        let sql = format!("SELECT {} FROM payment_sessions WHERE id = $1", SESSION_COLUMNS);
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        row.map(PaymentSession::try_from).transpose()
    }

    async fn sessions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<PaymentSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM payment_sessions WHERE booking_id = $1 ORDER BY created_at",
            SESSION_COLUMNS
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        rows.into_iter().map(PaymentSession::try_from).collect()
    }

    async fn set_session_status(
        &self,
        id: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE payment_sessions SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment session {}", id)));
        }
        Ok(())
    }

    async fn confirmed_ended_before(&self, day: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE status = 'CONFIRMED' AND end_date < $1 ORDER BY end_date",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(day)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        bookings(rows)
    }

    async fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE status = 'HELD' AND hold_expires_at <= $1 ORDER BY hold_expires_at",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        bookings(rows)
    }
}
