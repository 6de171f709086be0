//! Slot Store: the transactional persistence layer for slots and their
//! coordination (transaction) records.
//!
//! The store is deliberately thin — business rules live in `admgr-core`.
//! Every multi-row operation runs inside a single database transaction and
//! either fully applies or fully rolls back. Conditional transitions take a
//! row-level lock (`SELECT … FOR UPDATE`) before mutating, which is what
//! serializes concurrent writers on the same `(date, position)`.

use admgr_schemas::{Error, Result, SlotKey, SlotStatus};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

/// Connection retry budget: transient network errors are retried once per
/// second for a minute; authentication failures abort immediately.
const CONNECT_ATTEMPTS: u32 = 60;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Connection / migrations
// ---------------------------------------------------------------------------

/// Connect to Postgres, retrying transient failures.
pub async fn connect(url: &str) -> Result<PgPool> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match PgPoolOptions::new().max_connections(10).connect(url).await {
            Ok(pool) => {
                info!("database connection established");
                return Ok(pool);
            }
            Err(e) if is_auth_error(&e) => {
                return Err(Error::internal(format!(
                    "database authentication failed: {e}"
                )));
            }
            Err(e) if attempt >= CONNECT_ATTEMPTS => {
                return Err(Error::internal(format!(
                    "database unreachable after {attempt} attempts: {e}"
                )));
            }
            Err(e) => {
                warn!(attempt, error = %e, "database not reachable, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

/// Run embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::internal(format!("db migrate failed: {e}")))?;
    Ok(())
}

/// Authentication/authorization SQLSTATEs are class 28; retrying those only
/// delays the inevitable fatal.
fn is_auth_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|c| c.starts_with("28"))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn internal(e: sqlx::Error) -> Error {
    Error::internal(format!("database error: {e}"))
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SlotRow {
    pub date: NaiveDate,
    pub position: i32,
    pub cost: f64,
    pub status: SlotStatus,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub booked_date: Option<DateTime<Utc>>,
    pub booked_by: Option<String>,
    /// Present only when the search asked for the transaction preload and a
    /// coordination record exists for this slot.
    pub transaction: Option<TransactionRow>,
}

impl SlotRow {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.date, self.position)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub txnid: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSlot {
    pub date: NaiveDate,
    pub position: i32,
    pub cost: f64,
    pub status: SlotStatus,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub position: i32,
    pub txnid: String,
}

/// Full overwrite of a slot's mutable columns. Primary-key columns are never
/// touched; `modified` is stamped by the store.
#[derive(Debug, Clone)]
pub struct SlotUpdate {
    pub date: NaiveDate,
    pub position: i32,
    pub cost: f64,
    pub status: SlotStatus,
    pub booked_date: Option<DateTime<Utc>>,
    pub booked_by: Option<String>,
}

impl SlotUpdate {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.date, self.position)
    }
}

/// Filter for [`search_slots_in_range`].
#[derive(Debug, Clone)]
pub struct SlotSearch {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub position: Option<(i32, i32)>,
    pub status: Option<SlotStatus>,
    pub booked_by: Option<String>,
    /// Restrict to slots in `booked` or `hold` status (delete precheck).
    pub booked_or_hold: bool,
    pub preload_transaction: bool,
}

impl SlotSearch {
    pub fn range(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            position: None,
            status: None,
            booked_by: None,
            booked_or_hold: false,
            preload_transaction: false,
        }
    }

    pub fn with_position(mut self, lo: i32, hi: i32) -> Self {
        self.position = Some((lo, hi));
        self
    }

    pub fn with_status(mut self, status: SlotStatus) -> Self {
        self.status = Some(status);
        self
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Insert a batch of slots. All rows are inserted inside one transaction:
/// either all of them persist or none do. A primary-key collision fails the
/// batch with `DuplicateResource`.
pub async fn create_slots(pool: &PgPool, rows: &[NewSlot]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.map_err(internal)?;
    for r in rows {
        sqlx::query(
            r#"
            insert into slots (date, position, cost, status)
            values ($1, $2, $3, $4)
            "#,
        )
        .bind(r.date)
        .bind(r.position)
        .bind(r.cost)
        .bind(r.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::duplicate_resource(format!(
                    "slot already exists at ({}, {})",
                    r.date, r.position
                ))
            } else {
                internal(e)
            }
        })?;
    }
    tx.commit().await.map_err(internal)?;
    Ok(rows.len() as u64)
}

/// Insert a batch of transaction records. This is the reservation
/// mutual-exclusion gate: the `(date, position)` primary key guarantees that
/// at most one concurrent batch can insert a record for any given slot, and
/// a collision fails the whole batch with `DuplicateResource`.
pub async fn create_transactions(pool: &PgPool, rows: &[NewTransaction]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await.map_err(internal)?;
    for r in rows {
        sqlx::query(
            r#"
            insert into transactions (date, position, txnid)
            values ($1, $2, $3)
            "#,
        )
        .bind(r.date)
        .bind(r.position)
        .bind(&r.txnid)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::duplicate_resource(format!(
                    "transaction already exists at ({}, {})",
                    r.date, r.position
                ))
            } else {
                internal(e)
            }
        })?;
    }
    tx.commit().await.map_err(internal)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Overwrite the mutable columns of each listed slot under a row lock.
/// A missing row fails the whole batch with `ActionForbidden`.
pub async fn update_slots(pool: &PgPool, updates: &[SlotUpdate]) -> Result<u64> {
    if updates.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.map_err(internal)?;
    for u in updates {
        let locked = sqlx::query(
            r#"
            select position from slots
            where date = $1 and position = $2
            for update
            "#,
        )
        .bind(u.date)
        .bind(u.position)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?;

        if locked.is_none() {
            return Err(Error::action_forbidden(format!(
                "slot {} does not exist",
                u.key()
            )));
        }

        sqlx::query(
            r#"
            update slots
               set cost        = $3,
                   status      = $4,
                   booked_date = $5,
                   booked_by   = $6,
                   modified    = now()
             where date = $1 and position = $2
            "#,
        )
        .bind(u.date)
        .bind(u.position)
        .bind(u.cost)
        .bind(u.status.as_str())
        .bind(u.booked_date)
        .bind(u.booked_by.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    }
    tx.commit().await.map_err(internal)?;
    Ok(updates.len() as u64)
}

/// Conditional status transition: each slot is locked with the predicate
/// `status = expected`; a predicate miss fails the whole batch with
/// `ActionForbidden` and nothing is applied.
pub async fn update_slots_status(
    pool: &PgPool,
    keys: &[SlotKey],
    expected: SlotStatus,
    new: SlotStatus,
) -> Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.map_err(internal)?;
    for k in keys {
        let locked = sqlx::query(
            r#"
            select position from slots
            where date = $1 and position = $2 and status = $3
            for update
            "#,
        )
        .bind(k.date)
        .bind(k.position)
        .bind(expected.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?;

        if locked.is_none() {
            return Err(Error::action_forbidden(format!(
                "slot {k} is not {expected}"
            )));
        }

        sqlx::query(
            r#"
            update slots
               set status   = $3,
                   modified = now()
             where date = $1 and position = $2
            "#,
        )
        .bind(k.date)
        .bind(k.position)
        .bind(new.as_str())
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    }
    tx.commit().await.map_err(internal)?;
    Ok(keys.len() as u64)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

fn slot_columns(preload: bool) -> String {
    let mut cols = String::from(
        "s.date, s.position, s.cost, s.status, s.created, s.modified, s.booked_date, s.booked_by",
    );
    if preload {
        cols.push_str(", t.txnid as txn_txnid, t.created as txn_created");
    }
    cols
}

fn map_slot_row(row: &PgRow, preload: bool) -> Result<SlotRow> {
    let status: String = row.try_get("status").map_err(internal)?;
    let status = SlotStatus::parse(&status)
        .map_err(|_| Error::internal(format!("unknown status in slots row: {status}")))?;

    let transaction = if preload {
        let txnid: Option<String> = row.try_get("txn_txnid").map_err(internal)?;
        match txnid {
            Some(txnid) => Some(TransactionRow {
                txnid,
                created: row.try_get("txn_created").map_err(internal)?,
            }),
            None => None,
        }
    } else {
        None
    };

    Ok(SlotRow {
        date: row.try_get("date").map_err(internal)?,
        position: row.try_get("position").map_err(internal)?,
        cost: row.try_get("cost").map_err(internal)?,
        status,
        created: row.try_get("created").map_err(internal)?,
        modified: row.try_get("modified").map_err(internal)?,
        booked_date: row.try_get("booked_date").map_err(internal)?,
        booked_by: row.try_get("booked_by").map_err(internal)?,
        transaction,
    })
}

/// Slots with `date ∈ [start, end]`, optionally narrowed by position range,
/// status, booker, or the booked-or-hold predicate. Results are ordered by
/// `(date, position)`.
pub async fn search_slots_in_range(pool: &PgPool, search: &SlotSearch) -> Result<Vec<SlotRow>> {
    let mut sql = format!(
        "select {} from slots s",
        slot_columns(search.preload_transaction)
    );
    if search.preload_transaction {
        sql.push_str(" left join transactions t on t.date = s.date and t.position = s.position");
    }
    sql.push_str(" where s.date between $1 and $2");

    let mut next_bind = 3;
    if search.position.is_some() {
        sql.push_str(&format!(
            " and s.position between ${} and ${}",
            next_bind,
            next_bind + 1
        ));
        next_bind += 2;
    }
    if search.status.is_some() {
        sql.push_str(&format!(" and s.status = ${next_bind}"));
        next_bind += 1;
    }
    if search.booked_by.is_some() {
        sql.push_str(&format!(" and s.booked_by = ${next_bind}"));
    }
    if search.booked_or_hold {
        sql.push_str(" and s.status in ('booked', 'hold')");
    }
    sql.push_str(" order by s.date asc, s.position asc");

    let mut query = sqlx::query(&sql).bind(search.start_date).bind(search.end_date);
    if let Some((lo, hi)) = search.position {
        query = query.bind(lo).bind(hi);
    }
    if let Some(status) = search.status {
        query = query.bind(status.as_str());
    }
    if let Some(uid) = &search.booked_by {
        query = query.bind(uid.as_str());
    }

    let rows = query.fetch_all(pool).await.map_err(internal)?;
    rows.iter()
        .map(|r| map_slot_row(r, search.preload_transaction))
        .collect()
}

/// All slots in a given status, regardless of date. The recovery sweep uses
/// this with the transaction preload.
pub async fn search_slots_by_status(
    pool: &PgPool,
    status: SlotStatus,
    preload_transaction: bool,
) -> Result<Vec<SlotRow>> {
    let mut sql = format!("select {} from slots s", slot_columns(preload_transaction));
    if preload_transaction {
        sql.push_str(" left join transactions t on t.date = s.date and t.position = s.position");
    }
    sql.push_str(" where s.status = $1 order by s.date asc, s.position asc");

    let rows = sqlx::query(&sql)
        .bind(status.as_str())
        .fetch_all(pool)
        .await
        .map_err(internal)?;
    rows.iter()
        .map(|r| map_slot_row(r, preload_transaction))
        .collect()
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Remove slots by primary key. The foreign key CASCADE removes any
/// dependent transaction rows. Returns the number of rows removed.
pub async fn delete_slots(pool: &PgPool, keys: &[SlotKey]) -> Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.map_err(internal)?;
    let mut removed = 0u64;
    for k in keys {
        let res = sqlx::query("delete from slots where date = $1 and position = $2")
            .bind(k.date)
            .bind(k.position)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        removed += res.rows_affected();
    }
    tx.commit().await.map_err(internal)?;
    Ok(removed)
}

/// Remove transaction records by primary key — the reserve compensation
/// path, releasing the mutual-exclusion gate.
pub async fn delete_transactions(pool: &PgPool, keys: &[SlotKey]) -> Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.map_err(internal)?;
    let mut removed = 0u64;
    for k in keys {
        let res = sqlx::query("delete from transactions where date = $1 and position = $2")
            .bind(k.date)
            .bind(k.position)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        removed += res.rows_affected();
    }
    tx.commit().await.map_err(internal)?;
    Ok(removed)
}

/// Remove transaction rows whose slot is `open`. Such rows can only result
/// from a crash between hold-insert and the hold flip; their txnid was never
/// sent to accounting, so releasing them is safe.
pub async fn delete_orphan_transactions(pool: &PgPool) -> Result<u64> {
    let res = sqlx::query(
        r#"
        delete from transactions t
        using slots s
        where s.date = t.date
          and s.position = t.position
          and s.status = 'open'
        "#,
    )
    .execute(pool)
    .await
    .map_err(internal)?;
    Ok(res.rows_affected())
}
