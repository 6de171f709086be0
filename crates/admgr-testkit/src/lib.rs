//! Test support for the admgr workspace: database fixtures and the
//! in-process accounting stub server used by the scenario tests.
//!
//! DB-backed scenarios share one Postgres database; each works inside its
//! own date range and calls [`clear_date_range`] first, so suites can run
//! against the same instance without stepping on each other.

use admgr_db::{self as db, NewSlot};
use admgr_schemas::SlotStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod stub;

pub use admgr_config::ENV_DB_URL;
pub use stub::StubAccounting;

/// Connect + migrate, or `None` when `ADMGR_DATABASE_URL` is unset so the
/// caller can skip the scenario.
pub async fn db_pool_or_skip(test: &str) -> Result<Option<PgPool>> {
    let url = match std::env::var(ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP {test}: {ENV_DB_URL} not set");
            return Ok(None);
        }
    };
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .context("connect to test database")?;
    db::migrate(&pool).await?;
    Ok(Some(pool))
}

/// Remove every slot (and, via CASCADE, every transaction) in
/// `[start, end]`.
pub async fn clear_date_range(pool: &PgPool, start: NaiveDate, end: NaiveDate) -> Result<()> {
    sqlx::query("delete from slots where date between $1 and $2")
        .bind(start)
        .bind(end)
        .execute(pool)
        .await
        .context("clear date range")?;
    Ok(())
}

/// Seed positions `1..=count` on `date`, all `open`, all at `cost`.
pub async fn seed_open_slots(pool: &PgPool, date: NaiveDate, count: i32, cost: f64) -> Result<()> {
    let rows: Vec<NewSlot> = (1..=count)
        .map(|position| NewSlot {
            date,
            position,
            cost,
            status: SlotStatus::Open,
        })
        .collect();
    db::create_slots(pool, &rows).await?;
    Ok(())
}

/// A slot fixture in an arbitrary lifecycle state, optionally with its
/// coordination record.
#[derive(Debug, Clone)]
pub struct SeedSlot {
    pub date: NaiveDate,
    pub position: i32,
    pub cost: f64,
    pub status: SlotStatus,
    pub booked_by: Option<String>,
    pub booked_date: Option<DateTime<Utc>>,
    pub txnid: Option<String>,
}

impl SeedSlot {
    pub fn new(date: NaiveDate, position: i32, status: SlotStatus) -> Self {
        Self {
            date,
            position,
            cost: 10.0,
            status,
            booked_by: None,
            booked_date: None,
            txnid: None,
        }
    }

    pub fn booked_by(mut self, uid: &str) -> Self {
        self.booked_by = Some(uid.to_string());
        self
    }

    pub fn booked_date(mut self, at: DateTime<Utc>) -> Self {
        self.booked_date = Some(at);
        self
    }

    pub fn txnid(mut self, txnid: &str) -> Self {
        self.txnid = Some(txnid.to_string());
        self
    }
}

/// Insert a fixture slot directly, bypassing the coordinator's rules.
pub async fn seed_slot(pool: &PgPool, seed: &SeedSlot) -> Result<()> {
    sqlx::query(
        r#"
        insert into slots (date, position, cost, status, booked_date, booked_by)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(seed.date)
    .bind(seed.position)
    .bind(seed.cost)
    .bind(seed.status.as_str())
    .bind(seed.booked_date)
    .bind(seed.booked_by.as_deref())
    .execute(pool)
    .await
    .context("seed slot")?;

    if let Some(txnid) = &seed.txnid {
        sqlx::query("insert into transactions (date, position, txnid) values ($1, $2, $3)")
            .bind(seed.date)
            .bind(seed.position)
            .bind(txnid)
            .execute(pool)
            .await
            .context("seed transaction")?;
    }
    Ok(())
}

/// Count transaction rows for a single slot key.
pub async fn count_transactions(pool: &PgPool, date: NaiveDate, position: i32) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from transactions where date = $1 and position = $2",
    )
    .bind(date)
    .bind(position)
    .fetch_one(pool)
    .await
    .context("count transactions")?;
    Ok(n)
}
