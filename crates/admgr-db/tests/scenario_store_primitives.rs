//! Store primitive contracts: batch atomicity, conditional transitions,
//! range search filters, and cascade deletes.
//!
//! These tests talk to a real Postgres and skip when `ADMGR_DATABASE_URL`
//! is unset. Each works in its own date range so suites can share one
//! database.

use admgr_db::{
    self as db, NewSlot, NewTransaction, SlotSearch, SlotUpdate,
};
use admgr_schemas::{ErrorKind, SlotKey, SlotStatus};
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const ENV_DB_URL: &str = "ADMGR_DATABASE_URL";

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

async fn pool_or_skip(test: &str) -> anyhow::Result<Option<PgPool>> {
    let url = match std::env::var(ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP {test}: {ENV_DB_URL} not set");
            return Ok(None);
        }
    };
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await?;
    db::migrate(&pool).await?;
    Ok(Some(pool))
}

async fn clear(pool: &PgPool, start: NaiveDate, end: NaiveDate) -> anyhow::Result<()> {
    sqlx::query("delete from slots where date between $1 and $2")
        .bind(start)
        .bind(end)
        .execute(pool)
        .await?;
    Ok(())
}

fn open_slot(date: NaiveDate, position: i32) -> NewSlot {
    NewSlot {
        date,
        position,
        cost: 10.0,
        status: SlotStatus::Open,
    }
}

#[tokio::test]
async fn create_batch_is_all_or_nothing_on_pk_collision() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("create_batch_atomicity").await? else {
        return Ok(());
    };
    let date = d("2031-01-01");
    clear(&pool, date, date).await?;

    db::create_slots(&pool, &[open_slot(date, 1)]).await?;

    // Position 2 is new, position 1 collides: nothing from the batch may
    // persist.
    let err = db::create_slots(&pool, &[open_slot(date, 2), open_slot(date, 1)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateResource);

    let slots = db::search_slots_in_range(&pool, &SlotSearch::range(date, date)).await?;
    assert_eq!(slots.len(), 1, "collided batch must be fully rolled back");
    assert_eq!(slots[0].position, 1);

    Ok(())
}

#[tokio::test]
async fn transaction_insert_is_the_mutual_exclusion_gate() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("transaction_gate").await? else {
        return Ok(());
    };
    let date = d("2031-01-05");
    clear(&pool, date, date).await?;
    db::create_slots(&pool, &[open_slot(date, 1)]).await?;

    let txn = |txnid: &str| NewTransaction {
        date,
        position: 1,
        txnid: txnid.to_string(),
    };
    db::create_transactions(&pool, &[txn("txn-a")]).await?;
    db::update_slots_status(
        &pool,
        &[SlotKey::new(date, 1)],
        SlotStatus::Open,
        SlotStatus::Hold,
    )
    .await?;

    let err = db::create_transactions(&pool, &[txn("txn-b")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateResource);

    Ok(())
}

#[tokio::test]
async fn conditional_transition_rolls_back_on_predicate_miss() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("conditional_transition").await? else {
        return Ok(());
    };
    let date = d("2031-01-10");
    clear(&pool, date, date).await?;
    db::create_slots(&pool, &[open_slot(date, 1), open_slot(date, 2)]).await?;

    // Make position 2 booked so the open→hold predicate misses on it.
    db::update_slots(
        &pool,
        &[SlotUpdate {
            date,
            position: 2,
            cost: 10.0,
            status: SlotStatus::Booked,
            booked_date: Some(chrono::Utc::now()),
            booked_by: Some("alice".to_string()),
        }],
    )
    .await?;

    let keys = [SlotKey::new(date, 1), SlotKey::new(date, 2)];
    let err = db::update_slots_status(&pool, &keys, SlotStatus::Open, SlotStatus::Hold)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActionForbidden);

    // Position 1 was listed before the miss and must be untouched.
    let slots = db::search_slots_in_range(&pool, &SlotSearch::range(date, date)).await?;
    assert_eq!(slots[0].status, SlotStatus::Open);
    assert_eq!(slots[1].status, SlotStatus::Booked);

    Ok(())
}

#[tokio::test]
async fn update_slots_fails_whole_batch_on_missing_row() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("update_missing_row").await? else {
        return Ok(());
    };
    let date = d("2031-01-15");
    clear(&pool, date, date).await?;
    db::create_slots(&pool, &[open_slot(date, 1)]).await?;

    let update = |position: i32| SlotUpdate {
        date,
        position,
        cost: 99.0,
        status: SlotStatus::Open,
        booked_date: None,
        booked_by: None,
    };
    let err = db::update_slots(&pool, &[update(1), update(7)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ActionForbidden);

    let slots = db::search_slots_in_range(&pool, &SlotSearch::range(date, date)).await?;
    assert!(
        (slots[0].cost - 10.0).abs() < 1e-9,
        "batch with a missing row must be rolled back"
    );

    Ok(())
}

#[tokio::test]
async fn search_filters_compose() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("search_filters").await? else {
        return Ok(());
    };
    let (start, end) = (d("2031-02-01"), d("2031-02-02"));
    clear(&pool, start, end).await?;
    db::create_slots(
        &pool,
        &[
            open_slot(start, 1),
            open_slot(start, 2),
            open_slot(start, 3),
            open_slot(end, 1),
        ],
    )
    .await?;
    db::update_slots(
        &pool,
        &[SlotUpdate {
            date: start,
            position: 2,
            cost: 10.0,
            status: SlotStatus::Booked,
            booked_date: Some(chrono::Utc::now()),
            booked_by: Some("carol".to_string()),
        }],
    )
    .await?;

    let all = db::search_slots_in_range(&pool, &SlotSearch::range(start, end)).await?;
    assert_eq!(all.len(), 4);
    // date-major, position-minor ordering
    assert_eq!(
        all.iter().map(|s| (s.date, s.position)).collect::<Vec<_>>(),
        vec![(start, 1), (start, 2), (start, 3), (end, 1)]
    );

    let narrowed = db::search_slots_in_range(
        &pool,
        &SlotSearch::range(start, end).with_position(2, 3),
    )
    .await?;
    assert_eq!(narrowed.len(), 2);

    let open_only = db::search_slots_in_range(
        &pool,
        &SlotSearch::range(start, end).with_status(SlotStatus::Open),
    )
    .await?;
    assert_eq!(open_only.len(), 3);

    let mut by_uid = SlotSearch::range(start, end);
    by_uid.booked_by = Some("carol".to_string());
    let carols = db::search_slots_in_range(&pool, &by_uid).await?;
    assert_eq!(carols.len(), 1);
    assert_eq!(carols[0].position, 2);

    let mut booked_or_hold = SlotSearch::range(start, end);
    booked_or_hold.booked_or_hold = true;
    let blocked = db::search_slots_in_range(&pool, &booked_or_hold).await?;
    assert_eq!(blocked.len(), 1);

    Ok(())
}

#[tokio::test]
async fn preload_joins_the_transaction_row() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("preload_transaction").await? else {
        return Ok(());
    };
    let date = d("2031-02-10");
    clear(&pool, date, date).await?;
    db::create_slots(&pool, &[open_slot(date, 1), open_slot(date, 2)]).await?;
    db::create_transactions(
        &pool,
        &[NewTransaction {
            date,
            position: 1,
            txnid: "txn-preload".to_string(),
        }],
    )
    .await?;
    db::update_slots_status(
        &pool,
        &[SlotKey::new(date, 1)],
        SlotStatus::Open,
        SlotStatus::Hold,
    )
    .await?;

    let mut search = SlotSearch::range(date, date);
    search.preload_transaction = true;
    let slots = db::search_slots_in_range(&pool, &search).await?;
    assert_eq!(
        slots[0].transaction.as_ref().map(|t| t.txnid.as_str()),
        Some("txn-preload")
    );
    assert!(slots[1].transaction.is_none());

    Ok(())
}

#[tokio::test]
async fn deleting_a_slot_cascades_to_its_transaction() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("delete_cascade").await? else {
        return Ok(());
    };
    let date = d("2031-03-01");
    clear(&pool, date, date).await?;
    db::create_slots(&pool, &[open_slot(date, 1)]).await?;
    db::create_transactions(
        &pool,
        &[NewTransaction {
            date,
            position: 1,
            txnid: "txn-cascade".to_string(),
        }],
    )
    .await?;

    let removed = db::delete_slots(&pool, &[SlotKey::new(date, 1)]).await?;
    assert_eq!(removed, 1);

    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from transactions where date = $1 and position = $2",
    )
    .bind(date)
    .bind(1)
    .fetch_one(&pool)
    .await?;
    assert_eq!(n, 0, "CASCADE must remove the dependent transaction");

    Ok(())
}

#[tokio::test]
async fn orphan_purge_only_touches_open_slots() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip("orphan_purge").await? else {
        return Ok(());
    };
    let date = d("2031-03-10");
    clear(&pool, date, date).await?;
    db::create_slots(&pool, &[open_slot(date, 1), open_slot(date, 2)]).await?;
    db::create_transactions(
        &pool,
        &[
            NewTransaction {
                date,
                position: 1,
                txnid: "txn-open".to_string(),
            },
            NewTransaction {
                date,
                position: 2,
                txnid: "txn-held".to_string(),
            },
        ],
    )
    .await?;
    db::update_slots_status(
        &pool,
        &[SlotKey::new(date, 2)],
        SlotStatus::Open,
        SlotStatus::Hold,
    )
    .await?;

    db::delete_orphan_transactions(&pool).await?;

    let mut search = SlotSearch::range(date, date);
    search.preload_transaction = true;
    let slots = db::search_slots_in_range(&pool, &search).await?;
    assert!(
        slots[0].transaction.is_none(),
        "txn on the open slot is an orphan"
    );
    assert!(
        slots[1].transaction.is_some(),
        "txn on the held slot is live"
    );

    Ok(())
}
