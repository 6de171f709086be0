//! In-process scenario tests for the /adslots create, patch, and list
//! endpoints. The router is driven via `tower::ServiceExt::oneshot` — no
//! TCP socket — but the store underneath is a real Postgres, so these skip
//! when `ADMGR_DATABASE_URL` is unset.

use std::sync::Arc;

use admgr_core::SlotService;
use admgr_daemon::{routes, state};
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt; // oneshot

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

async fn make_state(pool: sqlx::PgPool) -> anyhow::Result<Arc<state::AppState>> {
    let stub = admgr_testkit::StubAccounting::spawn().await?;
    let service = SlotService::new(pool, stub.client("admgr-test")?);
    Ok(Arc::new(state::AppState::new(service)))
}

async fn call(
    st: Arc<state::AppState>,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let body = match body {
        Some(v) => axum::body::Body::from(v.to_string()),
        None => axum::body::Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    let resp = routes::build_router(st)
        .oneshot(req)
        .await
        .expect("oneshot failed");
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not valid JSON")
    };
    (status, value)
}

#[tokio::test]
async fn create_then_list_groups_by_date() -> anyhow::Result<()> {
    let Some(pool) = admgr_testkit::db_pool_or_skip("create_and_list").await? else {
        return Ok(());
    };
    admgr_testkit::clear_date_range(&pool, d("2033-01-01"), d("2033-01-02")).await?;
    let st = make_state(pool).await?;

    let (status, body) = call(
        Arc::clone(&st),
        "POST",
        "/adslots",
        Some(json!([{
            "start_date": "2033-01-01",
            "end_date": "2033-01-02",
            "position": [1, 3],
            "cost": 10.00,
            "status": "open"
        }])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = call(
        Arc::clone(&st),
        "GET",
        "/adslots?start_date=2033-01-01&end_date=2033-01-02",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let groups = body.as_array().expect("grouped response");
    assert_eq!(groups.len(), 2, "one group per date: {body}");
    for group in groups {
        let slots = group["slots"].as_array().unwrap();
        let mut positions: Vec<i64> = slots
            .iter()
            .map(|s| s["position"].as_i64().unwrap())
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(slots.iter().all(|s| s["status"] == "open"));
    }

    Ok(())
}

#[tokio::test]
async fn create_with_gap_is_rejected_naming_the_missing_position() -> anyhow::Result<()> {
    let Some(pool) = admgr_testkit::db_pool_or_skip("create_contiguity").await? else {
        return Ok(());
    };
    let date = d("2033-01-10");
    admgr_testkit::clear_date_range(&pool, date, date).await?;
    admgr_testkit::seed_open_slots(&pool, date, 1, 5.0).await?;
    let st = make_state(pool).await?;

    let (status, body) = call(
        st,
        "POST",
        "/adslots",
        Some(json!([{
            "start_date": "2033-01-10",
            "end_date": "2033-01-10",
            "position": [3, 3],
            "cost": 5.00,
            "status": "open"
        }])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let msg = body["error"].as_str().unwrap();
    assert!(msg.contains('2'), "error must name position 2: {msg}");

    Ok(())
}

#[tokio::test]
async fn duplicate_create_conflicts() -> anyhow::Result<()> {
    let Some(pool) = admgr_testkit::db_pool_or_skip("create_duplicate").await? else {
        return Ok(());
    };
    let date = d("2033-01-15");
    admgr_testkit::clear_date_range(&pool, date, date).await?;
    admgr_testkit::seed_open_slots(&pool, date, 2, 5.0).await?;
    let st = make_state(pool).await?;

    let (status, body) = call(
        st,
        "POST",
        "/adslots",
        Some(json!([{
            "start_date": "2033-01-15",
            "end_date": "2033-01-15",
            "position": [2, 2],
            "cost": 5.00
        }])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    Ok(())
}

#[tokio::test]
async fn patch_updates_cost_and_reports_the_count() -> anyhow::Result<()> {
    let Some(pool) = admgr_testkit::db_pool_or_skip("patch_cost").await? else {
        return Ok(());
    };
    let date = d("2033-01-20");
    admgr_testkit::clear_date_range(&pool, date, date).await?;
    admgr_testkit::seed_open_slots(&pool, date, 3, 5.0).await?;
    let st = make_state(pool).await?;

    let (status, body) = call(
        Arc::clone(&st),
        "PATCH",
        "/adslots",
        Some(json!([{
            "start_date": "2033-01-20",
            "end_date": "2033-01-20",
            "position": [1, 3],
            "cost": 7.25
        }])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Total 3 records updated");

    let (_, listed) = call(
        st,
        "GET",
        "/adslots?start_date=2033-01-20&end_date=2033-01-20",
        None,
    )
    .await;
    let slots = listed[0]["slots"].as_array().unwrap();
    assert!(slots
        .iter()
        .all(|s| (s["cost"].as_f64().unwrap() - 7.25).abs() < 1e-9));

    Ok(())
}

#[tokio::test]
async fn patch_of_a_missing_slot_is_forbidden() -> anyhow::Result<()> {
    let Some(pool) = admgr_testkit::db_pool_or_skip("patch_missing").await? else {
        return Ok(());
    };
    let date = d("2033-01-25");
    admgr_testkit::clear_date_range(&pool, date, date).await?;
    admgr_testkit::seed_open_slots(&pool, date, 1, 5.0).await?;
    let st = make_state(pool).await?;

    let (status, _) = call(
        st,
        "PATCH",
        "/adslots",
        Some(json!([{
            "start_date": "2033-01-25",
            "end_date": "2033-01-25",
            "position": [1, 2],
            "cost": 9.0
        }])),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn get_requires_both_dates_and_a_sane_range() -> anyhow::Result<()> {
    let Some(pool) = admgr_testkit::db_pool_or_skip("get_validation").await? else {
        return Ok(());
    };
    let st = make_state(pool).await?;

    let (status, _) = call(Arc::clone(&st), "GET", "/adslots?start_date=2033-01-01", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        Arc::clone(&st),
        "GET",
        "/adslots?start_date=2033-01-02&end_date=2033-01-01",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());

    let (status, _) = call(st, "GET", "/health-check", None).await;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn malformed_body_is_a_decode_failure() -> anyhow::Result<()> {
    let Some(pool) = admgr_testkit::db_pool_or_skip("malformed_body").await? else {
        return Ok(());
    };
    let st = make_state(pool).await?;

    let req = Request::builder()
        .method("POST")
        .uri("/adslots")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let resp = routes::build_router(st).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid request body"));

    Ok(())
}
