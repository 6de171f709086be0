//! In-process accounting stub: a real axum server on an ephemeral port
//! implementing the debit/status/health wire contract, with scriptable
//! behavior and request capture. Scenario tests point an
//! [`AccountingClient`] at `base_url` exactly as production points at the
//! real service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use admgr_accounting::{AccountingClient, DebitRequest, TxnStatusRecord};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct StubState {
    debit_fail: Arc<AtomicBool>,
    debits: Arc<Mutex<Vec<DebitRequest>>>,
    records: Arc<Mutex<Vec<TxnStatusRecord>>>,
    status_queries: Arc<Mutex<Vec<Vec<String>>>>,
}

pub struct StubAccounting {
    pub base_url: String,
    state: StubState,
}

impl StubAccounting {
    /// Bind to an ephemeral localhost port and start serving.
    pub async fn spawn() -> Result<Self> {
        let state = StubState::default();
        let app = Router::new()
            .route("/ping", get(|| async { StatusCode::OK }))
            .route("/debit", post(debit))
            .route("/status", post(status))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind stub accounting listener")?;
        let addr = listener.local_addr().context("stub local addr")?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
        })
    }

    /// A client wired to this stub, as the daemon would build one.
    pub fn client(&self, source: &str) -> Result<AccountingClient> {
        AccountingClient::new(&self.base_url, "ping", source).map_err(anyhow::Error::new)
    }

    /// Make subsequent debits answer 503.
    pub fn fail_debits(&self) {
        self.state.debit_fail.store(true, Ordering::SeqCst);
    }

    pub fn restore_debits(&self) {
        self.state.debit_fail.store(false, Ordering::SeqCst);
    }

    /// Register a committed transaction the `/status` endpoint will
    /// acknowledge.
    pub fn acknowledge(&self, record: TxnStatusRecord) {
        self.state.records.lock().unwrap().push(record);
    }

    /// Every debit body received so far.
    pub fn debits(&self) -> Vec<DebitRequest> {
        self.state.debits.lock().unwrap().clone()
    }

    /// Every `/status` query body received so far.
    pub fn status_queries(&self) -> Vec<Vec<String>> {
        self.state.status_queries.lock().unwrap().clone()
    }
}

async fn debit(State(st): State<StubState>, Json(body): Json<DebitRequest>) -> StatusCode {
    st.debits.lock().unwrap().push(body);
    if st.debit_fail.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn status(
    State(st): State<StubState>,
    Json(txnids): Json<Vec<String>>,
) -> Json<Vec<TxnStatusRecord>> {
    st.status_queries.lock().unwrap().push(txnids.clone());
    let known = st.records.lock().unwrap();
    Json(
        known
            .iter()
            .filter(|r| txnids.contains(&r.txnid))
            .cloned()
            .collect(),
    )
}
