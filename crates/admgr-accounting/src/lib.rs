//! HTTP client for the external accounting service.
//!
//! The coordinator treats accounting as an oracle: `debit` either commits
//! the ledger entry or the whole reservation is compensated, and `status`
//! is the authoritative answer used by the boot-time recovery sweep. Any
//! transport error or non-200 maps to `DependentServiceRequestFailed` — the
//! caller never sees transport detail, only the kind.

use admgr_schemas::{Error, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod models;

pub use models::{DebitMetadata, DebitRequest, DebitSlot, TxnStatusRecord};

/// Accounting calls are slow on the remote side; the ledger commit is worth
/// waiting for.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Boot-time availability gate.
const HEALTH_ATTEMPTS: u32 = 10;
const HEALTH_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AccountingClient {
    base_url: String,
    health_path: String,
    source: String,
    http: reqwest::Client,
}

impl AccountingClient {
    pub fn new(
        base_url: impl Into<String>,
        health_path: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(format!("failed to build accounting http client: {e}")))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            base_url,
            health_path: health_path.into().trim_start_matches('/').to_string(),
            source: source.into(),
            http,
        })
    }

    /// Single probe of the health endpoint.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.health_path);
        let res = self.http.get(&url).send().await.map_err(|e| {
            Error::dependent_service_request_failed(format!(
                "accounting health check failed: {e}"
            ))
        })?;
        if res.status() != StatusCode::OK {
            return Err(Error::dependent_service_request_failed(format!(
                "accounting health check returned {}",
                res.status()
            )));
        }
        Ok(())
    }

    /// Boot gate: poll the health endpoint until it answers 200 or the retry
    /// budget is exhausted. Exhaustion is fatal to the caller.
    pub async fn ensure_available(&self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.health_check().await {
                Ok(()) => {
                    info!(base_url = %self.base_url, "accounting service is active");
                    return Ok(());
                }
                Err(e) if attempt >= HEALTH_ATTEMPTS => {
                    error!(attempt, error = %e, "accounting service unavailable, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "accounting service not ready, retrying");
                    tokio::time::sleep(HEALTH_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Debit the caller's account for the whole batch. Expects HTTP 200;
    /// everything else is a failed debit.
    pub async fn debit(&self, slots: &[DebitSlot], uid: &str, txnid: &str) -> Result<()> {
        let amount: f64 = slots.iter().map(|s| s.cost).sum();
        let body = DebitRequest {
            source: self.source.clone(),
            uid: uid.to_string(),
            amount,
            txnid: txnid.to_string(),
            metadata: DebitMetadata {
                slots: slots.to_vec(),
            },
        };

        debug!(txnid, uid, amount, slots = slots.len(), "initiating debit");
        let res = self
            .http
            .post(format!("{}/debit", self.base_url))
            .json(&body)
            .send()
            .await;

        match res {
            Ok(res) if res.status() == StatusCode::OK => Ok(()),
            Ok(res) => {
                error!(txnid, status = %res.status(), "debit refused by accounting");
                Err(Error::dependent_service_request_failed(
                    "debit transaction failed",
                ))
            }
            Err(e) => {
                error!(txnid, error = %e, "debit request failed");
                Err(Error::dependent_service_request_failed(
                    "debit transaction failed",
                ))
            }
        }
    }

    /// Resolve which of the supplied txnids the ledger has committed. A
    /// txnid absent from the response was never committed by accounting.
    pub async fn status(&self, txnids: &[String]) -> Result<Vec<TxnStatusRecord>> {
        debug!(txnids = txnids.len(), "querying transaction status");
        let res = self
            .http
            .post(format!("{}/status", self.base_url))
            .json(&txnids)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "status request failed");
                Error::dependent_service_request_failed("transaction status query failed")
            })?;

        if res.status() != StatusCode::OK {
            error!(status = %res.status(), "status query refused by accounting");
            return Err(Error::dependent_service_request_failed(
                "transaction status query failed",
            ));
        }

        res.json::<Vec<TxnStatusRecord>>().await.map_err(|e| {
            error!(error = %e, "status response malformed");
            Error::dependent_service_request_failed("transaction status response malformed")
        })
    }
}
