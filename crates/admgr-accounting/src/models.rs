//! Wire bodies for the accounting protocol. The testkit stub server reuses
//! these so request/response shapes cannot drift between client and tests.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Outbound `POST /debit` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitRequest {
    pub source: String,
    pub uid: String,
    /// Sum of the per-slot costs.
    pub amount: f64,
    pub txnid: String,
    pub metadata: DebitMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitMetadata {
    pub slots: Vec<DebitSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitSlot {
    pub date: NaiveDate,
    pub position: i32,
    pub cost: f64,
}

/// One acknowledged transaction in the `POST /status` response. Txnids the
/// ledger does not know are simply absent from the response array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnStatusRecord {
    pub txnid: String,
    pub uid: String,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DebitMetadata>,
}
