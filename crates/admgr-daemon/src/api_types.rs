//! Response envelopes for the HTTP surface. Request shapes live in
//! `admgr-schemas` so the testkit and scenario tests share them.

use serde::{Deserialize, Serialize};

/// Every failure renders as this shape with the mapped status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Success envelope for mutating endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}
