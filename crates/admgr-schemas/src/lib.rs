//! Shared types for the admgr workspace: the slot status alphabet, the
//! `(date, position)` key, the HTTP request/response shapes, and the error
//! taxonomy ([`Error`] / [`ErrorKind`]).
//!
//! Dates are ISO `YYYY-MM-DD` everywhere on the wire; `chrono::NaiveDate`
//! serializes exactly that way, so no custom date wrapper is needed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

mod error;
mod validate;

pub use error::{Error, ErrorKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Slot status
// ---------------------------------------------------------------------------

/// Lifecycle status of a slot.
///
/// `hold` denotes "reservation in progress, awaiting accounting
/// confirmation" — it exists only between hold acquisition and commit, and
/// the recovery sweep clears it at every boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Open,
    Closed,
    Hold,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Open => "open",
            SlotStatus::Closed => "closed",
            SlotStatus::Hold => "hold",
            SlotStatus::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(SlotStatus::Open),
            "closed" => Ok(SlotStatus::Closed),
            "hold" => Ok(SlotStatus::Hold),
            "booked" => Ok(SlotStatus::Booked),
            other => Err(Error::decode_failure(format!(
                "invalid slot status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Slot key
// ---------------------------------------------------------------------------

/// The composite identity of a slot: one calendar day plus a 1-based rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub position: i32,
}

impl SlotKey {
    pub fn new(date: NaiveDate, position: i32) -> Self {
        Self { date, position }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.date, self.position)
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// One block of the POST / PATCH `/adslots` body: a date range crossed with
/// a position range, all carrying the same cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRangeRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Two-element inclusive range `[lo, hi]`, positions ≥ 1.
    pub position: Vec<i32>,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SlotStatus>,
}

/// One block of the DELETE `/adslots` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSlotRangeRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Two-element inclusive range `[lo, hi]`.
    pub position: Vec<i32>,
}

/// One element of the PATCH `/adslots/reserve` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveSlotRequest {
    pub date: NaiveDate,
    pub position: i32,
}

impl ReserveSlotRequest {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.date, self.position)
    }
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// One date group of the GET `/adslots` response.
///
/// Slots within a group are not guaranteed in position order at the
/// interface; consumers must treat the array as a set unless they sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateGroup {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<SlotDescriptor>,
}

/// A single slot as rendered to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDescriptor {
    pub position: i32,
    pub cost: f64,
    pub status: SlotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_date: Option<DateTime<Utc>>,
}
