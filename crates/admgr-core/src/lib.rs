//! Reservation coordination for the ad-slot calendar.
//!
//! [`service::SlotService`] owns the slot lifecycle state machine and the
//! two-phase reserve protocol; [`sweeper`] is the boot-time reconciliation
//! pass that resolves every in-flight hold against the accounting ledger
//! before the daemon starts accepting writes.

pub mod service;
pub mod sweeper;

pub use service::{SlotQuery, SlotService, RESERVE_CONFLICT_MSG};
pub use sweeper::{run_recovery_sweep, sweep_once, SweepReport};
