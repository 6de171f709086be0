//! Boot-time recovery sweep.
//!
//! The reserve protocol accepts a crash window between a successful remote
//! debit and the local commit. The sweep closes it: every slot still in
//! `hold` is resolved against the accounting ledger's authoritative
//! transaction status, to `booked` when the ledger has the debit and back to
//! `open` when it does not. The daemon runs this to completion before the
//! router binds, so after boot no hold survives.

use std::collections::HashMap;
use std::time::Duration;

use admgr_accounting::AccountingClient;
use admgr_db::{self as db, SlotRow, SlotUpdate};
use admgr_schemas::{Result, SlotKey, SlotStatus};
use sqlx::PgPool;
use tracing::{error, info, warn};

const SWEEP_ATTEMPTS: u32 = 10;
const SWEEP_RETRY_DELAY: Duration = Duration::from_secs(10);

/// What a single sweep pass changed. A second pass over unchanged state
/// reports all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Holds whose txnid the ledger acknowledged: committed to `booked`.
    pub resolved_booked: u64,
    /// Holds released back to `open` (txnid unacknowledged, or no
    /// transaction record at all).
    pub released_open: u64,
    /// Transaction rows removed from `open` slots (interrupted hold
    /// acquisitions).
    pub orphans_purged: u64,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        *self == SweepReport::default()
    }
}

fn force_open(slot: &SlotRow) -> SlotUpdate {
    SlotUpdate {
        date: slot.date,
        position: slot.position,
        cost: slot.cost,
        status: SlotStatus::Open,
        booked_date: None,
        booked_by: None,
    }
}

/// One sweep pass. Idempotent: re-running against the state it produced
/// changes nothing.
pub async fn sweep_once(pool: &PgPool, accounting: &AccountingClient) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let holds = db::search_slots_by_status(pool, SlotStatus::Hold, true).await?;

    if !holds.is_empty() {
        let mut staged: Vec<SlotUpdate> = Vec::new();
        let mut pending: HashMap<String, Vec<SlotRow>> = HashMap::new();

        for slot in holds {
            match &slot.transaction {
                // A hold without its transaction record cannot have been
                // debited — the txnid was never durably minted for it.
                None => {
                    staged.push(force_open(&slot));
                    report.released_open += 1;
                }
                Some(txn) => pending.entry(txn.txnid.clone()).or_default().push(slot),
            }
        }

        if !pending.is_empty() {
            let txnids: Vec<String> = pending.keys().cloned().collect();
            let records = accounting.status(&txnids).await?;

            for record in records {
                if let Some(slots) = pending.remove(&record.txnid) {
                    for slot in slots {
                        staged.push(SlotUpdate {
                            date: slot.date,
                            position: slot.position,
                            cost: slot.cost,
                            status: SlotStatus::Booked,
                            booked_date: Some(record.created),
                            booked_by: Some(record.uid.clone()),
                        });
                        report.resolved_booked += 1;
                    }
                }
            }

            // Whatever accounting did not acknowledge was never committed:
            // compensate locally. The transaction rows go first so every
            // intermediate crash state stays sweepable, and so the
            // mutual-exclusion gate is released for future reserves.
            let mut release_keys: Vec<SlotKey> = Vec::new();
            for (txnid, slots) in pending {
                warn!(
                    %txnid,
                    slots = slots.len(),
                    "txn not acknowledged by accounting, releasing holds"
                );
                for slot in slots {
                    release_keys.push(slot.key());
                    staged.push(force_open(&slot));
                    report.released_open += 1;
                }
            }
            db::delete_transactions(pool, &release_keys).await?;
        }

        db::update_slots(pool, &staged).await?;
    }

    report.orphans_purged = db::delete_orphan_transactions(pool).await?;
    Ok(report)
}

/// Run the sweep with the boot retry policy. Exhaustion is an error the
/// daemon must treat as fatal — serving with unresolved holds would violate
/// the post-boot guarantee.
pub async fn run_recovery_sweep(
    pool: &PgPool,
    accounting: &AccountingClient,
) -> Result<SweepReport> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sweep_once(pool, accounting).await {
            Ok(report) => {
                info!(
                    booked = report.resolved_booked,
                    released = report.released_open,
                    orphans = report.orphans_purged,
                    "recovery sweep complete"
                );
                return Ok(report);
            }
            Err(e) if attempt >= SWEEP_ATTEMPTS => {
                error!(attempt, error = %e, "recovery sweep failed, giving up");
                return Err(e);
            }
            Err(e) => {
                warn!(attempt, error = %e, "recovery sweep failed, retrying");
                tokio::time::sleep(SWEEP_RETRY_DELAY).await;
            }
        }
    }
}
