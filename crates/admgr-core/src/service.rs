//! The Reservation Coordinator.
//!
//! Stateless per request: all shared state is the database, and the only
//! cross-request mutual exclusion is the primary key on the transactions
//! table plus row locks inside the store. No in-process lock is involved —
//! the uniqueness constraint survives crashes, a mutex would not.

use std::collections::{HashMap, HashSet};

use admgr_accounting::{AccountingClient, DebitSlot};
use admgr_db::{self as db, NewSlot, NewTransaction, SlotRow, SlotSearch, SlotUpdate};
use admgr_schemas::{
    DateGroup, DeleteSlotRangeRequest, Error, ErrorKind, ReserveSlotRequest, Result,
    SlotDescriptor, SlotKey, SlotRangeRequest, SlotStatus,
};
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The message every losing contender of a reservation race sees.
pub const RESERVE_CONFLICT_MSG: &str =
    "Cannot reserve the slots, either they are already booked or it's on hold";

/// Commit retries after a successful debit. The hold is durable, so
/// exhaustion is settled by the recovery sweep rather than failing the
/// reservation.
const COMMIT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct SlotService {
    pool: PgPool,
    accounting: AccountingClient,
}

/// Read query for [`SlotService::get_slots`].
#[derive(Debug, Clone)]
pub struct SlotQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub position: Option<i32>,
    pub status: Option<SlotStatus>,
    pub uid: Option<String>,
}

impl SlotService {
    pub fn new(pool: PgPool, accounting: AccountingClient) -> Self {
        Self { pool, accounting }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create slot ranges. Positions on each date must stay a dense `1..N`
    /// prefix: a block starting above 1 requires the predecessor position to
    /// exist on every date of the block.
    pub async fn create_slots(&self, ranges: &[SlotRangeRequest]) -> Result<u64> {
        if ranges.is_empty() {
            return Err(Error::decode_failure("request body must not be empty"));
        }

        let mut staged: Vec<NewSlot> = Vec::new();
        for block in ranges {
            let (lo, hi) = block.validate()?;
            let status = block.status.unwrap_or(SlotStatus::Open);

            if lo > 1 {
                let anchors = db::search_slots_in_range(
                    &self.pool,
                    &SlotSearch::range(block.start_date, block.end_date)
                        .with_position(lo - 1, lo - 1),
                )
                .await?;
                let anchored: HashSet<NaiveDate> = anchors.iter().map(|s| s.date).collect();
                for date in dates_in(block.start_date, block.end_date) {
                    if !anchored.contains(&date) {
                        return Err(Error::decode_failure(format!(
                            "slots must be contiguous: position {} does not exist on {date}",
                            lo - 1
                        )));
                    }
                }
            }

            for date in dates_in(block.start_date, block.end_date) {
                for position in lo..=hi {
                    staged.push(NewSlot {
                        date,
                        position,
                        cost: block.cost,
                        status,
                    });
                }
            }
        }

        let created = db::create_slots(&self.pool, &staged).await?;
        info!(slots = created, "created slot ranges");
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Patch
    // -----------------------------------------------------------------------

    /// Update cost (and optionally status) over slot ranges. Every position
    /// in every block must refer to an existing slot, and only `open` or
    /// `closed` slots may be patched — booked and held slots belong to the
    /// reservation protocol.
    pub async fn patch_slots(&self, ranges: &[SlotRangeRequest]) -> Result<u64> {
        if ranges.is_empty() {
            return Err(Error::decode_failure("request body must not be empty"));
        }

        let mut staged: Vec<SlotUpdate> = Vec::new();
        for block in ranges {
            let (lo, hi) = block.validate()?;

            let existing = db::search_slots_in_range(
                &self.pool,
                &SlotSearch::range(block.start_date, block.end_date).with_position(lo, hi),
            )
            .await?;
            let by_key: HashMap<SlotKey, &SlotRow> =
                existing.iter().map(|s| (s.key(), s)).collect();

            for date in dates_in(block.start_date, block.end_date) {
                for position in lo..=hi {
                    let key = SlotKey::new(date, position);
                    let slot = by_key.get(&key).ok_or_else(|| {
                        Error::action_forbidden(format!("slot {key} does not exist"))
                    })?;
                    match slot.status {
                        SlotStatus::Open | SlotStatus::Closed => {}
                        other => {
                            return Err(Error::action_forbidden(format!(
                                "slot {key} is {other} and cannot be updated"
                            )));
                        }
                    }
                    staged.push(SlotUpdate {
                        date,
                        position,
                        cost: block.cost,
                        status: block.status.unwrap_or(slot.status),
                        booked_date: None,
                        booked_by: None,
                    });
                }
            }
        }

        let updated = db::update_slots(&self.pool, &staged).await?;
        info!(slots = updated, "patched slot ranges");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Delete slot ranges. Only rectangles consisting purely of `open` slots
    /// are deletable, and only from the tail of each date's sequence so no
    /// gap can form.
    pub async fn delete_slots(&self, ranges: &[DeleteSlotRangeRequest]) -> Result<u64> {
        if ranges.is_empty() {
            return Err(Error::decode_failure("request body must not be empty"));
        }

        let mut removed = 0u64;
        for block in ranges {
            let (lo, hi) = block.validate()?;

            let mut reserved = SlotSearch::range(block.start_date, block.end_date)
                .with_position(lo, hi);
            reserved.booked_or_hold = true;
            if let Some(blocking) = db::search_slots_in_range(&self.pool, &reserved)
                .await?
                .first()
            {
                return Err(Error::action_forbidden(format!(
                    "slot {} is {}; only open slots can be deleted",
                    blocking.key(),
                    blocking.status
                )));
            }

            let matched = db::search_slots_in_range(
                &self.pool,
                &SlotSearch::range(block.start_date, block.end_date).with_position(lo, hi),
            )
            .await?;

            if matched.is_empty() {
                return Err(Error::detailed_resource_info_not_found(format!(
                    "no slots found between {} and {} in positions [{lo}, {hi}]",
                    block.start_date, block.end_date
                )));
            }
            // A closed slot inside the rectangle would survive the delete and
            // break the dense prefix around it.
            if let Some(blocking) = matched.iter().find(|s| s.status != SlotStatus::Open) {
                return Err(Error::action_forbidden(format!(
                    "slot {} is {}; only open slots can be deleted",
                    blocking.key(),
                    blocking.status
                )));
            }

            // Tail-only rule: a surviving successor would be left out of
            // sequence.
            let successors = db::search_slots_in_range(
                &self.pool,
                &SlotSearch::range(block.start_date, block.end_date)
                    .with_position(hi + 1, hi + 1),
            )
            .await?;
            if let Some(successor) = successors.first() {
                return Err(Error::action_forbidden(format!(
                    "cannot delete: position {} on {} would be left out of sequence",
                    successor.position, successor.date
                )));
            }

            let keys: Vec<SlotKey> = matched.iter().map(SlotRow::key).collect();
            removed += db::delete_slots(&self.pool, &keys).await?;
        }

        info!(slots = removed, "deleted slot ranges");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Reserve
    // -----------------------------------------------------------------------

    /// Reserve a batch of slots for `uid`. One txnid is minted for the whole
    /// batch; either every slot ends up booked under it, or the hold is
    /// released and the caller sees the failure.
    ///
    /// Phases: eligibility check → hold acquisition (transaction insert +
    /// `open → hold` flip) → remote debit → commit (`hold → booked`). Every
    /// error path before the debit succeeds compensates by releasing the
    /// hold; after the debit succeeds the reservation never fails — a
    /// commit outage leaves a durable hold the recovery sweep settles.
    pub async fn reserve_slots(&self, requests: &[ReserveSlotRequest], uid: &str) -> Result<()> {
        if requests.is_empty() {
            return Err(Error::decode_failure("request body must not be empty"));
        }
        if uid.is_empty() {
            return Err(Error::decode_failure("uid must not be empty"));
        }

        // Phase 1 — eligibility. No writes before every key resolves to an
        // open slot.
        let mut slots: Vec<SlotRow> = Vec::with_capacity(requests.len());
        for req in requests {
            if req.position < 1 {
                return Err(Error::decode_failure("position must be >= 1"));
            }
            let found = db::search_slots_in_range(
                &self.pool,
                &SlotSearch::range(req.date, req.date)
                    .with_position(req.position, req.position)
                    .with_status(SlotStatus::Open),
            )
            .await?;
            match found.into_iter().next() {
                Some(slot) => slots.push(slot),
                None => return Err(Error::action_forbidden(RESERVE_CONFLICT_MSG)),
            }
        }
        let keys: Vec<SlotKey> = slots.iter().map(SlotRow::key).collect();

        // Phase 2 — hold acquisition. The transactions PK is the
        // mutual-exclusion gate: of two concurrent batches touching the same
        // slot, exactly one insert succeeds.
        let txnid = Uuid::now_v1(txnid_node_id()).to_string();
        let txns: Vec<NewTransaction> = keys
            .iter()
            .map(|k| NewTransaction {
                date: k.date,
                position: k.position,
                txnid: txnid.clone(),
            })
            .collect();
        if let Err(e) = db::create_transactions(&self.pool, &txns).await {
            return Err(match e.kind() {
                ErrorKind::DuplicateResource => Error::action_forbidden(RESERVE_CONFLICT_MSG),
                _ => e,
            });
        }

        if let Err(e) =
            db::update_slots_status(&self.pool, &keys, SlotStatus::Open, SlotStatus::Hold).await
        {
            // A writer got between our eligibility check and the flip.
            // Release the gate and report the conflict.
            warn!(%txnid, error = %e, "hold flip failed, releasing transaction records");
            if let Err(del_err) = db::delete_transactions(&self.pool, &keys).await {
                error!(%txnid, error = %del_err, "failed to release transaction records");
            }
            return Err(match e.kind() {
                ErrorKind::ActionForbidden => Error::action_forbidden(RESERVE_CONFLICT_MSG),
                _ => e,
            });
        }
        info!(%txnid, uid, slots = keys.len(), "hold acquired");

        // Phase 3 — remote debit.
        let charges: Vec<DebitSlot> = slots
            .iter()
            .map(|s| DebitSlot {
                date: s.date,
                position: s.position,
                cost: s.cost,
            })
            .collect();
        if let Err(debit_err) = self.accounting.debit(&charges, uid, &txnid).await {
            warn!(%txnid, uid, "debit failed, compensating reservation");
            // Delete the gate first: a crash between the two steps leaves a
            // bare hold, which the sweep force-opens.
            if let Err(e) = db::delete_transactions(&self.pool, &keys).await {
                error!(%txnid, error = %e, "compensation: transaction delete failed");
            }
            if let Err(e) =
                db::update_slots_status(&self.pool, &keys, SlotStatus::Hold, SlotStatus::Open)
                    .await
            {
                error!(%txnid, error = %e, "compensation: hold release failed");
            }
            return Err(debit_err);
        }

        // Phase 4 — commit. The ledger has the debit; from here the
        // reservation is a fact and local persistence is best-effort with
        // the sweep as backstop.
        let now = Utc::now();
        let updates: Vec<SlotUpdate> = slots
            .iter()
            .map(|s| SlotUpdate {
                date: s.date,
                position: s.position,
                cost: s.cost,
                status: SlotStatus::Booked,
                booked_date: Some(now),
                booked_by: Some(uid.to_string()),
            })
            .collect();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match db::update_slots(&self.pool, &updates).await {
                Ok(_) => {
                    info!(%txnid, uid, slots = updates.len(), "reservation committed");
                    return Ok(());
                }
                Err(e) if attempt >= COMMIT_ATTEMPTS => {
                    error!(
                        %txnid, uid, error = %e,
                        "commit failed after {attempt} attempts; recovery sweep will settle the held slots at next boot"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(%txnid, attempt, error = %e, "commit failed, retrying");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Slots over a date rectangle, grouped by date.
    pub async fn get_slots(&self, query: &SlotQuery) -> Result<Vec<DateGroup>> {
        if query.start_date > query.end_date {
            return Err(Error::decode_failure(format!(
                "start_date {} must not be after end_date {}",
                query.start_date, query.end_date
            )));
        }

        let mut search = SlotSearch::range(query.start_date, query.end_date);
        if let Some(position) = query.position {
            if position < 1 {
                return Err(Error::decode_failure("position must be >= 1"));
            }
            search = search.with_position(position, position);
        }
        if let Some(status) = query.status {
            search = search.with_status(status);
        }
        search.booked_by = query.uid.clone();

        let rows = db::search_slots_in_range(&self.pool, &search).await?;
        Ok(group_by_date(rows))
    }
}

/// Node id for v1 txnids: six random bytes fixed at first use. Txnids must
/// be unique across concurrently minting processes, not traceable to a host.
fn txnid_node_id() -> &'static [u8; 6] {
    static NODE_ID: std::sync::OnceLock<[u8; 6]> = std::sync::OnceLock::new();
    NODE_ID.get_or_init(|| {
        let seed = *Uuid::new_v4().as_bytes();
        [seed[0], seed[1], seed[2], seed[3], seed[4], seed[5]]
    })
}

/// Every calendar day in `[start, end]`, inclusive.
fn dates_in(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut day = start;
    while day <= end {
        dates.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    dates
}

/// Fold date-ordered rows into per-date groups.
fn group_by_date(rows: Vec<SlotRow>) -> Vec<DateGroup> {
    let mut groups: Vec<DateGroup> = Vec::new();
    for row in rows {
        let descriptor = SlotDescriptor {
            position: row.position,
            cost: row.cost,
            status: row.status,
            booked_by: row.booked_by.clone(),
            booked_date: row.booked_date,
        };
        match groups.last_mut() {
            Some(group) if group.date == row.date => group.slots.push(descriptor),
            _ => groups.push(DateGroup {
                date: row.date,
                slots: vec![descriptor],
            }),
        }
    }
    groups
}
