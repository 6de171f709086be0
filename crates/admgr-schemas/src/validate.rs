//! Request-shape validation, applied at decode time by the HTTP layer.
//! All failures here are `DecodeFailure` (HTTP 400).

use crate::{DeleteSlotRangeRequest, Error, Result, SlotRangeRequest, SlotStatus};
use chrono::NaiveDate;

fn check_dates(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        return Err(Error::decode_failure(format!(
            "start_date {start} must not be after end_date {end}"
        )));
    }
    Ok(())
}

fn check_position_range(position: &[i32]) -> Result<(i32, i32)> {
    if position.len() != 2 || position[0] > position[1] {
        return Err(Error::decode_failure(
            "position field must be a range e.g [1,2]",
        ));
    }
    if position[0] < 1 {
        return Err(Error::decode_failure("position must be >= 1"));
    }
    Ok((position[0], position[1]))
}

/// Costs are decimals with two fractional digits; anything finer is a
/// client error, not something to round silently.
fn check_cost(cost: f64) -> Result<()> {
    if !cost.is_finite() || cost < 0.0 {
        return Err(Error::decode_failure("cost must be a non-negative number"));
    }
    let cents = cost * 100.0;
    if (cents - cents.round()).abs() > 1e-6 {
        return Err(Error::decode_failure(
            "cost must have at most two fractional digits",
        ));
    }
    Ok(())
}

impl SlotRangeRequest {
    /// Validate the block and return the `(lo, hi)` position range.
    pub fn validate(&self) -> Result<(i32, i32)> {
        check_dates(self.start_date, self.end_date)?;
        let range = check_position_range(&self.position)?;
        check_cost(self.cost)?;
        match self.status {
            None | Some(SlotStatus::Open) | Some(SlotStatus::Closed) => {}
            Some(other) => {
                return Err(Error::decode_failure(format!(
                    "status {other} cannot be assigned directly, only open or closed"
                )));
            }
        }
        Ok(range)
    }
}

impl DeleteSlotRangeRequest {
    /// Validate the block and return the `(lo, hi)` position range.
    pub fn validate(&self) -> Result<(i32, i32)> {
        check_dates(self.start_date, self.end_date)?;
        check_position_range(&self.position)
    }
}
