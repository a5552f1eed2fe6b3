use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_range(
    range: &DayRange,
    max_days: i64,
    too_wide: &'static str,
) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.start() < MIN_VALID_DATE || range.end() > MAX_VALID_DATE {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.days() > max_days {
        return Err(EngineError::LimitExceeded(too_wide));
    }
    Ok(())
}

/// First non-cancelled reservation overlapping `range`, if any.
pub fn first_conflict<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    range: &DayRange,
) -> Option<Ulid> {
    let query = range.span();
    reservations
        .into_iter()
        .filter(|r| r.status.blocks())
        .find(|r| r.range().span().overlaps(&query))
        .map(|r| r.id)
}

pub fn check_no_conflict(reservations: &[Reservation], range: &DayRange) -> Result<(), EngineError> {
    match first_conflict(reservations, range) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}
