use crate::error::AppError;
use crate::models::trip::TripStatus;

/// Closed transition table for the active trip. Anything not listed here is a
/// construction-time error, never a silent string comparison.
pub fn is_valid(from: TripStatus, to: TripStatus) -> bool {
    use TripStatus::*;

    match (from, to) {
        (Pending, Accepted) => true,
        (Accepted, OnGoing) => true,
        (OnGoing, Completed) => true,
        (Pending | Accepted | OnGoing, Canceled) => true,
        (Pending, Declined) => true,
        (Pending, NoResponse) => true,
        _ => false,
    }
}

pub fn check(from: TripStatus, to: TripStatus) -> Result<(), AppError> {
    if is_valid(from, to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition { from, to })
    }
}
