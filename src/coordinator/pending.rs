use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::trip::{TripRequest, TripStatus};

/// Seconds a pending request stays visible to the driver, measured from its
/// creation timestamp. Older requests are filtered out, never transitioned
/// client-side.
pub const PENDING_VISIBILITY_SECS: i64 = 40;

/// Deduplicated, age-filtered view over the driver's pending requests. Always
/// rebuilt from a fresh authoritative fetch, never merged incrementally, so a
/// request observed by both push and poll in the same tick counts once.
#[derive(Debug, Clone, Default)]
pub struct PendingRequestSet {
    requests: Vec<TripRequest>,
}

impl PendingRequestSet {
    pub fn rebuild(trips: &[TripRequest], now: DateTime<Utc>) -> Self {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let requests = trips
            .iter()
            .filter(|trip| {
                trip.status == TripStatus::Pending
                    && trip.age_seconds(now) < PENDING_VISIBILITY_SECS
                    && seen.insert(trip.id)
            })
            .cloned()
            .collect();

        Self { requests }
    }

    pub fn count(&self) -> usize {
        self.requests.len()
    }

    pub fn contains(&self, trip_id: Uuid) -> bool {
        self.requests.iter().any(|trip| trip.id == trip_id)
    }

    /// Most recently created visible request; the one surfaced to an idle
    /// driver.
    pub fn newest(&self) -> Option<&TripRequest> {
        self.requests.iter().max_by_key(|trip| trip.created_at)
    }

    pub fn requests(&self) -> &[TripRequest] {
        &self.requests
    }

    pub fn remove(&mut self, trip_id: Uuid) {
        self.requests.retain(|trip| trip.id != trip_id);
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    /// Countdown driving the notification ring: the maximum remaining
    /// visibility across the set, zero when empty.
    pub fn max_remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.requests
            .iter()
            .map(|trip| (PENDING_VISIBILITY_SECS - trip.age_seconds(now)).max(0))
            .max()
            .unwrap_or(0)
    }
}
