use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::EtaEstimate;
use crate::models::trip::{Location, TripStatus};

/// Per-driver snapshot namespaces in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    ActiveTrip,
    RemainingTime,
    TripStatuses,
    DriverState,
    LastLocation,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotKind::ActiveTrip => "active-trip",
            SnapshotKind::RemainingTime => "remaining-time",
            SnapshotKind::TripStatuses => "trip-statuses",
            SnapshotKind::DriverState => "driver-state",
            SnapshotKind::LastLocation => "last-location",
        }
    }

    pub fn key(self, driver_id: Uuid) -> String {
        format!("driver:{driver_id}:{}", self.as_str())
    }
}

/// Serialized projection of the active trip, written on every meaningful
/// change and erased on terminal states and on going offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub trip_id: Uuid,
    pub customer_id: Uuid,
    pub status: TripStatus,
    pub trip_started: bool,
    pub can_end: bool,
    pub origin: Option<Location>,
    pub destination: Option<Location>,
    pub eta: Option<EtaEstimate>,
    pub distance_meters: Option<f64>,
    pub written_at: DateTime<Utc>,
}
