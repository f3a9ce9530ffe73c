use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::EtaEstimate;
use crate::models::trip::{Location, TripRequest};

/// Backend-issued online session. Superseded by the next go-online, never
/// deleted client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSession {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub online_since: DateTime<Utc>,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Approved,
    PendingReview,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverStats {
    pub trips_completed: u64,
    pub total_distance_km: f64,
    pub total_earned: f64,
    pub rating: f64,
}

/// Render-ready projection of the coordinator state for the device UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverStateView {
    pub driver_id: Uuid,
    pub online: bool,
    pub session: Option<DriverSession>,
    pub active_trip: Option<TripRequest>,
    pub pending_count: usize,
    pub countdown_seconds: i64,
    pub trip_started: bool,
    pub can_end: bool,
    pub origin: Option<Location>,
    pub destination: Option<Location>,
    pub distance_meters: Option<f64>,
    pub eta: Option<EtaEstimate>,
}
