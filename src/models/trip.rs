use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A lat/lng pair plus the free-text label shown to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub point: GeoPoint,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripStatus {
    Pending,
    Accepted,
    OnGoing,
    Completed,
    Canceled,
    Declined,
    NoResponse,
}

impl TripStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TripStatus::Completed
                | TripStatus::Canceled
                | TripStatus::Declined
                | TripStatus::NoResponse
        )
    }

    /// An active trip blocks the offline transition and stops pending polling.
    pub fn is_active(self) -> bool {
        matches!(self, TripStatus::Accepted | TripStatus::OnGoing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanceledBy {
    Driver,
    Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Location,
    pub dropoff: Location,
    pub status: TripStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancellation_reason: Option<String>,
    pub canceled_by: Option<CanceledBy>,
}

impl TripRequest {
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

/// Payload for the remote status-transition call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripStatusUpdate {
    pub status: TripStatus,
    pub driver_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub canceled_by: Option<CanceledBy>,
    pub distance_traveled_m: Option<f64>,
}

impl TripStatusUpdate {
    pub fn to_status(status: TripStatus, driver_id: Uuid) -> Self {
        Self {
            status,
            driver_id: Some(driver_id),
            cancellation_reason: None,
            canceled_by: None,
            distance_traveled_m: None,
        }
    }
}
