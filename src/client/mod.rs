pub mod http;
pub mod mock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{ApprovalStatus, DriverSession, DriverStats};
use crate::models::trip::{TripRequest, TripStatusUpdate};

/// The remote trip API consumed by the coordinator. Paths are backend-defined;
/// only these semantics matter.
#[async_trait]
pub trait TripApi: Send + Sync {
    async fn fetch_driver_trips(&self, driver_id: Uuid) -> Result<Vec<TripRequest>, AppError>;

    async fn update_trip_status(
        &self,
        trip_id: Uuid,
        update: TripStatusUpdate,
    ) -> Result<TripRequest, AppError>;

    async fn fetch_approval(&self, driver_id: Uuid) -> Result<ApprovalStatus, AppError>;

    async fn start_session(&self, driver_id: Uuid) -> Result<DriverSession, AppError>;

    async fn end_session(&self, session_id: Uuid, worked_seconds: i64) -> Result<(), AppError>;

    async fn fetch_remaining_seconds(&self, driver_id: Uuid) -> Result<i64, AppError>;

    async fn fetch_driver_stats(&self, driver_id: Uuid) -> Result<DriverStats, AppError>;
}

/// Device-level authentication challenge (biometric or device credential),
/// reduced to a boolean outcome.
#[async_trait]
pub trait DeviceAuth: Send + Sync {
    async fn authenticate(&self) -> Result<bool, AppError>;
}
