use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::client::{DeviceAuth, TripApi};
use crate::error::AppError;
use crate::models::driver::{ApprovalStatus, DriverSession, DriverStats};
use crate::models::trip::{TripRequest, TripStatus, TripStatusUpdate};

/// In-memory stand-in for the remote trip API, wired when TRIP_API_URL is not
/// configured and used directly by the test suites. Failure toggles simulate
/// transport errors without touching the stored trips.
pub struct MockTripApi {
    trips: DashMap<Uuid, TripRequest>,
    approval: tokio::sync::RwLock<ApprovalStatus>,
    remaining_seconds: AtomicI64,
    fail_trip_fetches: AtomicBool,
    fail_status_updates: AtomicBool,
    fail_stats_calls: AtomicU32,
    pub stats_calls: AtomicU32,
    pub end_session_calls: AtomicU32,
    status_update_counts: DashMap<TripStatus, u32>,
}

impl MockTripApi {
    pub fn new() -> Self {
        Self {
            trips: DashMap::new(),
            approval: tokio::sync::RwLock::new(ApprovalStatus::Approved),
            remaining_seconds: AtomicI64::new(8 * 3600),
            fail_trip_fetches: AtomicBool::new(false),
            fail_status_updates: AtomicBool::new(false),
            fail_stats_calls: AtomicU32::new(0),
            stats_calls: AtomicU32::new(0),
            end_session_calls: AtomicU32::new(0),
            status_update_counts: DashMap::new(),
        }
    }

    pub fn insert_trip(&self, trip: TripRequest) {
        self.trips.insert(trip.id, trip);
    }

    pub fn trip(&self, trip_id: Uuid) -> Option<TripRequest> {
        self.trips.get(&trip_id).map(|entry| entry.value().clone())
    }

    pub async fn set_approval(&self, approval: ApprovalStatus) {
        *self.approval.write().await = approval;
    }

    pub fn set_remaining_seconds(&self, seconds: i64) {
        self.remaining_seconds.store(seconds, Ordering::SeqCst);
    }

    pub fn set_fail_trip_fetches(&self, fail: bool) {
        self.fail_trip_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    /// The next `count` stats fetches fail, then the canned stats return.
    pub fn fail_next_stats_calls(&self, count: u32) {
        self.fail_stats_calls.store(count, Ordering::SeqCst);
    }

    pub fn status_update_count(&self, status: TripStatus) -> u32 {
        self.status_update_counts
            .get(&status)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }
}

impl Default for MockTripApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TripApi for MockTripApi {
    async fn fetch_driver_trips(&self, _driver_id: Uuid) -> Result<Vec<TripRequest>, AppError> {
        if self.fail_trip_fetches.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("simulated trip fetch failure".to_string()));
        }

        let mut trips: Vec<TripRequest> = self
            .trips
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trips)
    }

    async fn update_trip_status(
        &self,
        trip_id: Uuid,
        update: TripStatusUpdate,
    ) -> Result<TripRequest, AppError> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(AppError::Upstream(
                "simulated status update failure".to_string(),
            ));
        }

        let mut trip = self
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| AppError::NotFound(format!("trip {trip_id} not found")))?;

        trip.status = update.status;
        trip.updated_at = Utc::now();
        if let Some(driver_id) = update.driver_id {
            trip.driver_id = Some(driver_id);
        }
        if update.cancellation_reason.is_some() {
            trip.cancellation_reason = update.cancellation_reason;
        }
        if update.canceled_by.is_some() {
            trip.canceled_by = update.canceled_by;
        }

        *self
            .status_update_counts
            .entry(update.status)
            .or_insert(0) += 1;

        Ok(trip.clone())
    }

    async fn fetch_approval(&self, _driver_id: Uuid) -> Result<ApprovalStatus, AppError> {
        Ok(*self.approval.read().await)
    }

    async fn start_session(&self, driver_id: Uuid) -> Result<DriverSession, AppError> {
        Ok(DriverSession {
            id: Uuid::new_v4(),
            driver_id,
            online_since: Utc::now(),
            remaining_seconds: self.remaining_seconds.load(Ordering::SeqCst),
        })
    }

    async fn end_session(&self, _session_id: Uuid, _worked_seconds: i64) -> Result<(), AppError> {
        self.end_session_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_remaining_seconds(&self, _driver_id: Uuid) -> Result<i64, AppError> {
        Ok(self.remaining_seconds.load(Ordering::SeqCst))
    }

    async fn fetch_driver_stats(&self, _driver_id: Uuid) -> Result<DriverStats, AppError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_stats_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_stats_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Upstream("simulated stats failure".to_string()));
        }

        Ok(DriverStats {
            trips_completed: 128,
            total_distance_km: 1042.7,
            total_earned: 3150.0,
            rating: 4.8,
        })
    }
}

/// Accepts every challenge; stands in for the OS credential prompt in local
/// runs.
pub struct TrustedDeviceAuth;

#[async_trait]
impl DeviceAuth for TrustedDeviceAuth {
    async fn authenticate(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

pub struct DenyingDeviceAuth;

#[async_trait]
impl DeviceAuth for DenyingDeviceAuth {
    async fn authenticate(&self) -> Result<bool, AppError> {
        Ok(false)
    }
}
