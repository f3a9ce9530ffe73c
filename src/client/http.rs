use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::client::TripApi;
use crate::error::AppError;
use crate::models::driver::{ApprovalStatus, DriverSession, DriverStats};
use crate::models::trip::{TripRequest, TripStatusUpdate};

pub struct HttpTripApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTripApi {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AppError::Upstream(format!("{status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| AppError::Upstream(format!("invalid response body: {err}")))
    }
}

#[async_trait]
impl TripApi for HttpTripApi {
    async fn fetch_driver_trips(&self, driver_id: Uuid) -> Result<Vec<TripRequest>, AppError> {
        let response = self
            .client
            .get(self.url(&format!("/drivers/{driver_id}/trips")))
            .send()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;

        Self::read_json(response).await
    }

    async fn update_trip_status(
        &self,
        trip_id: Uuid,
        update: TripStatusUpdate,
    ) -> Result<TripRequest, AppError> {
        let response = self
            .client
            .patch(self.url(&format!("/trips/{trip_id}/status")))
            .json(&update)
            .send()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;

        Self::read_json(response).await
    }

    async fn fetch_approval(&self, driver_id: Uuid) -> Result<ApprovalStatus, AppError> {
        let response = self
            .client
            .get(self.url(&format!("/drivers/{driver_id}/approval")))
            .send()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;

        // A 404 here is a distinct outcome, not a transport failure.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ApprovalStatus::NotFound);
        }

        Self::read_json(response).await
    }

    async fn start_session(&self, driver_id: Uuid) -> Result<DriverSession, AppError> {
        let response = self
            .client
            .post(self.url(&format!("/drivers/{driver_id}/sessions")))
            .json(&json!({}))
            .send()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;

        Self::read_json(response).await
    }

    async fn end_session(&self, session_id: Uuid, worked_seconds: i64) -> Result<(), AppError> {
        let response = self
            .client
            .patch(self.url(&format!("/sessions/{session_id}/end")))
            .json(&json!({ "worked_seconds": worked_seconds }))
            .send()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AppError::Upstream(format!("{status}: {body}")));
        }

        Ok(())
    }

    async fn fetch_remaining_seconds(&self, driver_id: Uuid) -> Result<i64, AppError> {
        let response = self
            .client
            .get(self.url(&format!("/drivers/{driver_id}/remaining-seconds")))
            .send()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;

        Self::read_json(response).await
    }

    async fn fetch_driver_stats(&self, driver_id: Uuid) -> Result<DriverStats, AppError> {
        let response = self
            .client
            .get(self.url(&format!("/drivers/{driver_id}/stats")))
            .send()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;

        Self::read_json(response).await
    }
}
