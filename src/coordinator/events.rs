use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::models::trip::{CanceledBy, GeoPoint};

/// Inbound realtime traffic: push notifications from the backend plus the
/// geolocation provider's position stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    NewTripNotification {
        trip_id: Uuid,
    },
    TripCancelled {
        trip_id: Uuid,
        reason: String,
        canceled_by: CanceledBy,
    },
    ChatMessage {
        trip_id: Uuid,
        sender_id: Uuid,
        body: String,
    },
    PositionUpdate {
        point: GeoPoint,
    },
}

/// Outbound emissions toward the counterpart party and the device UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    AcceptTrip {
        trip_id: Uuid,
        customer_id: Uuid,
    },
    DeclineTrip {
        trip_id: Uuid,
        customer_id: Uuid,
    },
    DriverArrived {
        trip_id: Uuid,
        customer_id: Uuid,
    },
    StartTrip {
        trip_id: Uuid,
        customer_id: Uuid,
    },
    EndTrip {
        trip_id: Uuid,
        customer_id: Uuid,
    },
    TripCancelled {
        trip_id: Uuid,
        customer_id: Uuid,
        reason: String,
        canceled_by: CanceledBy,
    },
    /// Pending count increased: play the notification sound and animate the
    /// countdown ring. Decreases stay silent.
    NotificationSignal {
        pending: usize,
        countdown_seconds: i64,
    },
    ChatMessage {
        trip_id: Uuid,
        sender_id: Uuid,
        body: String,
    },
}

/// Single dispatch loop over the inbound channel; the only consumer of
/// realtime events for the lifetime of the coordinator.
pub async fn run_event_loop(coordinator: Arc<Coordinator>, mut rx: mpsc::Receiver<RealtimeEvent>) {
    info!("coordinator event loop started");

    while let Some(event) = rx.recv().await {
        if let Err(err) = coordinator.handle_event(event).await {
            error!(error = %err, "failed to handle realtime event");
        }
    }

    warn!("coordinator event loop stopped: channel closed");
}
