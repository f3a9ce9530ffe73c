use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::client::http::HttpTripApi;
use crate::client::mock::{MockTripApi, TrustedDeviceAuth};
use crate::client::{DeviceAuth, TripApi};
use crate::config::Config;
use crate::coordinator::events::{OutboundEvent, RealtimeEvent};
use crate::coordinator::snapshots::{MemorySnapshotStore, SnapshotStore};
use crate::coordinator::Coordinator;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub event_tx: mpsc::Sender<RealtimeEvent>,
    pub outbound_tx: broadcast::Sender<OutboundEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let api: Arc<dyn TripApi> = match &config.trip_api_url {
            Some(url) => Arc::new(HttpTripApi::new(url.clone())),
            None => {
                tracing::warn!("TRIP_API_URL not set, using mock trip api");
                Arc::new(MockTripApi::new())
            }
        };

        Self::with_api(
            config,
            api,
            Arc::new(TrustedDeviceAuth),
            Arc::new(MemorySnapshotStore::new()),
        )
    }

    pub fn with_api(
        config: &Config,
        api: Arc<dyn TripApi>,
        auth: Arc<dyn DeviceAuth>,
        store: Arc<dyn SnapshotStore>,
    ) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_size);
        let (outbound_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let metrics = Metrics::new();

        let coordinator = Arc::new(Coordinator::new(
            config.driver_id,
            api,
            auth,
            store,
            outbound_tx.clone(),
            metrics.clone(),
        ));

        (
            Self {
                coordinator,
                event_tx,
                outbound_tx,
                metrics,
            },
            event_rx,
        )
    }
}
