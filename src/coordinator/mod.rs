pub mod events;
pub mod pending;
pub mod snapshots;
pub mod timers;
pub mod transitions;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{DeviceAuth, TripApi};
use crate::error::AppError;
use crate::geo::{self, EtaEstimate};
use crate::models::driver::{ApprovalStatus, DriverSession, DriverStateView, DriverStats};
use crate::models::snapshot::{SnapshotKind, TripSnapshot};
use crate::models::trip::{
    CanceledBy, GeoPoint, Location, TripRequest, TripStatus, TripStatusUpdate,
};
use crate::observability::metrics::Metrics;

use self::events::{OutboundEvent, RealtimeEvent};
use self::pending::PendingRequestSet;
use self::snapshots::{fetch_with_fallback, SnapshotStore};

/// Delay before the single automatic retry of a stats fetch.
pub const STATS_RETRY_DELAY: Duration = Duration::from_secs(3);

/// One reconciliation window: how long a local optimistic transition outranks
/// a lower status reported by a live poll.
const RECONCILE_GRACE_SECS: i64 = 5;

/// Everything the coordinator owns for one driver. Held behind a single lock;
/// the transition guards below, not the lock, are what keep interleaved
/// callbacks from corrupting the machine.
#[derive(Debug)]
pub struct CoordinatorState {
    pub driver_id: Uuid,
    pub online: bool,
    pub session: Option<DriverSession>,
    pub active_trip: Option<TripRequest>,
    pub pending: PendingRequestSet,
    /// Reference count for delta detection across ticks, distinct from
    /// anything used for rendering. Reset when the driver goes offline or an
    /// active trip begins.
    pub last_known_count: usize,
    pub countdown_seconds: i64,
    pub auto_start_fired: bool,
    pub can_end: bool,
    pub origin: Option<Location>,
    pub destination: Option<Location>,
    pub distance_meters: Option<f64>,
    pub eta: Option<EtaEstimate>,
    pub last_position: Option<GeoPoint>,
    pub traveled_meters: f64,
    pub local_transition_at: Option<DateTime<Utc>>,
}

impl CoordinatorState {
    fn new(driver_id: Uuid) -> Self {
        Self {
            driver_id,
            online: false,
            session: None,
            active_trip: None,
            pending: PendingRequestSet::default(),
            last_known_count: 0,
            countdown_seconds: 0,
            auto_start_fired: false,
            can_end: false,
            origin: None,
            destination: None,
            distance_meters: None,
            eta: None,
            last_position: None,
            traveled_meters: 0.0,
            local_transition_at: None,
        }
    }

    fn has_active_trip(&self) -> bool {
        self.active_trip
            .as_ref()
            .is_some_and(|trip| trip.status.is_active())
    }
}

fn view_of(state: &CoordinatorState) -> DriverStateView {
    DriverStateView {
        driver_id: state.driver_id,
        online: state.online,
        session: state.session.clone(),
        active_trip: state.active_trip.clone(),
        pending_count: state.pending.count(),
        countdown_seconds: state.countdown_seconds,
        trip_started: state
            .active_trip
            .as_ref()
            .is_some_and(|trip| trip.status == TripStatus::OnGoing),
        can_end: state.can_end,
        origin: state.origin.clone(),
        destination: state.destination.clone(),
        distance_meters: state.distance_meters,
        eta: state.eta,
    }
}

fn trip_snapshot_of(state: &CoordinatorState) -> Option<TripSnapshot> {
    state.active_trip.as_ref().map(|trip| TripSnapshot {
        trip_id: trip.id,
        customer_id: trip.customer_id,
        status: trip.status,
        trip_started: trip.status == TripStatus::OnGoing,
        can_end: state.can_end,
        origin: state.origin.clone(),
        destination: state.destination.clone(),
        eta: state.eta,
        distance_meters: state.distance_meters,
        written_at: Utc::now(),
    })
}

/// Clears the trip and every derived UI flag in one lock scope, so no caller
/// can observe a start button without a trip or vice versa.
fn clear_active_trip(state: &mut CoordinatorState) {
    state.active_trip = None;
    state.origin = None;
    state.destination = None;
    state.distance_meters = None;
    state.eta = None;
    state.auto_start_fired = false;
    state.can_end = false;
    state.traveled_meters = 0.0;
}

fn status_rank(status: TripStatus) -> u8 {
    match status {
        TripStatus::Pending => 0,
        TripStatus::Accepted => 1,
        TripStatus::OnGoing => 2,
        TripStatus::Completed
        | TripStatus::Canceled
        | TripStatus::Declined
        | TripStatus::NoResponse => 3,
    }
}

fn status_label(status: TripStatus) -> &'static str {
    match status {
        TripStatus::Pending => "pending",
        TripStatus::Accepted => "accepted",
        TripStatus::OnGoing => "on_going",
        TripStatus::Completed => "completed",
        TripStatus::Canceled => "canceled",
        TripStatus::Declined => "declined",
        TripStatus::NoResponse => "no_response",
    }
}

/// Convergence policy when sources disagree: a cached answer never downgrades
/// locally-confirmed state; a live remote answer loses to a fresher local
/// optimistic transition for one reconciliation window, then wins wholesale.
fn should_adopt(
    local: TripStatus,
    remote: TripStatus,
    from_cache: bool,
    local_transition_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let local_rank = status_rank(local);
    let remote_rank = status_rank(remote);

    if remote_rank == local_rank {
        return false;
    }
    if remote_rank > local_rank {
        return true;
    }
    if from_cache {
        return false;
    }

    !local_transition_at.is_some_and(|at| (now - at).num_seconds() <= RECONCILE_GRACE_SECS)
}

pub struct Coordinator {
    api: Arc<dyn TripApi>,
    auth: Arc<dyn DeviceAuth>,
    store: Arc<dyn SnapshotStore>,
    outbound_tx: broadcast::Sender<OutboundEvent>,
    metrics: Metrics,
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    pub fn new(
        driver_id: Uuid,
        api: Arc<dyn TripApi>,
        auth: Arc<dyn DeviceAuth>,
        store: Arc<dyn SnapshotStore>,
        outbound_tx: broadcast::Sender<OutboundEvent>,
        metrics: Metrics,
    ) -> Self {
        Self {
            api,
            auth,
            store,
            outbound_tx,
            metrics,
            state: Mutex::new(CoordinatorState::new(driver_id)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.outbound_tx.subscribe()
    }

    pub async fn view(&self) -> DriverStateView {
        view_of(&*self.state.lock().await)
    }

    pub async fn pending_trips(&self) -> Vec<TripRequest> {
        self.state.lock().await.pending.requests().to_vec()
    }

    pub async fn active_trip(&self) -> Option<TripRequest> {
        self.state.lock().await.active_trip.clone()
    }

    fn emit(&self, event: OutboundEvent) {
        let _ = self.outbound_tx.send(event);
    }

    async fn put_snapshot<T: serde::Serialize>(&self, kind: SnapshotKind, driver_id: Uuid, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => {
                if let Err(err) = self.store.put(&kind.key(driver_id), json).await {
                    warn!(error = %err, kind = kind.as_str(), "snapshot write failed");
                }
            }
            Err(err) => warn!(error = %err, kind = kind.as_str(), "snapshot serialization failed"),
        }
    }

    async fn remove_snapshot(&self, kind: SnapshotKind, driver_id: Uuid) {
        if let Err(err) = self.store.remove(&kind.key(driver_id)).await {
            warn!(error = %err, kind = kind.as_str(), "snapshot removal failed");
        }
    }

    async fn persist_active_snapshot(&self) {
        let (driver_id, snapshot) = {
            let state = self.state.lock().await;
            (state.driver_id, trip_snapshot_of(&state))
        };

        match snapshot {
            Some(snapshot) => {
                self.put_snapshot(SnapshotKind::ActiveTrip, driver_id, &snapshot)
                    .await
            }
            None => self.remove_snapshot(SnapshotKind::ActiveTrip, driver_id).await,
        }
    }

    async fn persist_driver_state(&self) {
        let (driver_id, view) = {
            let state = self.state.lock().await;
            (state.driver_id, view_of(&state))
        };
        self.put_snapshot(SnapshotKind::DriverState, driver_id, &view)
            .await;
    }

    /// Restore the active-trip mirror from the snapshot store after a process
    /// relaunch. Snapshots are advisory: a stale cached status list is checked
    /// with the same adoption guard, so a cached pending can never downgrade a
    /// confirmed accepted.
    pub async fn rehydrate(&self) {
        let driver_id = self.state.lock().await.driver_id;

        let snapshot = match self.store.get(&SnapshotKind::ActiveTrip.key(driver_id)).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "snapshot store unavailable, skipping rehydration");
                return;
            }
        };

        let snapshot: TripSnapshot = match serde_json::from_value(snapshot.value) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "corrupt active-trip snapshot ignored");
                return;
            }
        };

        let mut status = snapshot.status;
        if let Ok(Some(cached)) = self.store.get(&SnapshotKind::TripStatuses.key(driver_id)).await {
            if let Ok(trips) = serde_json::from_value::<Vec<TripRequest>>(cached.value) {
                if let Some(remote) = trips.iter().find(|trip| trip.id == snapshot.trip_id) {
                    if should_adopt(status, remote.status, true, None, Utc::now()) {
                        status = remote.status;
                    }
                }
            }
        }

        if status.is_terminal() {
            self.remove_snapshot(SnapshotKind::ActiveTrip, driver_id).await;
            return;
        }
        if !status.is_active() {
            return;
        }

        let (Some(origin), Some(destination)) =
            (snapshot.origin.clone(), snapshot.destination.clone())
        else {
            return;
        };

        let mut state = self.state.lock().await;
        if state.online || state.active_trip.is_some() {
            return;
        }

        info!(trip_id = %snapshot.trip_id, status = ?status, "rehydrated active trip from snapshot");

        // A mid-trip driver is necessarily online; the session itself is
        // re-established on the next remote call.
        state.online = true;
        state.active_trip = Some(TripRequest {
            id: snapshot.trip_id,
            customer_id: snapshot.customer_id,
            driver_id: Some(driver_id),
            pickup: origin.clone(),
            dropoff: destination.clone(),
            status,
            created_at: snapshot.written_at,
            updated_at: snapshot.written_at,
            cancellation_reason: None,
            canceled_by: None,
        });
        state.origin = Some(origin);
        state.destination = Some(destination);
        state.eta = snapshot.eta;
        state.distance_meters = snapshot.distance_meters;
        state.auto_start_fired = matches!(status, TripStatus::OnGoing);
        state.can_end = snapshot.can_end;
    }

    pub async fn go_online(&self) -> Result<DriverStateView, AppError> {
        let driver_id = {
            let state = self.state.lock().await;
            if state.online {
                return Ok(view_of(&state));
            }
            state.driver_id
        };

        if !self.auth.authenticate().await? {
            return Err(AppError::DeviceAuthFailed);
        }

        match self.api.fetch_approval(driver_id).await? {
            ApprovalStatus::Approved => {}
            ApprovalStatus::PendingReview => return Err(AppError::ApprovalPending),
            ApprovalStatus::NotFound => return Err(AppError::DriverNotRegistered),
        }

        let mut session = self.api.start_session(driver_id).await?;

        let api = self.api.clone();
        let remaining = fetch_with_fallback(
            self.store.as_ref(),
            &self.metrics,
            SnapshotKind::RemainingTime,
            driver_id,
            move || async move { api.fetch_remaining_seconds(driver_id).await },
        )
        .await;
        match remaining {
            Ok(fetched) => session.remaining_seconds = fetched.value,
            Err(err) => {
                warn!(error = %err, "remaining-time fetch failed, keeping session value")
            }
        }

        {
            let mut state = self.state.lock().await;
            if state.online {
                return Ok(view_of(&state));
            }
            state.online = true;
            state.session = Some(session);
            state.pending.clear();
            state.last_known_count = 0;
            state.countdown_seconds = 0;
        }

        self.persist_driver_state().await;
        info!(driver_id = %driver_id, "driver online");
        Ok(self.view().await)
    }

    pub async fn go_offline(&self) -> Result<DriverStateView, AppError> {
        // State conflicts are rejected locally, before any network call.
        let session = {
            let state = self.state.lock().await;
            if !state.online {
                return Ok(view_of(&state));
            }
            if state.has_active_trip() {
                return Err(AppError::ActiveTripExists);
            }
            state.session.clone()
        };

        if let Some(session) = &session {
            let worked_seconds = (Utc::now() - session.online_since).num_seconds();
            self.api.end_session(session.id, worked_seconds).await?;
        }

        let driver_id = {
            let mut state = self.state.lock().await;
            if state.has_active_trip() {
                return Err(AppError::ActiveTripExists);
            }
            state.online = false;
            state.session = None;
            state.pending.clear();
            state.last_known_count = 0;
            state.countdown_seconds = 0;
            clear_active_trip(&mut state);
            state.driver_id
        };

        self.metrics.pending_requests.set(0);
        self.remove_snapshot(SnapshotKind::TripStatuses, driver_id).await;
        self.remove_snapshot(SnapshotKind::ActiveTrip, driver_id).await;
        self.persist_driver_state().await;

        info!(driver_id = %driver_id, "driver offline");
        Ok(self.view().await)
    }

    /// Single authoritative path for both producers: push notifications and
    /// poll ticks land here, refetch the driver's trips, and rebuild the
    /// pending set from scratch. No delta merging, so the same underlying
    /// request observed by both sources in one tick window counts once.
    pub async fn reconcile_pending(&self) -> Result<(), AppError> {
        let driver_id = {
            let state = self.state.lock().await;
            if !state.online || state.has_active_trip() {
                return Ok(());
            }
            state.driver_id
        };

        let api = self.api.clone();
        let fetched = fetch_with_fallback(
            self.store.as_ref(),
            &self.metrics,
            SnapshotKind::TripStatuses,
            driver_id,
            move || async move { api.fetch_driver_trips(driver_id).await },
        )
        .await?;

        let now = Utc::now();
        let set = PendingRequestSet::rebuild(&fetched.value, now);

        let mut cancel_signal = None;
        let notify = {
            let mut state = self.state.lock().await;
            // the guards may have flipped while the fetch was in flight
            if !state.online || state.has_active_trip() {
                return Ok(());
            }

            if let Some(selected) = state.active_trip.clone() {
                if let Some(remote) = fetched.value.iter().find(|trip| trip.id == selected.id) {
                    if remote.status != selected.status
                        && should_adopt(
                            selected.status,
                            remote.status,
                            fetched.from_cache,
                            state.local_transition_at,
                            now,
                        )
                    {
                        info!(trip_id = %selected.id, status = ?remote.status, "adopting remote trip status");
                        if remote.status.is_terminal() {
                            if remote.status == TripStatus::Canceled {
                                cancel_signal = Some((
                                    selected.id,
                                    selected.customer_id,
                                    remote.cancellation_reason.clone().unwrap_or_default(),
                                    remote.canceled_by.unwrap_or(CanceledBy::Customer),
                                ));
                            }
                            clear_active_trip(&mut state);
                        } else {
                            state.active_trip = Some(remote.clone());
                        }
                    }
                }

                // aged out of the visibility window with no driver response
                if state
                    .active_trip
                    .as_ref()
                    .is_some_and(|trip| trip.status == TripStatus::Pending && !set.contains(trip.id))
                {
                    debug!(trip_id = %selected.id, "selected request expired without response");
                    state.active_trip = None;
                }
            }

            let count = set.count();
            let countdown = set.max_remaining_seconds(now);
            let increased = count > state.last_known_count;
            state.last_known_count = count;
            // resynchronized from creation timestamps, not merely decremented
            state.countdown_seconds = countdown;

            if state.active_trip.is_none() {
                if let Some(newest) = set.newest() {
                    debug!(trip_id = %newest.id, "surfacing newest pending request");
                    state.active_trip = Some(newest.clone());
                }
            }

            state.pending = set;
            self.metrics.pending_requests.set(count as i64);
            increased.then_some((count, countdown))
        };

        if let Some((trip_id, customer_id, reason, canceled_by)) = cancel_signal {
            self.remove_snapshot(SnapshotKind::ActiveTrip, driver_id).await;
            self.emit(OutboundEvent::TripCancelled {
                trip_id,
                customer_id,
                reason,
                canceled_by,
            });
        }

        if let Some((pending, countdown_seconds)) = notify {
            self.metrics.notification_signals_total.inc();
            self.emit(OutboundEvent::NotificationSignal {
                pending,
                countdown_seconds,
            });
        }

        Ok(())
    }

    /// Poll producer: active only while online with no active trip.
    pub async fn poll_tick(&self) {
        let skip = {
            let state = self.state.lock().await;
            !state.online || state.has_active_trip()
        };
        if skip {
            self.metrics
                .poll_ticks_total
                .with_label_values(&["skipped"])
                .inc();
            return;
        }

        match self.reconcile_pending().await {
            Ok(()) => self
                .metrics
                .poll_ticks_total
                .with_label_values(&["success"])
                .inc(),
            Err(err) => {
                warn!(error = %err, "poll reconciliation failed");
                self.metrics
                    .poll_ticks_total
                    .with_label_values(&["error"])
                    .inc();
            }
        }
    }

    /// 1 Hz client-side tick: drifts the visible countdown between resyncs and
    /// burns down the daily online allowance.
    pub async fn countdown_tick(&self) {
        let force_offline = {
            let mut state = self.state.lock().await;
            if !state.online {
                return;
            }
            if state.countdown_seconds > 0 {
                state.countdown_seconds -= 1;
            }

            let mut exhausted = false;
            if let Some(session) = state.session.as_mut() {
                if session.remaining_seconds > 0 {
                    session.remaining_seconds -= 1;
                }
                exhausted = session.remaining_seconds <= 0;
            }

            // with an active trip the cap is enforced at terminal cleanup
            exhausted && !state.has_active_trip()
        };

        if force_offline {
            info!("daily online allowance exhausted, going offline");
            if let Err(err) = self.go_offline().await {
                warn!(error = %err, "cap-exhaustion offline transition failed");
            }
        }
    }

    pub async fn handle_event(&self, event: RealtimeEvent) -> Result<(), AppError> {
        match event {
            RealtimeEvent::NewTripNotification { trip_id } => {
                debug!(trip_id = %trip_id, "trip notification received");
                self.reconcile_pending().await
            }
            RealtimeEvent::TripCancelled {
                trip_id,
                reason,
                canceled_by,
            } => self.apply_remote_cancel(trip_id, reason, canceled_by).await,
            RealtimeEvent::ChatMessage {
                trip_id,
                sender_id,
                body,
            } => {
                self.emit(OutboundEvent::ChatMessage {
                    trip_id,
                    sender_id,
                    body,
                });
                Ok(())
            }
            RealtimeEvent::PositionUpdate { point } => {
                self.position_update(point).await.map(|_| ())
            }
        }
    }

    async fn apply_remote_cancel(
        &self,
        trip_id: Uuid,
        reason: String,
        canceled_by: CanceledBy,
    ) -> Result<(), AppError> {
        let cleanup = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let active = state
                .active_trip
                .as_ref()
                .filter(|trip| trip.id == trip_id && !trip.status.is_terminal())
                .map(|trip| (trip.status, trip.customer_id));

            match active {
                Some((status, customer_id)) => {
                    transitions::check(status, TripStatus::Canceled)?;
                    clear_active_trip(state);
                    state.pending.remove(trip_id);
                    state.last_known_count = state.pending.count();
                    Some((state.driver_id, customer_id))
                }
                None => {
                    state.pending.remove(trip_id);
                    state.last_known_count = state.pending.count();
                    None
                }
            }
        };

        if let Some((driver_id, customer_id)) = cleanup {
            self.metrics
                .trip_transitions_total
                .with_label_values(&[status_label(TripStatus::Canceled)])
                .inc();
            self.remove_snapshot(SnapshotKind::ActiveTrip, driver_id).await;
            self.persist_driver_state().await;
            self.emit(OutboundEvent::TripCancelled {
                trip_id,
                customer_id,
                reason,
                canceled_by,
            });
            info!(trip_id = %trip_id, "trip canceled by counterpart");
        }

        Ok(())
    }

    pub async fn accept_trip(&self, trip_id: Uuid) -> Result<TripRequest, AppError> {
        let driver_id = {
            let state = self.state.lock().await;
            if !state.online {
                return Err(AppError::Conflict("driver is offline".to_string()));
            }
            if let Some(active) = &state.active_trip {
                if active.id != trip_id && active.status.is_active() {
                    return Err(AppError::ActiveTripExists);
                }
                if active.id == trip_id {
                    transitions::check(active.status, TripStatus::Accepted)?;
                }
            }
            let visible = state
                .active_trip
                .as_ref()
                .is_some_and(|trip| trip.id == trip_id)
                || state.pending.contains(trip_id);
            if !visible {
                return Err(AppError::NotFound(format!(
                    "no visible pending request {trip_id}"
                )));
            }
            state.driver_id
        };

        // remote first: on failure the local state does not transition
        let updated = self
            .api
            .update_trip_status(trip_id, TripStatusUpdate::to_status(TripStatus::Accepted, driver_id))
            .await?;

        let customer_id = {
            let mut state = self.state.lock().await;
            let current = state
                .active_trip
                .as_ref()
                .filter(|trip| trip.id == trip_id)
                .map(|trip| trip.status)
                .unwrap_or(TripStatus::Pending);
            transitions::check(current, TripStatus::Accepted)?;

            let mut trip = updated.clone();
            trip.status = TripStatus::Accepted;
            state.origin = Some(trip.pickup.clone());
            state.destination = Some(trip.dropoff.clone());
            state.auto_start_fired = false;
            state.can_end = false;
            state.traveled_meters = 0.0;
            state.local_transition_at = Some(Utc::now());
            // an active trip stops the poll and resets the count reference
            state.pending.clear();
            state.last_known_count = 0;
            state.countdown_seconds = 0;
            let customer_id = trip.customer_id;
            state.active_trip = Some(trip);
            customer_id
        };

        self.metrics.pending_requests.set(0);
        self.metrics
            .trip_transitions_total
            .with_label_values(&[status_label(TripStatus::Accepted)])
            .inc();
        self.persist_active_snapshot().await;
        self.persist_driver_state().await;
        self.emit(OutboundEvent::AcceptTrip {
            trip_id,
            customer_id,
        });

        info!(trip_id = %trip_id, "trip accepted");
        Ok(updated)
    }

    pub async fn decline_trip(&self, trip_id: Uuid) -> Result<TripRequest, AppError> {
        let driver_id = {
            let state = self.state.lock().await;
            if !state.online {
                return Err(AppError::Conflict("driver is offline".to_string()));
            }
            if let Some(active) = &state.active_trip {
                if active.id == trip_id {
                    transitions::check(active.status, TripStatus::Declined)?;
                }
            }
            if !state
                .active_trip
                .as_ref()
                .is_some_and(|trip| trip.id == trip_id)
                && !state.pending.contains(trip_id)
            {
                return Err(AppError::NotFound(format!(
                    "no visible pending request {trip_id}"
                )));
            }
            state.driver_id
        };

        let updated = self
            .api
            .update_trip_status(trip_id, TripStatusUpdate::to_status(TripStatus::Declined, driver_id))
            .await?;

        let count = {
            let mut state = self.state.lock().await;
            if state
                .active_trip
                .as_ref()
                .is_some_and(|trip| trip.id == trip_id)
            {
                state.active_trip = None;
            }
            state.pending.remove(trip_id);
            // a decrease stays silent
            state.last_known_count = state.pending.count();
            state.countdown_seconds = state.pending.max_remaining_seconds(Utc::now());
            state.pending.count()
        };

        self.metrics.pending_requests.set(count as i64);
        self.metrics
            .trip_transitions_total
            .with_label_values(&[status_label(TripStatus::Declined)])
            .inc();
        self.emit(OutboundEvent::DeclineTrip {
            trip_id,
            customer_id: updated.customer_id,
        });

        info!(trip_id = %trip_id, "trip declined");
        Ok(updated)
    }

    pub async fn cancel_trip(&self, trip_id: Uuid, reason: String) -> Result<TripRequest, AppError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppError::BadRequest(
                "cancellation reason is required".to_string(),
            ));
        }

        let driver_id = {
            let state = self.state.lock().await;
            let trip = state
                .active_trip
                .as_ref()
                .filter(|trip| trip.id == trip_id)
                .ok_or_else(|| AppError::NotFound(format!("no current trip {trip_id}")))?;
            transitions::check(trip.status, TripStatus::Canceled)?;
            state.driver_id
        };

        let mut update = TripStatusUpdate::to_status(TripStatus::Canceled, driver_id);
        update.cancellation_reason = Some(reason.clone());
        update.canceled_by = Some(CanceledBy::Driver);

        let updated = self.api.update_trip_status(trip_id, update).await?;

        let (customer_id, exhausted) = {
            let mut state = self.state.lock().await;
            clear_active_trip(&mut state);
            state.pending.remove(trip_id);
            state.last_known_count = state.pending.count();
            state.local_transition_at = Some(Utc::now());
            let exhausted = state
                .session
                .as_ref()
                .is_some_and(|session| session.remaining_seconds <= 0);
            (updated.customer_id, exhausted)
        };

        self.metrics
            .trip_transitions_total
            .with_label_values(&[status_label(TripStatus::Canceled)])
            .inc();
        self.remove_snapshot(SnapshotKind::ActiveTrip, driver_id).await;
        self.persist_driver_state().await;
        self.emit(OutboundEvent::TripCancelled {
            trip_id,
            customer_id,
            reason,
            canceled_by: CanceledBy::Driver,
        });

        info!(trip_id = %trip_id, "trip canceled by driver");

        if exhausted {
            if let Err(err) = self.go_offline().await {
                warn!(error = %err, "deferred cap-exhaustion offline failed");
            }
        }

        Ok(updated)
    }

    pub async fn end_trip(&self, trip_id: Uuid) -> Result<TripRequest, AppError> {
        let (driver_id, traveled) = {
            let state = self.state.lock().await;
            let trip = state
                .active_trip
                .as_ref()
                .filter(|trip| trip.id == trip_id)
                .ok_or_else(|| AppError::NotFound(format!("no current trip {trip_id}")))?;
            transitions::check(trip.status, TripStatus::Completed)?;
            if !state.can_end {
                return Err(AppError::Conflict(
                    "end ride unlocks within 150 m of the dropoff point".to_string(),
                ));
            }
            (state.driver_id, state.traveled_meters)
        };

        let mut update = TripStatusUpdate::to_status(TripStatus::Completed, driver_id);
        update.distance_traveled_m = Some(traveled);

        let updated = self.api.update_trip_status(trip_id, update).await?;

        let (customer_id, exhausted) = {
            let mut state = self.state.lock().await;
            clear_active_trip(&mut state);
            state.local_transition_at = Some(Utc::now());
            let exhausted = state
                .session
                .as_ref()
                .is_some_and(|session| session.remaining_seconds <= 0);
            (updated.customer_id, exhausted)
        };

        self.metrics
            .trip_transitions_total
            .with_label_values(&[status_label(TripStatus::Completed)])
            .inc();
        self.remove_snapshot(SnapshotKind::ActiveTrip, driver_id).await;
        self.persist_driver_state().await;
        self.emit(OutboundEvent::EndTrip {
            trip_id,
            customer_id,
        });

        info!(trip_id = %trip_id, traveled_meters = traveled, "trip completed");

        if exhausted {
            if let Err(err) = self.go_offline().await {
                warn!(error = %err, "deferred cap-exhaustion offline failed");
            }
        }

        Ok(updated)
    }

    /// Recompute distance and ETA on every position update and derive the
    /// proximity transitions. The auto-start latch makes re-entering the
    /// 250 m radius a no-op once the transition has fired.
    pub async fn position_update(&self, point: GeoPoint) -> Result<DriverStateView, AppError> {
        let (driver_id, arrival) = {
            let mut state = self.state.lock().await;
            let driver_id = state.driver_id;

            if let Some(prev) = state.last_position {
                if state.has_active_trip() {
                    state.traveled_meters += geo::haversine_m(&prev, &point);
                }
            }
            state.last_position = Some(point);

            let trip_info = state
                .active_trip
                .as_ref()
                .map(|trip| (trip.id, trip.customer_id, trip.status, trip.pickup.point, trip.dropoff.point));

            let mut arrival = None;
            if let Some((trip_id, customer_id, status, pickup, dropoff)) = trip_info {
                match status {
                    TripStatus::Accepted => {
                        let distance = geo::haversine_m(&point, &pickup);
                        state.distance_meters = Some(distance);
                        state.eta = Some(geo::eta_at_assumed_speed(distance));
                        if distance <= geo::PICKUP_ARRIVAL_METERS && !state.auto_start_fired {
                            // latch before the remote call; repeat updates
                            // inside the radius must not re-fire
                            state.auto_start_fired = true;
                            arrival = Some((trip_id, customer_id));
                        }
                    }
                    TripStatus::OnGoing => {
                        let distance = geo::haversine_m(&point, &dropoff);
                        state.distance_meters = Some(distance);
                        state.eta = Some(geo::eta_at_assumed_speed(distance));
                        state.can_end = distance <= geo::DROPOFF_ARRIVAL_METERS;
                    }
                    _ => {}
                }
            }

            (driver_id, arrival)
        };

        // location save failures are logged and skipped for this tick
        let location = serde_json::json!({
            "lat": point.lat,
            "lng": point.lng,
            "recorded_at": Utc::now(),
        });
        if let Err(err) = self
            .store
            .put(&SnapshotKind::LastLocation.key(driver_id), location)
            .await
        {
            warn!(error = %err, "location save skipped for this tick");
        }

        if let Some((trip_id, customer_id)) = arrival {
            self.emit(OutboundEvent::DriverArrived {
                trip_id,
                customer_id,
            });

            match self
                .api
                .update_trip_status(trip_id, TripStatusUpdate::to_status(TripStatus::OnGoing, driver_id))
                .await
            {
                Ok(_) => {
                    {
                        let mut guard = self.state.lock().await;
                        let state = &mut *guard;
                        if let Some(trip) = state
                            .active_trip
                            .as_mut()
                            .filter(|trip| trip.id == trip_id)
                        {
                            if transitions::is_valid(trip.status, TripStatus::OnGoing) {
                                trip.status = TripStatus::OnGoing;
                                state.can_end = false;
                                state.local_transition_at = Some(Utc::now());
                            }
                        }
                    }

                    self.metrics
                        .trip_transitions_total
                        .with_label_values(&[status_label(TripStatus::OnGoing)])
                        .inc();
                    self.persist_active_snapshot().await;
                    self.persist_driver_state().await;
                    self.emit(OutboundEvent::StartTrip {
                        trip_id,
                        customer_id,
                    });
                    info!(trip_id = %trip_id, "trip auto-started at pickup");
                }
                Err(err) => {
                    warn!(error = %err, trip_id = %trip_id, "auto-start failed, releasing latch");
                    let mut state = self.state.lock().await;
                    state.auto_start_fired = false;
                }
            }
        }

        Ok(self.view().await)
    }

    /// Stats aggregation gets exactly one automatic retry after a fixed delay;
    /// a second failure surfaces to the caller.
    pub async fn fetch_stats(&self) -> Result<DriverStats, AppError> {
        let driver_id = self.state.lock().await.driver_id;

        match self.api.fetch_driver_stats(driver_id).await {
            Ok(stats) => Ok(stats),
            Err(err) => {
                warn!(error = %err, "stats fetch failed, retrying once");
                tokio::time::sleep(STATS_RETRY_DELAY).await;
                self.api.fetch_driver_stats(driver_id).await
            }
        }
    }
}
