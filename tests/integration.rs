use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use trip_coordinator::api::rest::router;
use trip_coordinator::client::mock::{MockTripApi, TrustedDeviceAuth};
use trip_coordinator::config::Config;
use trip_coordinator::coordinator::events::{run_event_loop, RealtimeEvent};
use trip_coordinator::coordinator::snapshots::MemorySnapshotStore;
use trip_coordinator::models::driver::ApprovalStatus;
use trip_coordinator::models::trip::{GeoPoint, Location, TripRequest, TripStatus};
use trip_coordinator::state::AppState;

const DRIVER: Uuid = Uuid::from_u128(7);
const PICKUP: GeoPoint = GeoPoint {
    lat: 5.6037,
    lng: -0.1870,
};
const DROPOFF: GeoPoint = GeoPoint {
    lat: 5.5560,
    lng: -0.1969,
};

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        driver_id: DRIVER,
        trip_api_url: None,
        event_queue_size: 1024,
        event_buffer_size: 1024,
    }
}

fn setup() -> (
    axum::Router,
    Arc<AppState>,
    Arc<MockTripApi>,
    mpsc::Receiver<RealtimeEvent>,
) {
    let api = Arc::new(MockTripApi::new());
    let (state, rx) = AppState::with_api(
        &test_config(),
        api.clone(),
        Arc::new(TrustedDeviceAuth),
        Arc::new(MemorySnapshotStore::new()),
    );
    let shared = Arc::new(state);
    (router(shared.clone()), shared, api, rx)
}

fn pending_trip(id_seed: u128, age_secs: i64) -> TripRequest {
    let created_at = Utc::now() - Duration::seconds(age_secs);
    TripRequest {
        id: Uuid::from_u128(id_seed),
        customer_id: Uuid::from_u128(900 + id_seed),
        driver_id: None,
        pickup: Location {
            point: PICKUP,
            label: "Accra Mall".to_string(),
        },
        dropoff: Location {
            point: DROPOFF,
            label: "Osu Castle".to_string(),
        },
        status: TripStatus::Pending,
        created_at,
        updated_at: created_at,
        cancellation_reason: None,
        canceled_by: None,
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn patch_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn go_online(app: &axum::Router) {
    let response = app
        .clone()
        .oneshot(post_request("/driver/online"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn accept_trip(app: &axum::Router, trip_id: Uuid) {
    let response = app
        .clone()
        .oneshot(post_request(&format!("/trips/{trip_id}/accept")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state, _api, _rx) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["online"], false);
    assert_eq!(body["pending"], 0);
    assert_eq!(body["active_trip"], false);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state, _api, _rx) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("pending_requests"));
}

#[tokio::test]
async fn going_online_reports_session() {
    let (app, _state, _api, _rx) = setup();
    let response = app.oneshot(post_request("/driver/online")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["online"], true);
    assert!(body["session"]["id"].as_str().unwrap().len() > 0);
    assert_eq!(body["pending_count"], 0);
}

#[tokio::test]
async fn unapproved_driver_cannot_go_online() {
    let (app, _state, api, _rx) = setup();
    api.set_approval(ApprovalStatus::PendingReview).await;

    let response = app.oneshot(post_request("/driver/online")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_driver_profile_is_rejected_distinctly() {
    let (app, _state, api, _rx) = setup();
    api.set_approval(ApprovalStatus::NotFound).await;

    let response = app
        .clone()
        .oneshot(post_request("/driver/online"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["error"], "no driver profile found for this account");
}

#[tokio::test]
async fn pending_requests_flow_through_push_notification() {
    let (app, state, api, rx) = setup();
    tokio::spawn(run_event_loop(state.coordinator.clone(), rx));

    api.insert_trip(pending_trip(1, 5));
    api.insert_trip(pending_trip(2, 5));
    api.insert_trip(pending_trip(3, 45));

    go_online(&app).await;

    state
        .event_tx
        .send(RealtimeEvent::NewTripNotification {
            trip_id: Uuid::from_u128(1),
        })
        .await
        .unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

    let response = app
        .clone()
        .oneshot(get_request("/trips/pending"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let pending = body_json(response).await;
    assert_eq!(pending.as_array().unwrap().len(), 2);

    let response = app.oneshot(get_request("/driver/state")).await.unwrap();
    let view = body_json(response).await;
    assert_eq!(view["pending_count"], 2);
    assert_eq!(view["countdown_seconds"], 35);
}

#[tokio::test]
async fn accept_flow_reaches_active_trip() {
    let (app, state, api, _rx) = setup();
    api.insert_trip(pending_trip(1, 2));

    go_online(&app).await;
    state.coordinator.reconcile_pending().await.unwrap();

    let trip_id = Uuid::from_u128(1);
    let response = app
        .clone()
        .oneshot(post_request(&format!("/trips/{trip_id}/accept")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "Accepted");

    let response = app.oneshot(get_request("/trips/active")).await.unwrap();
    let active = body_json(response).await;
    assert_eq!(active["id"], trip_id.to_string());
    assert_eq!(active["status"], "Accepted");
}

#[tokio::test]
async fn accepting_an_invisible_trip_returns_404() {
    let (app, _state, _api, _rx) = setup();
    go_online(&app).await;

    let response = app
        .oneshot(post_request(&format!(
            "/trips/{}/accept",
            Uuid::from_u128(99)
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn going_offline_with_active_trip_returns_409() {
    let (app, state, api, _rx) = setup();
    api.insert_trip(pending_trip(1, 2));

    go_online(&app).await;
    state.coordinator.reconcile_pending().await.unwrap();
    accept_trip(&app, Uuid::from_u128(1)).await;

    let response = app
        .clone()
        .oneshot(post_request("/driver/offline"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // state unchanged and no session-end call went out
    let response = app.oneshot(get_request("/trips/active")).await.unwrap();
    let active = body_json(response).await;
    assert_eq!(active["status"], "Accepted");
    assert_eq!(api.end_session_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn location_update_auto_starts_trip_at_pickup() {
    let (app, state, api, _rx) = setup();
    api.insert_trip(pending_trip(1, 2));

    go_online(&app).await;
    state.coordinator.reconcile_pending().await.unwrap();
    accept_trip(&app, Uuid::from_u128(1)).await;

    let response = app
        .clone()
        .oneshot(patch_request(
            "/driver/location",
            json!({ "location": { "lat": PICKUP.lat, "lng": PICKUP.lng } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["trip_started"], true);

    let response = app.oneshot(get_request("/trips/active")).await.unwrap();
    let active = body_json(response).await;
    assert_eq!(active["status"], "OnGoing");
    assert_eq!(api.status_update_count(TripStatus::OnGoing), 1);
}

#[tokio::test]
async fn cancel_flow_resets_driver_to_idle() {
    let (app, state, api, _rx) = setup();
    api.insert_trip(pending_trip(1, 2));

    go_online(&app).await;
    state.coordinator.reconcile_pending().await.unwrap();
    let trip_id = Uuid::from_u128(1);
    accept_trip(&app, trip_id).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/trips/{trip_id}/cancel"),
            json!({ "reason": "Rider not at pickup location" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "Canceled");
    assert_eq!(body["cancellation_reason"], "Rider not at pickup location");

    let response = app
        .clone()
        .oneshot(get_request("/trips/active"))
        .await
        .unwrap();
    let active = body_json(response).await;
    assert!(active.is_null());

    let response = app.oneshot(get_request("/health")).await.unwrap();
    let health = body_json(response).await;
    assert_eq!(health["online"], true);
    assert_eq!(health["active_trip"], false);
}

#[tokio::test]
async fn cancel_without_reason_returns_400() {
    let (app, state, api, _rx) = setup();
    api.insert_trip(pending_trip(1, 2));

    go_online(&app).await;
    state.coordinator.reconcile_pending().await.unwrap();
    let trip_id = Uuid::from_u128(1);
    accept_trip(&app, trip_id).await;

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/trips/{trip_id}/cancel"),
            json!({ "reason": "   " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn decline_removes_request_from_pending() {
    let (app, state, api, _rx) = setup();
    api.insert_trip(pending_trip(1, 2));

    go_online(&app).await;
    state.coordinator.reconcile_pending().await.unwrap();

    let trip_id = Uuid::from_u128(1);
    let response = app
        .clone()
        .oneshot(post_request(&format!("/trips/{trip_id}/decline")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "Declined");

    let response = app.oneshot(get_request("/driver/state")).await.unwrap();
    let view = body_json(response).await;
    assert_eq!(view["pending_count"], 0);
    assert!(view["active_trip"].is_null());
}

#[tokio::test]
async fn driver_stats_survive_one_upstream_failure() {
    let (app, _state, api, _rx) = setup();
    api.fail_next_stats_calls(1);

    let response = app.oneshot(get_request("/driver/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["trips_completed"], 128);
    assert_eq!(api.stats_calls.load(Ordering::SeqCst), 2);
}
