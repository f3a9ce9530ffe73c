use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::snapshot::SnapshotKind;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub value: serde_json::Value,
    pub written_at: DateTime<Utc>,
}

/// Per-driver key-value persistence for last-good snapshots. Last write wins;
/// the coordinator is the only writer for its own keys.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), AppError>;
    async fn get(&self, key: &str) -> Result<Option<Snapshot>, AppError>;
    async fn remove(&self, key: &str) -> Result<(), AppError>;
}

pub struct MemorySnapshotStore {
    entries: DashMap<String, Snapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), AppError> {
        self.entries.insert(
            key.to_string(),
            Snapshot {
                value,
                written_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Snapshot>, AppError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Whether a value came from the remote API or from the last-good snapshot.
/// Cached values are advisory and must not downgrade locally-confirmed state.
pub struct Fetched<T> {
    pub value: T,
    pub from_cache: bool,
}

/// Try remote, overwrite the kind's snapshot on success, fall back to the
/// last-good snapshot on failure. One implementation for every data kind.
pub async fn fetch_with_fallback<T, F, Fut>(
    store: &dyn SnapshotStore,
    metrics: &Metrics,
    kind: SnapshotKind,
    driver_id: Uuid,
    fetch: F,
) -> Result<Fetched<T>, AppError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let key = kind.key(driver_id);

    match fetch().await {
        Ok(value) => {
            match serde_json::to_value(&value) {
                Ok(json) => {
                    if let Err(err) = store.put(&key, json).await {
                        warn!(error = %err, key, "snapshot write failed");
                    }
                }
                Err(err) => warn!(error = %err, key, "snapshot serialization failed"),
            }

            Ok(Fetched {
                value,
                from_cache: false,
            })
        }
        Err(fetch_err) => {
            let snapshot = store.get(&key).await.unwrap_or_else(|err| {
                warn!(error = %err, key, "snapshot read failed");
                None
            });

            match snapshot {
                Some(snapshot) => {
                    let value: T = serde_json::from_value(snapshot.value).map_err(|err| {
                        AppError::Internal(format!("corrupt snapshot {key}: {err}"))
                    })?;

                    warn!(
                        error = %fetch_err,
                        kind = kind.as_str(),
                        written_at = %snapshot.written_at,
                        "remote fetch failed, serving last-good snapshot"
                    );
                    metrics
                        .snapshot_fallbacks_total
                        .with_label_values(&[kind.as_str()])
                        .inc();

                    Ok(Fetched {
                        value,
                        from_cache: true,
                    })
                }
                None => Err(fetch_err),
            }
        }
    }
}
