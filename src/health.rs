use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Initializing,
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<DateTime<Utc>>,
}

/// Shared health of the running monitor, read by `/health`.
#[derive(Debug, Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthSnapshot>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthSnapshot {
                status: HealthStatus::Starting,
                error: None,
                last_cycle: None,
            })),
        }
    }

    pub async fn set(&self, status: HealthStatus, error: Option<String>) {
        let mut snapshot = self.inner.write().await;
        snapshot.status = status;
        snapshot.error = error;
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        self.inner.read().await.clone()
    }

    /// Ok after a clean cycle, degraded with the joined messages otherwise.
    pub async fn record_cycle(&self, errors: &[String]) {
        let mut snapshot = self.inner.write().await;
        snapshot.last_cycle = Some(Utc::now());
        if errors.is_empty() {
            snapshot.status = HealthStatus::Ok;
            snapshot.error = None;
        } else {
            snapshot.status = HealthStatus::Degraded;
            snapshot.error = Some(errors.join("; "));
        }
    }
}
