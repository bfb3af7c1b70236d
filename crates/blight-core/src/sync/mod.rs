//! Sync engine
//!
//! Orchestrates the three sync flows against the remote API: prediction
//! upload, remedy pull, and catalog update check. One cycle at a time;
//! a trigger while offline, signed out, or mid-cycle is a no-op. Flows
//! fail independently and partial progress is always kept, so the next
//! cycle simply retries whatever is still pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{ApiError, SyncApi, SyncResultStatus};
use crate::auth::SessionManager;
use crate::db::{
    CatalogRepository, PredictionRepository, RemedyRepository, SettingsRepository,
};
use crate::models::PredictionId;
use crate::reachability::ReachabilityMonitor;
use crate::store::LocalStore;

/// Cursor setting for the remedy pull flow
const LAST_REMEDY_SYNC_KEY: &str = "last_remedy_sync";
/// Timestamp of the last fully successful cycle
const LAST_FULL_SYNC_KEY: &str = "last_full_sync";

/// Settle delay after a reconnect before autosync kicks in, debouncing
/// flapping connections
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] crate::error::Error),
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

/// Observable engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing { progress: u8 },
    Success { at: DateTime<Utc> },
    Error { message: String },
}

/// What one flow accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowOutcome {
    /// Records confirmed by the server (or rows upserted on a pull)
    pub synced: usize,
    /// Per-item rejections, kept locally for the next cycle
    pub rejected: usize,
}

/// Per-flow results of one cycle
#[derive(Debug)]
pub struct SyncReport {
    pub predictions: Result<FlowOutcome, SyncError>,
    pub remedies: Result<FlowOutcome, SyncError>,
    pub models: Result<FlowOutcome, SyncError>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    /// Whether every flow completed (item-level rejections included;
    /// those are retained for retry, not cycle failures)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.predictions.is_ok() && self.remedies.is_ok() && self.models.is_ok()
    }

    fn failure_summary(&self) -> String {
        let mut parts = Vec::new();
        for (flow, result) in [
            ("predictions", &self.predictions),
            ("remedies", &self.remedies),
            ("models", &self.models),
        ] {
            if let Err(error) = result {
                parts.push(format!("{flow}: {error}"));
            }
        }
        parts.join("; ")
    }
}

/// Pending-work snapshot for status displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOverview {
    pub pending_predictions: usize,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub online: bool,
}

/// The sync orchestrator.
///
/// Constructed once per app session with its collaborators injected;
/// share it behind an [`Arc`].
pub struct SyncEngine {
    store: Arc<LocalStore>,
    api: Arc<dyn SyncApi>,
    session: Arc<SessionManager>,
    monitor: ReachabilityMonitor,
    status: watch::Sender<SyncStatus>,
    running: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        api: Arc<dyn SyncApi>,
        session: Arc<SessionManager>,
        monitor: ReachabilityMonitor,
    ) -> Self {
        let (status, _receiver) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            api,
            session,
            monitor,
            status,
            running: AtomicBool::new(false),
        }
    }

    /// Current engine status
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status transitions (progress, success, error)
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Request one sync cycle.
    ///
    /// App start, reconnect, and manual refresh all come through here.
    /// Returns `None` without doing anything when offline, signed out,
    /// or when a cycle is already running (ignored, not queued).
    pub async fn trigger(&self) -> Option<SyncReport> {
        if !self.monitor.is_online() {
            tracing::debug!("Sync trigger ignored: offline");
            return None;
        }
        let Some(user) = self.session.current_user() else {
            tracing::debug!("Sync trigger ignored: no signed-in user");
            return None;
        };
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync trigger ignored: cycle already running");
            return None;
        }

        let report = self.run_cycle(&user.id).await;
        self.running.store(false, Ordering::SeqCst);
        Some(report)
    }

    /// Pending-work snapshot for the UI/CLI
    pub async fn overview(&self) -> Result<SyncOverview, SyncError> {
        let pending_predictions = match self.session.current_user() {
            Some(user) => self.store.predictions()?.count_unsynced(&user.id).await?,
            None => 0,
        };
        let last_full_sync = self
            .store
            .settings()?
            .get(LAST_FULL_SYNC_KEY)
            .await?
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|at| at.with_timezone(&Utc))
                    .ok()
            });
        Ok(SyncOverview {
            pending_predictions,
            last_full_sync,
            online: self.monitor.is_online(),
        })
    }

    /// Spawn the reconnect watcher: one cycle per offline→online
    /// transition while signed in, after `settle_delay`
    pub fn spawn_autosync(self: &Arc<Self>, settle_delay: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut receiver = engine.monitor.subscribe();
        // Captured before the task runs, so a transition between spawn
        // and first poll still counts as a transition.
        let mut was_online = *receiver.borrow();
        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let online = *receiver.borrow_and_update();
                let came_online = online && !was_online;
                was_online = online;
                if !came_online || !engine.session.is_authenticated() {
                    continue;
                }

                tokio::time::sleep(settle_delay).await;
                if !engine.monitor.is_online() {
                    // Connection flapped during the settle window.
                    continue;
                }
                engine.trigger().await;
            }
        })
    }

    async fn run_cycle(&self, user_id: &str) -> SyncReport {
        tracing::info!("Sync cycle started");
        self.set_status(SyncStatus::Syncing { progress: 0 });

        self.set_status(SyncStatus::Syncing { progress: 25 });
        let predictions = self.upload_predictions(user_id).await;
        if let Err(error) = &predictions {
            tracing::warn!("Prediction upload failed: {error}");
        }

        self.set_status(SyncStatus::Syncing { progress: 50 });
        let remedies = self.pull_remedies().await;
        if let Err(error) = &remedies {
            tracing::warn!("Remedy pull failed: {error}");
        }

        self.set_status(SyncStatus::Syncing { progress: 75 });
        let models = self.check_model_updates().await;
        if let Err(error) = &models {
            tracing::warn!("Catalog update check failed: {error}");
        }

        self.set_status(SyncStatus::Syncing { progress: 100 });

        let report = SyncReport {
            predictions,
            remedies,
            models,
            completed_at: Utc::now(),
        };

        if report.is_success() {
            self.record_full_sync(report.completed_at).await;
            tracing::info!("Sync cycle completed");
            self.set_status(SyncStatus::Success {
                at: report.completed_at,
            });
        } else {
            let message = report.failure_summary();
            tracing::warn!("Sync cycle finished with failures: {message}");
            self.set_status(SyncStatus::Error { message });
        }

        report
    }

    /// Flow 1: upload every unsynced prediction in one batch.
    ///
    /// At-least-once delivery: the client id is the idempotency key, so
    /// resubmitting records whose acknowledgment got lost is safe. Only
    /// server-accepted ids flip to synced, stamped with the server's
    /// clock; rejected items stay queued untouched.
    async fn upload_predictions(&self, user_id: &str) -> Result<FlowOutcome, SyncError> {
        let unsynced = self.store.predictions()?.list_unsynced(user_id).await?;
        if unsynced.is_empty() {
            return Ok(FlowOutcome::default());
        }

        let response = self.api.sync_predictions(&unsynced).await?;

        let accepted: Vec<PredictionId> = response
            .results
            .iter()
            .filter(|result| result.status == SyncResultStatus::Success)
            .filter_map(|result| result.client_id.parse().ok())
            .collect();
        for rejection in response
            .results
            .iter()
            .filter(|result| result.status == SyncResultStatus::Error)
        {
            tracing::warn!(
                "Server rejected prediction {}: {}",
                rejection.client_id,
                rejection.message.as_deref().unwrap_or("unknown reason")
            );
        }

        if !accepted.is_empty() {
            self.store
                .predictions()?
                .mark_synced(&accepted, response.sync_time)
                .await?;
        }

        Ok(FlowOutcome {
            synced: accepted.len(),
            rejected: response.results.len() - accepted.len(),
        })
    }

    /// Flow 2: incremental remedy pull.
    ///
    /// The cursor only moves to the server-reported sync time, and only
    /// when records actually arrived; an empty delta or any failure
    /// leaves it untouched so the next cycle retries the same window.
    async fn pull_remedies(&self) -> Result<FlowOutcome, SyncError> {
        let cursor = self.store.settings()?.get(LAST_REMEDY_SYNC_KEY).await?;
        let response = self.api.pull_remedies(cursor.as_deref()).await?;

        if response.remedies.is_empty() {
            return Ok(FlowOutcome::default());
        }

        self.store.remedies()?.upsert_all(&response.remedies).await?;
        self.store
            .settings()?
            .set(LAST_REMEDY_SYNC_KEY, &response.sync_time.to_rfc3339())
            .await?;

        Ok(FlowOutcome {
            synced: response.remedies.len(),
            rejected: 0,
        })
    }

    /// Flow 3: catalog update check.
    ///
    /// Persists the new entry's metadata row only; fetching the
    /// artifact itself is a separate operation triggered elsewhere.
    async fn check_model_updates(&self) -> Result<FlowOutcome, SyncError> {
        let current = {
            let catalog = self.store.catalog()?;
            match catalog.get_active().await? {
                Some(entry) => Some(entry),
                None => catalog.get_default().await?,
            }
        };

        let query = current
            .as_ref()
            .map(|entry| (entry.name.as_str(), entry.version.as_str()));
        let response = self.api.check_model_updates(query).await?;

        if let (true, Some(entry)) = (response.update_available, response.current_model) {
            self.store.catalog()?.upsert(&entry).await?;
            tracing::info!("New classifier available: {} {}", entry.name, entry.version);
            return Ok(FlowOutcome {
                synced: 1,
                rejected: 0,
            });
        }
        Ok(FlowOutcome::default())
    }

    async fn record_full_sync(&self, at: DateTime<Utc>) {
        let result = async {
            self.store
                .settings()?
                .set(LAST_FULL_SYNC_KEY, &at.to_rfc3339())
                .await
        }
        .await;
        if let Err(error) = result {
            tracing::debug!("Could not record full sync time: {error}");
        }
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
    }
}
