// SPDX-License-Identifier: MIT

use crate::model::{
    AuthConfig, ProgressiveSyncState, Section, SectionSyncProgress, SyncPhase,
};
use crate::repository::{CatalogRepository, IndexOutcome};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay between index page fetches during background sync. Many panels
/// rate-limit or degrade under rapid sequential requests.
pub const BACKGROUND_THROTTLE: Duration = Duration::from_millis(200);
/// Relaxed throttle for a user-initiated "refresh now".
pub const MANUAL_THROTTLE: Duration = Duration::from_millis(100);
/// Fast-start budget: pages per section at this page size.
pub const FAST_START_PAGES: u32 = 2;
pub const FAST_START_PAGE_SIZE: u32 = 200;

const SIGNAL_RUNNING: u8 = 0;
const SIGNAL_PAUSE: u8 = 1;
const SIGNAL_CANCEL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    Continue,
    Pause,
    Cancel,
}

/// Cooperative three-state control checked at every unit of sync work.
/// Explicitly modelling pause keeps it distinguishable from cancellation:
/// pause transitions to a resumable state, cancel does not.
#[derive(Debug, Clone)]
pub struct SyncControl {
    inner: Arc<AtomicU8>,
}

impl SyncControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(SIGNAL_RUNNING)),
        }
    }

    pub fn signal(&self) -> SyncSignal {
        match self.inner.load(Ordering::SeqCst) {
            SIGNAL_PAUSE => SyncSignal::Pause,
            SIGNAL_CANCEL => SyncSignal::Cancel,
            _ => SyncSignal::Continue,
        }
    }

    pub fn request_pause(&self) {
        self.inner.store(SIGNAL_PAUSE, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.inner.store(SIGNAL_CANCEL, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.store(SIGNAL_RUNNING, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.load(Ordering::SeqCst) == SIGNAL_PAUSE
    }
}

impl Default for SyncControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings collaborator persisting the coordinator state across restarts.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn save_sync_state(&self, state: &ProgressiveSyncState, account_key: &str) -> Result<()>;
    async fn load_sync_state(&self, account_key: &str) -> Option<ProgressiveSyncState>;
}

/// JSON-file-backed store, one file per account next to the cache files.
#[derive(Debug)]
pub struct FileSyncStateStore {
    root: PathBuf,
}

impl FileSyncStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    fn path_for(&self, account_key: &str) -> PathBuf {
        self.root.join(format!("sync_state_{account_key}.json"))
    }
}

#[async_trait]
impl SyncStateStore for FileSyncStateStore {
    async fn save_sync_state(&self, state: &ProgressiveSyncState, account_key: &str) -> Result<()> {
        let content = serde_json::to_string(state)?;
        tokio::fs::write(self.path_for(account_key), content).await?;
        Ok(())
    }

    async fn load_sync_state(&self, account_key: &str) -> Option<ProgressiveSyncState> {
        let content = tokio::fs::read_to_string(self.path_for(account_key)).await.ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Drives the three sync intents (fast start, background full, on-demand
/// boost) on top of the repository. Holds no catalog data itself; it only
/// sequences repository index builds and publishes `ProgressiveSyncState`.
pub struct ProgressiveSyncCoordinator {
    repo: Arc<CatalogRepository>,
    store: Arc<dyn SyncStateStore>,
    account: AuthConfig,
    state: Mutex<ProgressiveSyncState>,
    state_tx: watch::Sender<ProgressiveSyncState>,
    control: SyncControl,
    throttle: Duration,
    manual_throttle: Duration,
    fast_start_job: Mutex<Option<JoinHandle<()>>>,
    background_job: Mutex<Option<JoinHandle<()>>>,
    boost_jobs: Mutex<HashMap<Section, JoinHandle<()>>>,
    /// Sections with a boost currently in flight; guarded separately so a
    /// boost check never contends with state persistence.
    active_sections: Arc<Mutex<HashSet<Section>>>,
}

impl ProgressiveSyncCoordinator {
    /// Restores persisted state. A phase that implies a running job (fast
    /// start, background) maps back to `Idle` on load since the job died with
    /// the process, while completed flags and `Paused` survive.
    pub async fn new(
        repo: Arc<CatalogRepository>,
        store: Arc<dyn SyncStateStore>,
        account: AuthConfig,
    ) -> Arc<Self> {
        let loaded = store
            .load_sync_state(&account.account_hash())
            .await
            .map(Self::sanitize_loaded)
            .unwrap_or_default();
        let (state_tx, _) = watch::channel(loaded.clone());
        Arc::new(Self {
            repo,
            store,
            account,
            state: Mutex::new(loaded),
            state_tx,
            control: SyncControl::new(),
            throttle: BACKGROUND_THROTTLE,
            manual_throttle: MANUAL_THROTTLE,
            fast_start_job: Mutex::new(None),
            background_job: Mutex::new(None),
            boost_jobs: Mutex::new(HashMap::new()),
            active_sections: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    fn sanitize_loaded(mut state: ProgressiveSyncState) -> ProgressiveSyncState {
        match state.phase {
            SyncPhase::FastStart | SyncPhase::BackgroundFull | SyncPhase::OnDemandBoost => {
                state.phase = SyncPhase::Idle;
            }
            _ => {}
        }
        state.current_section = None;
        state
    }

    /// Observers receive every published state transition.
    pub fn state_stream(&self) -> watch::Receiver<ProgressiveSyncState> {
        self.state_tx.subscribe()
    }

    pub async fn current_state(&self) -> ProgressiveSyncState {
        self.state.lock().await.clone()
    }

    /// Mutates, persists, then publishes. Persisting on every transition is
    /// what lets a killed process resume in a sensible phase.
    async fn set_state<F: FnOnce(&mut ProgressiveSyncState)>(&self, mutate: F) {
        let snapshot = {
            let mut state = self.state.lock().await;
            mutate(&mut state);
            state.clone()
        };
        if let Err(e) = self
            .store
            .save_sync_state(&snapshot, &self.account.account_hash())
            .await
        {
            warn!(error = %e, "failed to persist sync state");
        }
        let _ = self.state_tx.send(snapshot);
    }

    /// Fast start: a bounded number of pages per section so search becomes
    /// minimally usable right after login. Idempotent: already-ready is a
    /// no-op.
    pub async fn start_fast_start(self: &Arc<Self>) {
        if self.state.lock().await.fast_start_ready {
            debug!("fast start already ready");
            return;
        }
        let mut job_slot = self.fast_start_job.lock().await;
        if job_slot.as_ref().is_some_and(|j| !j.is_finished()) {
            return;
        }

        self.set_state(|s| s.phase = SyncPhase::FastStart).await;
        let this = Arc::clone(self);
        *job_slot = Some(tokio::spawn(async move {
            let mut failed = false;
            for section in Section::indexable() {
                match this
                    .repo
                    .fast_index_section(section, &this.account, FAST_START_PAGES, FAST_START_PAGE_SIZE)
                    .await
                {
                    Ok(items) => {
                        debug!(section = section.as_str(), items, "fast start section indexed");
                    }
                    Err(e) => {
                        warn!(section = section.as_str(), error = %e, "fast start section failed");
                        failed = true;
                    }
                }
            }
            this.set_state(|s| {
                s.phase = SyncPhase::Idle;
                if !failed {
                    s.fast_start_ready = true;
                }
            })
            .await;
            info!(failed, "fast start finished");
        }));
    }

    /// Launches the full background index build. Skips sections already
    /// complete unless `force`; `force` also re-indexes from scratch.
    pub async fn start_background_full(self: &Arc<Self>, force: bool) {
        self.start_background_inner(force, self.throttle).await;
    }

    /// User-initiated "refresh library": forced full reindex with the relaxed
    /// throttle.
    pub async fn start_manual_sync(self: &Arc<Self>) {
        self.start_background_inner(true, self.manual_throttle).await;
    }

    async fn start_background_inner(self: &Arc<Self>, force: bool, throttle: Duration) {
        let mut job_slot = self.background_job.lock().await;
        if job_slot.as_ref().is_some_and(|j| !j.is_finished()) {
            debug!("background sync already running");
            return;
        }

        self.control.resume();
        self.set_state(|s| {
            s.phase = SyncPhase::BackgroundFull;
            s.is_paused = false;
            if force {
                s.sections_completed.clear();
                s.full_index_complete = false;
            }
        })
        .await;

        let this = Arc::clone(self);
        *job_slot = Some(tokio::spawn(async move {
            this.run_background_loop(force, throttle).await;
        }));
    }

    async fn run_background_loop(self: &Arc<Self>, force: bool, throttle: Duration) {
        for section in Section::indexable() {
            if !force && self.state.lock().await.sections_completed.contains(&section) {
                continue;
            }
            self.set_state(|s| s.current_section = Some(section)).await;

            let outcome = self
                .repo
                .build_section_index(section, &self.account, force, throttle, Some(&self.control))
                .await;

            match outcome {
                Ok(IndexOutcome::Completed { items }) => {
                    self.set_state(|s| {
                        s.sections_completed.insert(section);
                        s.section_progress.insert(
                            section,
                            SectionSyncProgress {
                                items_indexed: items,
                                complete: true,
                            },
                        );
                    })
                    .await;
                }
                Ok(IndexOutcome::Paused { items }) => {
                    // The expected path into PAUSED: the pause flag was set
                    // while this section was mid-build.
                    self.set_state(|s| {
                        s.phase = SyncPhase::Paused;
                        s.is_paused = true;
                        s.current_section = None;
                        s.section_progress.insert(
                            section,
                            SectionSyncProgress {
                                items_indexed: items,
                                complete: false,
                            },
                        );
                    })
                    .await;
                    info!(section = section.as_str(), "background sync paused");
                    return;
                }
                Ok(IndexOutcome::Cancelled { .. }) => {
                    self.set_state(|s| {
                        s.phase = SyncPhase::Idle;
                        s.is_paused = false;
                        s.current_section = None;
                    })
                    .await;
                    info!(section = section.as_str(), "background sync cancelled");
                    return;
                }
                Err(e) => {
                    // Unrecoverable for this run; not resumable without a
                    // fresh start, so back to Idle rather than Paused.
                    warn!(section = section.as_str(), error = %e, "background sync failed");
                    self.set_state(|s| {
                        s.phase = SyncPhase::Idle;
                        s.is_paused = false;
                        s.current_section = None;
                    })
                    .await;
                    return;
                }
            }
        }

        self.set_state(|s| {
            s.phase = SyncPhase::Complete;
            s.full_index_complete = true;
            s.current_section = None;
            s.last_sync_timestamp = Some(chrono::Utc::now());
        })
        .await;
        // A completed full sync satisfies any outstanding refresh request.
        self.repo
            .disk_cache()
            .clear_refresh_marker(&self.account)
            .await;
        info!("background full sync complete");
    }

    /// Requests a cooperative pause; the background loop observes the flag at
    /// its next unit of work and transitions to `Paused`.
    pub async fn pause(&self) {
        self.control.request_pause();
        debug!("pause requested");
    }

    /// Resumes a paused background sync from the persisted checkpoints.
    pub async fn resume(self: &Arc<Self>) {
        if !self.state.lock().await.is_paused {
            return;
        }
        self.control.resume();
        // Not forced: completed sections stay done, the interrupted section
        // continues from its checkpoint.
        self.start_background_full(false).await;
    }

    /// On-demand boost when the user navigates into a not-yet-indexed
    /// section. Skipped when already complete or already mid-sync.
    pub async fn boost_section(self: &Arc<Self>, section: Section) {
        if section.content_type().is_none() {
            return;
        }
        {
            let state = self.state.lock().await;
            if state.sections_completed.contains(&section) {
                return;
            }
            // The background loop owns this section right now; a concurrent
            // boost would duplicate fetches and race its checkpoint writes.
            if state.current_section == Some(section) {
                debug!(section = section.as_str(), "section already building in background");
                return;
            }
        }
        {
            let mut active = self.active_sections.lock().await;
            if active.contains(&section) {
                debug!(section = section.as_str(), "boost already in flight");
                return;
            }
            active.insert(section);
        }

        let this = Arc::clone(self);
        let job = tokio::spawn(async move {
            let outcome = this
                .repo
                .build_section_index(section, &this.account, false, Duration::ZERO, Some(&this.control))
                .await;
            match &outcome {
                Ok(IndexOutcome::Completed { items }) => {
                    let items = *items;
                    this.set_state(|s| {
                        s.sections_completed.insert(section);
                        s.section_progress.insert(
                            section,
                            SectionSyncProgress {
                                items_indexed: items,
                                complete: true,
                            },
                        );
                    })
                    .await;
                    info!(section = section.as_str(), items, "boost complete");
                }
                Ok(_) => debug!(section = section.as_str(), "boost interrupted"),
                Err(e) => warn!(section = section.as_str(), error = %e, "boost failed"),
            }
            // Always release the section, whatever the outcome; a failed
            // boost must not leave the section stuck marked active.
            this.active_sections.lock().await.remove(&section);
        });
        self.boost_jobs.lock().await.insert(section, job);
    }

    pub async fn active_boost_sections(&self) -> HashSet<Section> {
        self.active_sections.lock().await.clone()
    }

    /// Cancels every outstanding job and clears the active-section set. Safe
    /// to call from a teardown path: lock acquisition is attempted without
    /// blocking first, with an async fallback when contested.
    pub fn cancel_all_syncs(self: &Arc<Self>) {
        self.control.request_cancel();

        match self.fast_start_job.try_lock() {
            Ok(mut slot) => {
                if let Some(job) = slot.take() {
                    job.abort();
                }
            }
            Err(_) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    if let Some(job) = this.fast_start_job.lock().await.take() {
                        job.abort();
                    }
                });
            }
        }

        match self.background_job.try_lock() {
            Ok(mut slot) => {
                if let Some(job) = slot.take() {
                    job.abort();
                }
            }
            Err(_) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    if let Some(job) = this.background_job.lock().await.take() {
                        job.abort();
                    }
                });
            }
        }

        match self.boost_jobs.try_lock() {
            Ok(mut jobs) => {
                for (_, job) in jobs.drain() {
                    job.abort();
                }
            }
            Err(_) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    for (_, job) in this.boost_jobs.lock().await.drain() {
                        job.abort();
                    }
                });
            }
        }

        match self.active_sections.try_lock() {
            Ok(mut active) => active.clear(),
            Err(_) => {
                let active = Arc::clone(&self.active_sections);
                tokio::spawn(async move {
                    active.lock().await.clear();
                });
            }
        }
        info!("all syncs cancelled");
    }

    /// Waits for the currently-running jobs to settle; test and CLI helper.
    pub async fn join_running_jobs(&self) {
        let fast = self.fast_start_job.lock().await.take();
        if let Some(job) = fast {
            let _ = job.await;
        }
        let background = self.background_job.lock().await.take();
        if let Some(job) = background {
            let _ = job.await;
        }
        let boosts: Vec<JoinHandle<()>> = {
            let mut jobs = self.boost_jobs.lock().await;
            jobs.drain().map(|(_, j)| j).collect()
        };
        for job in boosts {
            let _ = job.await;
        }
    }
}
