//! Persistent subagent run registry.
//!
//! Records live in memory and are mirrored to `<dir>/registry.json` after
//! every mutation. The file is read once on first use; a missing, unreadable
//! or malformed file degrades to an empty registry with a warning, never to an
//! error for the caller.
//!
//! A background sweeper evicts records whose `archiveAtMs` has passed. It is
//! armed by [`register_run`](SubagentRegistry::register_run) or by loading a
//! non-empty file, and disarms itself once the registry is empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{CleanupPolicy, RunId, RunPatch, SubagentRunRecord, now_ms};
use courier_settings::SubagentSettings;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::errors::RegistryError;

/// Registry file name inside the subagents directory.
const REGISTRY_FILE_NAME: &str = "registry.json";

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type RunMap = BTreeMap<RunId, SubagentRunRecord>;

/// Removes a child session once its run is deleted or archived.
#[async_trait]
pub trait SessionReaper: Send + Sync {
    /// Delete the session identified by `session_key`.
    async fn reap_session(&self, session_key: &str) -> Result<(), RegistryError>;
}

/// Registry file path under `dir`.
pub fn registry_file_path(dir: &Path) -> PathBuf {
    dir.join(REGISTRY_FILE_NAME)
}

/// Shared handle to the run registry. Clones share state.
#[derive(Clone)]
pub struct SubagentRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    sweep_interval: Duration,
    reaper: Option<Arc<dyn SessionReaper>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    loaded: bool,
    runs: RunMap,
    sweeper: Option<CancellationToken>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().sweeper.take() {
            token.cancel();
        }
    }
}

impl Inner {
    /// First read of the file. Runs restored from disk re-arm the sweeper.
    fn ensure_loaded(self: &Arc<Self>, state: &mut State) {
        if state.loaded {
            return;
        }
        state.runs = match read_runs(&self.path) {
            Ok(Some(runs)) => runs,
            Ok(None) => RunMap::new(),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to load subagent registry, starting empty");
                RunMap::new()
            }
        };
        state.loaded = true;
        debug!(path = %self.path.display(), runs = state.runs.len(), "subagent registry loaded");
        if !state.runs.is_empty() {
            arm_sweeper(self, state);
        }
    }

    /// Re-read the file, keeping the in-memory map if it cannot be read.
    fn reload(&self, state: &mut State) {
        match read_runs(&self.path) {
            Ok(Some(runs)) => state.runs = runs,
            Ok(None) => {}
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to reload subagent registry");
            }
        }
        state.loaded = true;
    }

    fn persist(&self, runs: &RunMap) {
        if let Err(error) = write_runs(&self.path, runs) {
            warn!(path = %self.path.display(), %error, "failed to save subagent registry");
        }
    }
}

fn read_runs(path: &Path) -> Result<Option<RunMap>, RegistryError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&data)?))
}

fn write_runs(path: &Path, runs: &RunMap) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(runs)?;
    std::fs::write(path, json)?;
    Ok(())
}

impl SubagentRegistry {
    /// Registry stored in `dir` with the default sweep interval and no reaper.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_options(dir, DEFAULT_SWEEP_INTERVAL, None)
    }

    /// Registry stored in `dir`.
    pub fn with_options(
        dir: impl Into<PathBuf>,
        sweep_interval: Duration,
        reaper: Option<Arc<dyn SessionReaper>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: registry_file_path(&dir.into()),
                sweep_interval: sweep_interval.max(Duration::from_millis(1)),
                reaper,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Registry configured from settings.
    pub fn from_settings(settings: &SubagentSettings, reaper: Option<Arc<dyn SessionReaper>>) -> Self {
        Self::with_options(
            settings.resolved_dir(),
            Duration::from_millis(settings.sweep_interval_ms),
            reaper,
        )
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Read the backing file if it has not been read yet.
    pub fn load(&self) {
        let mut state = self.inner.state.lock();
        self.inner.ensure_loaded(&mut state);
    }

    /// Write the whole map to disk. Failures are logged.
    pub fn save(&self) {
        let state = self.inner.state.lock();
        self.inner.persist(&state.runs);
    }

    fn with_loaded<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.inner.state.lock();
        self.inner.ensure_loaded(&mut state);
        f(&mut state)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a run and make sure the sweeper is armed.
    pub fn register_run(&self, record: SubagentRunRecord) {
        let run_id = record.run_id.clone();
        self.with_loaded(|state| {
            let _ = state.runs.insert(run_id.clone(), record);
            self.inner.persist(&state.runs);
            arm_sweeper(&self.inner, state);
        });
        debug!(%run_id, "registered subagent run");
    }

    /// Merge `patch` into a run. Returns `false` for an unknown run.
    pub fn update_run(&self, run_id: &RunId, patch: RunPatch) -> bool {
        self.with_loaded(|state| {
            let Some(record) = state.runs.get_mut(run_id) else {
                return false;
            };
            patch.apply(record);
            self.inner.persist(&state.runs);
            true
        })
    }

    /// Remove a run, returning it if it existed.
    pub fn delete_run(&self, run_id: &RunId) -> Option<SubagentRunRecord> {
        self.with_loaded(|state| {
            let removed = state.runs.remove(run_id);
            if removed.is_some() {
                self.inner.persist(&state.runs);
            }
            removed
        })
    }

    /// A copy of one run.
    pub fn get_run(&self, run_id: &RunId) -> Option<SubagentRunRecord> {
        self.with_loaded(|state| state.runs.get(run_id).cloned())
    }

    /// Every run, oldest first.
    pub fn list_runs(&self) -> Vec<SubagentRunRecord> {
        self.with_loaded(|state| sorted(state.runs.values()))
    }

    /// Runs spawned by `requester_key`, oldest first. A blank key matches
    /// nothing.
    pub fn list_runs_for_requester(&self, requester_key: &str) -> Vec<SubagentRunRecord> {
        let key = requester_key.trim();
        if key.is_empty() {
            return Vec::new();
        }
        self.with_loaded(|state| {
            sorted(
                state
                    .runs
                    .values()
                    .filter(|r| r.requester_session_key.trim() == key),
            )
        })
    }

    /// Number of runs spawned by `requester_key` that have not ended.
    pub fn count_active_runs_for_requester(&self, requester_key: &str) -> usize {
        self.list_runs_for_requester(requester_key)
            .iter()
            .filter(|r| r.is_active())
            .count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cleanup
    // ─────────────────────────────────────────────────────────────────────────

    /// Claim the cleanup of a run. Only the first call for a known run
    /// returns `true`.
    pub fn begin_cleanup(&self, run_id: &RunId) -> bool {
        self.with_loaded(|state| {
            let Some(record) = state.runs.get_mut(run_id) else {
                return false;
            };
            if record.cleanup_handled.unwrap_or(false) {
                return false;
            }
            record.cleanup_handled = Some(true);
            self.inner.persist(&state.runs);
            true
        })
    }

    /// Apply the run's cleanup policy: `delete` removes the run and reaps its
    /// child session, `keep` stamps `cleanupCompletedAt`. Returns `false` for
    /// an unknown run.
    pub async fn finalize_cleanup(&self, run_id: &RunId, now: i64) -> bool {
        let reap = self.with_loaded(|state| {
            let policy = state.runs.get(run_id)?.cleanup;
            let reap = match policy {
                CleanupPolicy::Delete => state.runs.remove(run_id).map(|r| r.child_session_key),
                CleanupPolicy::Keep => {
                    if let Some(record) = state.runs.get_mut(run_id) {
                        record.cleanup_completed_at = Some(now);
                    }
                    None
                }
            };
            self.inner.persist(&state.runs);
            Some(reap)
        });

        match reap {
            None => false,
            Some(child) => {
                debug!(%run_id, deleted = child.is_some(), "subagent cleanup finalized");
                self.reap_sessions(child.into_iter()).await;
                true
            }
        }
    }

    async fn reap_sessions(&self, session_keys: impl Iterator<Item = String>) {
        let Some(reaper) = &self.inner.reaper else {
            return;
        };
        let results = join_all(session_keys.map(|key| async move {
            let result = reaper.reap_session(&key).await;
            (key, result)
        }))
        .await;
        for (key, result) in results {
            if let Err(error) = result {
                warn!(session = %key, %error, "failed to reap child session");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sweeper
    // ─────────────────────────────────────────────────────────────────────────

    /// Arm the periodic sweeper. No-op if already armed or outside a Tokio
    /// runtime.
    pub fn start_sweeper(&self) {
        let mut state = self.inner.state.lock();
        arm_sweeper(&self.inner, &mut state);
    }

    /// Disarm the sweeper.
    pub fn stop_sweeper(&self) {
        if let Some(token) = self.inner.state.lock().sweeper.take() {
            token.cancel();
            debug!("subagent sweeper stopped");
        }
    }

    /// Whether the sweeper is currently armed.
    pub fn is_sweeper_armed(&self) -> bool {
        self.inner.state.lock().sweeper.is_some()
    }

    /// Run one sweep now.
    pub async fn sweep(&self) -> Vec<SubagentRunRecord> {
        self.sweep_at(now_ms()).await
    }

    /// Run one sweep as of `now`: reload the file, evict expired runs, save
    /// if anything changed, then reap the evicted child sessions. Disarms the
    /// sweeper once the registry is empty.
    pub async fn sweep_at(&self, now: i64) -> Vec<SubagentRunRecord> {
        let evicted = {
            let mut state = self.inner.state.lock();
            self.inner.reload(&mut state);

            let mut evicted = Vec::new();
            state.runs.retain(|_, record| {
                if record.is_expired(now) {
                    evicted.push(record.clone());
                    false
                } else {
                    true
                }
            });
            if !evicted.is_empty() {
                self.inner.persist(&state.runs);
            }
            if state.runs.is_empty() {
                if let Some(token) = state.sweeper.take() {
                    token.cancel();
                    debug!("subagent registry empty, sweeper disarmed");
                }
            }
            evicted
        };

        if !evicted.is_empty() {
            info!(count = evicted.len(), "archived expired subagent runs");
            self.reap_sessions(evicted.iter().map(|r| r.child_session_key.clone()))
                .await;
        }
        evicted
    }
}

fn sorted<'a>(records: impl Iterator<Item = &'a SubagentRunRecord>) -> Vec<SubagentRunRecord> {
    let mut out: Vec<SubagentRunRecord> = records.cloned().collect();
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
    out
}

fn arm_sweeper(inner: &Arc<Inner>, state: &mut State) {
    if state.sweeper.is_some() {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!("no tokio runtime, subagent sweeper not armed");
        return;
    };

    let token = CancellationToken::new();
    let cancel = token.clone();
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let interval = inner.sweep_interval;
    let span = info_span!("subagent_sweeper", interval_ms = interval.as_millis());

    let _ = handle.spawn(
        async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let _ = SubagentRegistry { inner }.sweep().await;
            }
            debug!("subagent sweeper exited");
        }
        .instrument(span),
    );
    state.sweeper = Some(token);
    debug!(interval_ms = interval.as_millis(), "subagent sweeper armed");
}
