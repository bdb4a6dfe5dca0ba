//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::mirror::LogMirror;
use crate::remote::RemoteLog;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_core::{
    Action, ActionOutcome, ActionType, CoreResult, EntityConflict, LedgerStore, Origin, Rejection,
};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run has happened yet.
    Idle,
    /// Importing remote rows.
    Pulling,
    /// Exporting the local queue.
    Pushing,
    /// Replaying the remote log into a fresh ledger.
    Rebuilding,
    /// The last run completed.
    Synced,
    /// The last run failed.
    Error,
    /// Waiting before retrying a failed run.
    RetryWait,
}

impl SyncState {
    /// Returns true while a run is doing work.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pulling | SyncState::Pushing | SyncState::Rebuilding
        )
    }
}

/// Counters across the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that completed.
    pub cycles_completed: u64,
    /// Remote rows imported.
    pub actions_pulled: u64,
    /// Local actions appended to the remote.
    pub actions_pushed: u64,
    /// Mirror conflicts hit while pushing.
    pub conflicts: u64,
    /// Runs that ended in a rebuild.
    pub rebuilds: u64,
    /// Retries made by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// When the last run completed.
    pub last_sync_time: Option<Instant>,
    /// Message of the last failed run, cleared by the next success.
    pub last_error: Option<String>,
}

/// Figures for one run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Remote rows imported.
    pub pulled: u64,
    /// Local actions appended to the remote.
    pub pushed: u64,
    /// Mirror conflicts hit while pushing.
    pub conflicts: u32,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct SyncOutcome {
    /// The ledger to use from now on. Differs from the input when `rebuilt`.
    pub store: Arc<LedgerStore>,
    /// Figures for the run.
    pub report: SyncReport,
    /// Whether the run replaced the ledger with a rebuilt one.
    pub rebuilt: bool,
}

/// Produces empty ledgers for rebuilds.
pub trait LedgerFactory: Send + Sync {
    /// Creates a new, empty ledger.
    fn create(&self) -> CoreResult<LedgerStore>;
}

impl<F> LedgerFactory for F
where
    F: Fn() -> CoreResult<LedgerStore> + Send + Sync,
{
    fn create(&self) -> CoreResult<LedgerStore> {
        self()
    }
}

/// Holds the engine's run flag; clears it on drop.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct PullSummary {
    count: u64,
    diverged: bool,
}

/// Reconciles a ledger with the remote log through the mirror.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tally_core::LedgerStore;
/// use tally_sync::{LogMirror, MemoryRemoteLog, SyncConfig, SyncEngine};
///
/// let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// runtime.block_on(async {
///     let engine = SyncEngine::new(
///         SyncConfig::default(),
///         Arc::new(MemoryRemoteLog::new()),
///         Arc::new(LogMirror::open_in_memory().unwrap()),
///         LedgerStore::open_in_memory,
///     );
///     let store = Arc::new(LedgerStore::open_in_memory().unwrap());
///     let outcome = engine.sync(store).await.unwrap();
///     assert!(!outcome.rebuilt);
/// });
/// ```
pub struct SyncEngine<R: RemoteLog + ?Sized, F: LedgerFactory> {
    config: SyncConfig,
    remote: Arc<R>,
    mirror: Arc<LogMirror>,
    factory: F,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    running: AtomicBool,
}

impl<R: RemoteLog + ?Sized, F: LedgerFactory> SyncEngine<R, F> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, remote: Arc<R>, mirror: Arc<LogMirror>, factory: F) -> Self {
        Self {
            config,
            remote,
            mirror,
            factory,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the remote log.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Gets the mirror.
    pub fn mirror(&self) -> &Arc<LogMirror> {
        &self.mirror
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a run holds the engine.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one sync: pull, then push, retrying a conflicted push after a
    /// fresh pull, and rebuilding when that does not converge.
    ///
    /// The returned [`SyncOutcome::store`] is authoritative; when
    /// [`SyncOutcome::rebuilt`] is set the caller must drop `store` and use it.
    ///
    /// # Errors
    ///
    /// [`SyncError::SyncInProgress`] immediately if another run is active.
    /// Provider and structural errors abort the run; everything committed
    /// before the failure stays committed and unpushed actions stay queued.
    pub async fn sync(&self, store: Arc<LedgerStore>) -> SyncResult<SyncOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            tracing::warn!("sync requested while another run is active; rejected");
            return Err(SyncError::SyncInProgress);
        };

        let start = Instant::now();
        let mut report = SyncReport::default();
        let result = self.run(store, &mut report).await;
        report.duration = start.elapsed();

        match result {
            Ok((store, rebuilt)) => {
                self.set_state(SyncState::Synced);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.actions_pulled += report.pulled;
                    stats.actions_pushed += report.pushed;
                    stats.conflicts += u64::from(report.conflicts);
                    stats.rebuilds += u64::from(rebuilt);
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                tracing::info!(
                    pulled = report.pulled,
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    rebuilt,
                    elapsed_ms = report.duration.as_millis() as u64,
                    "sync complete"
                );
                Ok(SyncOutcome {
                    store,
                    report,
                    rebuilt,
                })
            }
            Err(err) => {
                self.set_state(SyncState::Error);
                {
                    let mut stats = self.stats.write();
                    stats.actions_pulled += report.pulled;
                    stats.actions_pushed += report.pushed;
                    stats.conflicts += u64::from(report.conflicts);
                    stats.last_error = Some(err.to_string());
                }
                tracing::warn!(error = %err, "sync failed");
                Err(err)
            }
        }
    }

    /// Runs [`SyncEngine::sync`], retrying retryable failures with backoff.
    pub async fn sync_with_retry(&self, store: Arc<LedgerStore>) -> SyncResult<SyncOutcome> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                self.stats.write().retries += 1;
            }

            match self.sync(Arc::clone(&store)).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    tracing::warn!(attempt, error = %err, "sync attempt failed; retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run(
        &self,
        store: Arc<LedgerStore>,
        report: &mut SyncReport,
    ) -> SyncResult<(Arc<LedgerStore>, bool)> {
        if store.rebuild_requested()? {
            tracing::info!("ledger is marked for rebuild; resuming");
        } else {
            loop {
                self.set_state(SyncState::Pulling);
                let pull = self.pull(&store).await?;
                report.pulled += pull.count;
                if pull.diverged {
                    tracing::info!("a local create lost the race for its id; rebuilding");
                    break;
                }

                self.set_state(SyncState::Pushing);
                match self.push(&store, report).await {
                    Ok(()) => {
                        store.clear_pushed()?;
                        return Ok((store, false));
                    }
                    Err(SyncError::MirrorConflict { from, count }) => {
                        report.conflicts += 1;
                        tracing::warn!(
                            from,
                            count,
                            conflicts = report.conflicts,
                            "push raced another writer"
                        );
                        if report.conflicts > self.config.max_conflict_retries {
                            store.request_rebuild()?;
                            break;
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.set_state(SyncState::Rebuilding);
        let fresh = self.rebuild(&store).await?;
        Ok((Arc::new(fresh), true))
    }

    /// Imports every remote row past the mirror's count.
    ///
    /// A remote create refused because its id exists is checked against the
    /// local queue and the pushed-but-unconfirmed actions. If the record here
    /// came from a different create, the ledger is marked for rebuild before
    /// the mirror moves past that row.
    async fn pull(&self, store: &LedgerStore) -> SyncResult<PullSummary> {
        let page_size = self.config.page_size.max(1);
        let mut summary = PullSummary::default();
        let mut local: Option<Vec<Action>> = None;

        loop {
            let tail = self.mirror.tail()?;
            let from = tail.count + 1;
            let actions = self.remote_get(from, page_end(from, page_size)).await?;
            if actions.is_empty() {
                break;
            }

            let processed = store.process_actions(&actions, Origin::Remote)?;
            if !summary.diverged {
                for (action, outcome) in actions.iter().zip(&processed.outcomes) {
                    if !is_duplicate_create(outcome) {
                        continue;
                    }
                    if local.is_none() {
                        let mut pending = store.all_local_actions()?;
                        pending.extend(store.pushed_actions()?);
                        local = Some(pending);
                    }
                    if local
                        .as_deref()
                        .is_some_and(|pending| lost_create_race(action, pending))
                    {
                        store.request_rebuild()?;
                        summary.diverged = true;
                        break;
                    }
                }
            }
            self.mirror.append(&actions, from, &tail)?;

            let n = actions.len() as u64;
            summary.count += n;
            tracing::debug!(from, rows = n, "pulled page");
            if n < page_size {
                break;
            }
        }

        Ok(summary)
    }

    /// Pushes the local queue page by page.
    ///
    /// A page leaves the queue once it is in the remote, but stays in the
    /// ledger's pushed set until the run ends cleanly, so a later pull can
    /// still tell our rows from a foreign writer's.
    async fn push(&self, store: &LedgerStore, report: &mut SyncReport) -> SyncResult<()> {
        let page_size = self.config.page_size.max(1);

        loop {
            let actions = store.local_actions(1, page_size)?;
            if actions.is_empty() {
                return Ok(());
            }

            let tail = self.mirror.tail()?;
            let landed = self.remote_append(&actions).await?;
            let n = actions.len() as u64;
            store.stash_pushed(1, n)?;
            report.pushed += n;
            tracing::debug!(landed, rows = n, "pushed page");

            self.mirror.append(&actions, landed, &tail)?;
        }
    }

    /// Builds a fresh ledger from the whole remote log plus `original`'s
    /// queued local actions.
    ///
    /// The mirror is extended only after the fresh ledger holds every row,
    /// with one compare-and-append against the tail seen at the start. A
    /// failure on the way leaves the mirror and `original` as they were.
    async fn rebuild(&self, original: &LedgerStore) -> SyncResult<LedgerStore> {
        let fresh = self.factory.create()?;
        let page_size = self.config.page_size.max(1);
        let tail = self.mirror.tail()?;
        let mut unmirrored = Vec::new();
        let mut from = 1u64;

        loop {
            let actions = self.remote_get(from, page_end(from, page_size)).await?;
            if actions.is_empty() {
                break;
            }
            fresh.process_actions(&actions, Origin::Remote)?;

            let n = actions.len() as u64;
            let known = usize::try_from(tail.count.saturating_sub(from - 1)).unwrap_or(usize::MAX);
            unmirrored.extend(actions.into_iter().skip(known));
            from += n;
            if n < page_size {
                break;
            }
        }

        let replayed = from - 1;
        if replayed < tail.count {
            return Err(SyncError::MirrorConflict {
                from: replayed + 1,
                count: tail.count,
            });
        }

        let pending = original.all_local_actions()?;
        let requeued = if pending.is_empty() {
            0
        } else {
            fresh.process_actions(&pending, Origin::Local)?.applied()
        };

        if !unmirrored.is_empty() {
            self.mirror.append(&unmirrored, tail.count + 1, &tail)?;
        }

        tracing::info!(
            replayed,
            pending = pending.len(),
            requeued,
            "ledger rebuilt from remote log"
        );
        Ok(fresh)
    }

    async fn remote_get(&self, from: u64, to: u64) -> SyncResult<Vec<Action>> {
        tokio::time::timeout(self.config.timeout, self.remote.get_actions(from, to))
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    async fn remote_append(&self, actions: &[Action]) -> SyncResult<u64> {
        tokio::time::timeout(self.config.timeout, self.remote.append_actions(actions))
            .await
            .map_err(|_| SyncError::Timeout)?
    }
}

/// Last position of the page starting at `from`.
fn page_end(from: u64, page_size: u64) -> u64 {
    from.saturating_add(page_size.saturating_sub(1))
}

fn is_duplicate_create(outcome: &ActionOutcome) -> bool {
    matches!(
        outcome,
        ActionOutcome::Rejected(Rejection::Conflict(EntityConflict::AlreadyExists { .. }))
    )
}

fn create_key(action: &Action) -> Option<(ActionType, &str)> {
    let action_type = action.action_type();
    match action_type {
        ActionType::AccountsCreate | ActionType::TransfersCreate | ActionType::CategoriesCreate => {
            action.payload().get("id")?.as_str().map(|id| (action_type, id))
        }
        _ => None,
    }
}

/// A remote create was refused because the id exists, and the local record
/// came from a different create that has not reached the log ahead of it.
fn lost_create_race(remote: &Action, local: &[Action]) -> bool {
    let Some(key) = create_key(remote) else {
        return false;
    };
    local
        .iter()
        .any(|action| create_key(action) == Some(key) && action != remote)
}
