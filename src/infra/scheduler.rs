use crate::domain::SessionSource;
use crate::infra::{ScanError, ScanOutput, SessionRegistry, SourceReader, StoreReader};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedulerState {
    Idle,
    InitialScan,
    SteadyState,
    Cancelled,
}

/// Which sources take part in a run. Each flag is decided on its own; no source is ever
/// skipped because another one succeeded or failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SourcePlan {
    pub store: bool,
    pub primary: bool,
    pub secondary: bool,
}

impl SourcePlan {
    pub fn all() -> Self {
        Self {
            store: true,
            primary: true,
            secondary: true,
        }
    }

    pub fn only(source: SessionSource) -> Self {
        Self {
            store: source == SessionSource::Store,
            primary: source == SessionSource::PrimaryTree,
            secondary: source == SessionSource::SecondaryTree,
        }
    }

    pub fn includes(&self, source: SessionSource) -> bool {
        match source {
            SessionSource::Store => self.store,
            SessionSource::PrimaryTree => self.primary,
            SessionSource::SecondaryTree => self.secondary,
        }
    }
}

/// Readers for whichever locations could be resolved. A `None` reader is simply not scanned.
#[derive(Clone, Default)]
pub struct SourceSet {
    pub store: Option<Arc<dyn StoreReader>>,
    pub primary: Option<Arc<dyn SourceReader>>,
    pub secondary: Option<Arc<dyn SourceReader>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AggregationOptions {
    pub plan: SourcePlan,
    pub poll_interval: Duration,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            plan: SourcePlan::all(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Runs the one-shot scans and then polls the store until stopped.
pub struct AggregationScheduler {
    state_rx: watch::Receiver<SchedulerState>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AggregationScheduler {
    pub fn start(
        runtime: &Handle,
        registry: Arc<SessionRegistry>,
        sources: SourceSet,
        options: AggregationOptions,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run_aggregation(
            registry,
            sources,
            options,
            state_tx,
            shutdown_rx,
        ));
        Self {
            state_rx,
            shutdown_tx,
            task,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Signals cancellation and waits for the task. A scan or poll already in flight finishes
    /// its merge first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(error) = self.task.await {
            warn!(%error, "aggregation task did not finish cleanly");
        }
    }
}

async fn run_aggregation(
    registry: Arc<SessionRegistry>,
    sources: SourceSet,
    options: AggregationOptions,
    state_tx: watch::Sender<SchedulerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(plan = ?options.plan, "initial scan started");
    state_tx.send_replace(SchedulerState::InitialScan);

    let Some(cursor) = initial_scan(&registry, &sources, options.plan, &mut shutdown_rx).await
    else {
        info!("cancelled during initial scan");
        state_tx.send_replace(SchedulerState::Cancelled);
        return;
    };

    info!(sessions = registry.len(), "initial scan finished");
    state_tx.send_replace(SchedulerState::SteadyState);

    let store = sources.store.clone().filter(|_| options.plan.store);
    match store {
        Some(store) => poll_store(&registry, store, cursor, options, &mut shutdown_rx).await,
        None => wait_for_shutdown(&mut shutdown_rx).await,
    }

    info!("aggregation stopped");
    state_tx.send_replace(SchedulerState::Cancelled);
}

enum ScanJob {
    Tree(Arc<dyn SourceReader>),
    Store(Arc<dyn StoreReader>),
}

/// Scans every planned source in parallel and merges each result as it lands. Returns the
/// store cursor, or `None` when cancelled.
async fn initial_scan(
    registry: &SessionRegistry,
    sources: &SourceSet,
    plan: SourcePlan,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<Option<SystemTime>> {
    let mut jobs: Vec<(SessionSource, ScanJob)> = Vec::new();
    if plan.store {
        if let Some(store) = &sources.store {
            jobs.push((SessionSource::Store, ScanJob::Store(Arc::clone(store))));
        }
    }
    if plan.primary {
        if let Some(primary) = &sources.primary {
            jobs.push((SessionSource::PrimaryTree, ScanJob::Tree(Arc::clone(primary))));
        }
    }
    if plan.secondary {
        if let Some(secondary) = &sources.secondary {
            jobs.push((SessionSource::SecondaryTree, ScanJob::Tree(Arc::clone(secondary))));
        }
    }

    let mut scans = JoinSet::new();
    for (source, job) in jobs {
        scans.spawn_blocking(move || {
            let result = match job {
                ScanJob::Tree(reader) => reader.scan(),
                ScanJob::Store(reader) => reader.scan(),
            };
            (source, result)
        });
    }

    let mut cursor: Option<SystemTime> = None;
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return None;
                }
            }
            joined = scans.join_next() => {
                let Some(joined) = joined else {
                    break;
                };
                match joined {
                    Ok((source, result)) => {
                        let latest = apply_scan(registry, plan, source, result);
                        if source == SessionSource::Store {
                            cursor = advance_cursor(cursor, latest);
                        }
                    }
                    Err(error) => warn!(%error, "scan task failed"),
                }
            }
        }
    }

    Some(cursor)
}

/// Merges one reader result; failures become notices and count as zero sessions.
fn apply_scan(
    registry: &SessionRegistry,
    plan: SourcePlan,
    source: SessionSource,
    result: Result<ScanOutput, ScanError>,
) -> Option<SystemTime> {
    match result {
        Ok(output) => {
            let latest = output.latest_update();
            let found = output.sessions.len();
            let warnings = output.warnings.get();
            let admitted = registry.merge(output.sessions, plan.includes(source));
            debug!(source = source.label(), found, admitted, warnings, "merged scan");
            registry.record_warnings(source, warnings);
            registry.record_notice(source, None);
            latest
        }
        Err(error) => {
            warn!(source = source.label(), %error, "source unavailable");
            registry.record_notice(source, Some(error.to_string()));
            None
        }
    }
}

async fn poll_store(
    registry: &SessionRegistry,
    store: Arc<dyn StoreReader>,
    mut cursor: Option<SystemTime>,
    options: AggregationOptions,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut failing = false;
    let mut interval = tokio::time::interval(options.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the initial scan already covered it.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = interval.tick() => {
                let reader = Arc::clone(&store);
                let since = cursor;
                let result = tokio::task::spawn_blocking(move || reader.scan_since(since)).await;
                match result {
                    Ok(Ok(output)) => {
                        let latest = output.latest_update();
                        let admitted = registry.merge(output.sessions, options.plan.store);
                        if admitted > 0 {
                            debug!(admitted, "store poll admitted sessions");
                        }
                        if std::mem::take(&mut failing) {
                            info!("store poll recovered");
                        }
                        registry.record_notice(SessionSource::Store, None);
                        cursor = advance_cursor(cursor, latest);
                    }
                    Ok(Err(error)) => {
                        if failing {
                            debug!(%error, "store poll still failing");
                        } else {
                            warn!(%error, "store poll failed");
                            failing = true;
                        }
                        registry.record_notice(SessionSource::Store, Some(error.to_string()));
                    }
                    Err(error) => warn!(%error, "store poll task failed"),
                }
            }
        }
    }
}

/// Moves the store cursor forward, never past the current time. `scan_since` is inclusive, so
/// rows at the cursor come back on the next poll and the registry drops them as unchanged.
fn advance_cursor(cursor: Option<SystemTime>, latest: Option<SystemTime>) -> Option<SystemTime> {
    let latest = latest.map(|latest| latest.min(SystemTime::now()));
    cursor.max(latest)
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
