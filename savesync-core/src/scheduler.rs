//! Background synchronization while the managed process runs.
//!
//! Periodic endpoints get one timer task each. Watch-mode endpoints share a
//! single recursive filesystem watch on the working directory; bursts of
//! write events are collapsed by a [`Debouncer`] into one sequential pass
//! over those endpoints. Every task is bound to the session's cancellation
//! token, and a failed sync is logged without stopping anything.

use crate::synchronizer::Synchronizer;
use crate::types::{Endpoint, EndpointRegistry};
use futures::future::BoxFuture;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

// ── Debouncer ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Pending {
    generation: u64,
    timer: Option<(u64, AbortHandle)>,
    closed: bool,
}

/// Runs an action once a burst of triggers has been quiet for `delay`.
///
/// The pending timer handle is the only state shared between the trigger
/// side and the timer task. Runs of the action never overlap.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    pending: Arc<Mutex<Pending>>,
    gate: Arc<tokio::sync::Mutex<()>>,
    action: Action,
    tracker: TaskTracker,
}

impl Debouncer {
    pub fn new<F, Fut>(delay: Duration, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action: Action = Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(run()) });
        Self {
            delay,
            pending: Arc::new(Mutex::new(Pending::default())),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            action,
            tracker: TaskTracker::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the quiet period. Must be called inside a tokio runtime.
    pub fn trigger(&self) {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return;
        }
        if let Some((_, timer)) = pending.timer.take() {
            timer.abort();
        }
        pending.generation += 1;
        let generation = pending.generation;

        let slot = Arc::clone(&self.pending);
        let gate = Arc::clone(&self.gate);
        let action = Arc::clone(&self.action);
        let delay = self.delay;
        let task = self.tracker.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                // Once the slot is cleared a later trigger can no longer
                // abort this run.
                let mut pending = lock(&slot);
                if !matches!(pending.timer, Some((current, _)) if current == generation) {
                    return;
                }
                pending.timer = None;
            }
            let _serial = gate.lock().await;
            action().await;
        });
        pending.timer = Some((generation, task.abort_handle()));
    }

    /// Whether a timer is waiting to fire.
    pub fn is_pending(&self) -> bool {
        lock(&self.pending).timer.is_some()
    }

    /// Drop any pending timer and wait for a running action to finish.
    pub async fn close(&self) {
        {
            let mut pending = lock(&self.pending);
            pending.closed = true;
            if let Some((_, timer)) = pending.timer.take() {
                timer.abort();
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Scheduler ────────────────────────────────────────────────────────────

pub struct BackgroundScheduler;

impl BackgroundScheduler {
    /// Start background syncs from `working` to the endpoints in `registry`.
    ///
    /// Must be called inside a tokio runtime. A filesystem watch that cannot
    /// be established is logged; watch-mode endpoints are then only written
    /// when the session drains.
    pub fn start(
        working: Endpoint,
        registry: &EndpointRegistry,
        synchronizer: Synchronizer,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> SchedulerHandle {
        let tracker = TaskTracker::new();

        for endpoint in registry.periodic().cloned() {
            let Some(period) = endpoint.interval else {
                continue;
            };
            info!("Syncing to {} every {}s", endpoint, period.as_secs());
            tracker.spawn(run_periodic(
                working.clone(),
                endpoint,
                period,
                synchronizer.clone(),
                cancel.clone(),
            ));
        }

        let watched: Vec<Endpoint> = registry.watched().cloned().collect();
        let debouncer = if watched.is_empty() {
            None
        } else {
            let debouncer = watch_debouncer(working.clone(), watched, synchronizer, debounce);
            match spawn_watch(&tracker, &working, debouncer.clone(), cancel.clone()) {
                Ok(()) => Some(debouncer),
                Err(e) => {
                    warn!("Could not watch {}: {}", working.path.display(), e);
                    None
                }
            }
        };

        SchedulerHandle {
            cancel,
            tracker,
            debouncer,
        }
    }
}

async fn run_periodic(
    working: Endpoint,
    endpoint: Endpoint,
    period: Duration,
    synchronizer: Synchronizer,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!("Periodic sync to {}", endpoint);
                if let Err(e) = synchronizer.synchronize(&working, &endpoint).await {
                    warn!("{}", e);
                }
            }
        }
    }
    debug!("Periodic sync to {} stopped", endpoint);
}

fn watch_debouncer(
    working: Endpoint,
    endpoints: Vec<Endpoint>,
    synchronizer: Synchronizer,
    delay: Duration,
) -> Debouncer {
    let working = Arc::new(working);
    let endpoints = Arc::new(endpoints);
    Debouncer::new(delay, move || {
        let working = Arc::clone(&working);
        let endpoints = Arc::clone(&endpoints);
        let synchronizer = synchronizer.clone();
        async move {
            for endpoint in endpoints.iter() {
                if let Err(e) = synchronizer.synchronize(&working, endpoint).await {
                    warn!("{}", e);
                }
            }
        }
    })
}

fn spawn_watch(
    tracker: &TaskTracker,
    working: &Endpoint,
    debouncer: Debouncer,
    cancel: CancellationToken,
) -> notify::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&working.path, RecursiveMode::Recursive)?;
    info!(
        "Watching {} (debounce {}ms)",
        working.path.display(),
        debouncer.delay().as_millis()
    );

    tracker.spawn(async move {
        // Dropping the watcher closes the watch.
        let _watcher = watcher;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(Ok(event)) if is_write(&event.kind) => debouncer.trigger(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!("Watch error: {}", e),
                    None => break,
                },
            }
        }
        debug!("Filesystem watch stopped");
    });
    Ok(())
}

fn is_write(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Running scheduler. Dropping it without [`SchedulerHandle::shutdown`]
/// leaves tasks running until the token is cancelled.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    debouncer: Option<Debouncer>,
}

impl SchedulerHandle {
    pub fn is_watching(&self) -> bool {
        self.debouncer.is_some()
    }

    /// Stop every timer and the watch, then wait for in-flight syncs.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if let Some(debouncer) = &self.debouncer {
            debouncer.close().await;
        }
        debug!("Background scheduler stopped");
    }
}
