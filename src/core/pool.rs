//! Bounded-queue worker pool.
//!
//! A fixed number of worker threads drain one bounded queue. Each worker
//! builds its own [`TaskProcessor`] inside its thread through a shared
//! factory, so processors may own thread-bound state such as a database
//! connection. A failing task is counted, logged with its label and skipped;
//! the batch continues. Tasks complete in no particular order.
//!
//! Producers block while the queue is full: each of `max_tries` attempts
//! waits up to `retry_interval` for room before the pool gives up with
//! [`CerebrumError::QueueFull`].

use crate::core::config::PoolConfig;
use crate::core::error::CerebrumError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll step while waiting for queue room.
const SUBMIT_POLL: Duration = Duration::from_millis(10);

pub trait TaskProcessor<T> {
    fn process(&mut self, task: &T) -> Result<(), CerebrumError>;

    /// Identifies `task` in failure reports.
    fn label(&self, task: &T) -> String;

    /// Processor-specific counters included in progress reports.
    fn snapshot(&self) -> Option<Value> {
        None
    }

    /// Called once after the queue is drained.
    fn finish(&mut self) -> Result<(), CerebrumError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_size: usize,
    pub max_tries: u32,
    pub retry_interval: Duration,
    /// `None` disables the progress reporter.
    pub stats_interval: Option<Duration>,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        let stats_interval = (config.stats_interval_secs > 0.0)
            .then(|| Duration::try_from_secs_f64(config.stats_interval_secs).ok())
            .flatten();
        Self {
            workers: config.workers.max(1),
            queue_size: config.queue_size.max(1),
            max_tries: config.queue_max_tries.max(1),
            retry_interval: Duration::from_millis(config.queue_retry_ms),
            stats_interval,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub ok: u64,
    pub failed: u64,
    pub errors_by_kind: BTreeMap<&'static str, u64>,
    pub failed_labels: Vec<String>,
    pub snapshot: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolReport {
    pub submitted: usize,
    pub ok: u64,
    pub failed: u64,
    pub errors_by_kind: BTreeMap<&'static str, u64>,
    pub failed_labels: Vec<String>,
    /// Last snapshot of each worker's processor.
    pub snapshots: Vec<Value>,
}

impl PoolReport {
    fn collect(submitted: usize, stats: &[Arc<Mutex<WorkerStats>>]) -> Self {
        let mut report = PoolReport {
            submitted,
            ..Default::default()
        };
        for slot in stats {
            let Ok(worker) = slot.lock() else {
                tracing::warn!("worker stats lock poisoned");
                continue;
            };
            report.ok += worker.ok;
            report.failed += worker.failed;
            for (kind, n) in &worker.errors_by_kind {
                *report.errors_by_kind.entry(kind).or_insert(0) += n;
            }
            report.failed_labels.extend(worker.failed_labels.iter().cloned());
            if let Some(snapshot) = &worker.snapshot {
                report.snapshots.push(snapshot.clone());
            }
        }
        report
    }
}

type StopSignal = Arc<(Mutex<bool>, Condvar)>;

pub struct WorkerPool<T: Send + 'static> {
    sender: Option<SyncSender<T>>,
    workers: Vec<JoinHandle<()>>,
    stats: Vec<Arc<Mutex<WorkerStats>>>,
    queued: Arc<AtomicUsize>,
    submitted: usize,
    settings: PoolSettings,
    reporter: Option<(StopSignal, JoinHandle<()>)>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start the workers. Fails if any worker's processor cannot be built.
    pub fn start<P, F>(settings: PoolSettings, factory: F) -> Result<Self, CerebrumError>
    where
        P: TaskProcessor<T> + 'static,
        F: Fn(usize) -> Result<P, CerebrumError> + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel::<T>(settings.queue_size);
        let receiver = Arc::new(Mutex::new(receiver));
        let factory = Arc::new(factory);
        let queued = Arc::new(AtomicUsize::new(0));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CerebrumError>>();

        let mut workers = Vec::with_capacity(settings.workers);
        let mut stats = Vec::with_capacity(settings.workers);
        for index in 0..settings.workers {
            let slot = Arc::new(Mutex::new(WorkerStats::default()));
            stats.push(Arc::clone(&slot));
            let receiver = Arc::clone(&receiver);
            let factory = Arc::clone(&factory);
            let queued = Arc::clone(&queued);
            let ready = ready_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || {
                    let processor = match factory(index) {
                        Ok(p) => {
                            let _ = ready.send(Ok(()));
                            p
                        }
                        Err(err) => {
                            let _ = ready.send(Err(err));
                            return;
                        }
                    };
                    drop(ready);
                    worker_loop(index, processor, &receiver, &slot, &queued);
                })?;
            workers.push(handle);
        }
        drop(ready_tx);

        for _ in 0..settings.workers {
            let outcome = ready_rx.recv().unwrap_or_else(|_| {
                Err(CerebrumError::ProgrammingError(
                    "worker exited before reporting readiness".to_string(),
                ))
            });
            if let Err(err) = outcome {
                drop(sender);
                for handle in workers {
                    let _ = handle.join();
                }
                return Err(err);
            }
        }
        tracing::info!(workers = settings.workers, queue_size = settings.queue_size, "worker pool started");

        let reporter = settings
            .stats_interval
            .map(|interval| spawn_reporter(interval, stats.clone(), Arc::clone(&queued)))
            .transpose()?;

        Ok(Self {
            sender: Some(sender),
            workers,
            stats,
            queued,
            submitted: 0,
            settings,
            reporter,
        })
    }

    /// Queue `task`, waiting for room with bounded retries.
    pub fn submit(&mut self, task: T) -> Result<(), CerebrumError> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            CerebrumError::ProgrammingError("submit() after the pool was closed".to_string())
        })?;
        let mut task = task;
        for attempt in 1..=self.settings.max_tries {
            let deadline = Instant::now() + self.settings.retry_interval;
            loop {
                match sender.try_send(task) {
                    Ok(()) => {
                        self.queued.fetch_add(1, Ordering::SeqCst);
                        self.submitted += 1;
                        return Ok(());
                    }
                    Err(TrySendError::Full(back)) => task = back,
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(CerebrumError::QueueFull(
                            "all workers have stopped".to_string(),
                        ));
                    }
                }
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(SUBMIT_POLL.min(self.settings.retry_interval));
            }
            tracing::debug!(attempt, max_tries = self.settings.max_tries, "queue full");
        }
        tracing::error!(max_tries = self.settings.max_tries, "unable to add task");
        Err(CerebrumError::QueueFull(format!(
            "queue still full after {} tries",
            self.settings.max_tries
        )))
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> PoolReport {
        PoolReport::collect(self.submitted, &self.stats)
    }

    /// Close the queue, wait for every worker to drain it and finish, then
    /// stop the reporter.
    pub fn wait_completion(mut self) -> PoolReport {
        tracing::info!("waiting for workers to complete");
        self.sender = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        if let Some((stop, handle)) = self.reporter.take() {
            let (lock, cvar) = &*stop;
            if let Ok(mut stopped) = lock.lock() {
                *stopped = true;
            }
            cvar.notify_all();
            let _ = handle.join();
        }
        let report = self.report();
        tracing::info!(
            submitted = report.submitted,
            ok = report.ok,
            failed = report.failed,
            "workers done"
        );
        report
    }
}

fn worker_loop<T, P: TaskProcessor<T>>(
    index: usize,
    mut processor: P,
    receiver: &Mutex<Receiver<T>>,
    slot: &Mutex<WorkerStats>,
    queued: &AtomicUsize,
) {
    tracing::debug!(worker = index, "worker starting");
    loop {
        let next = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => {
                tracing::error!(worker = index, "queue lock poisoned");
                break;
            }
        };
        let Ok(task) = next else { break };
        queued.fetch_sub(1, Ordering::SeqCst);

        let result = processor.process(&task);
        let Ok(mut stats) = slot.lock() else {
            tracing::error!(worker = index, "worker stats lock poisoned");
            break;
        };
        match result {
            Ok(()) => stats.ok += 1,
            Err(err) => {
                let label = processor.label(&task);
                tracing::error!(worker = index, task = %label, error = %err, "unable to process task");
                stats.failed += 1;
                *stats.errors_by_kind.entry(err.kind()).or_insert(0) += 1;
                stats.failed_labels.push(label);
            }
        }
        stats.snapshot = processor.snapshot();
    }
    if let Err(err) = processor.finish() {
        tracing::error!(worker = index, error = %err, "worker failed to finish");
    }
    tracing::debug!(worker = index, "worker done");
}

fn spawn_reporter(
    interval: Duration,
    stats: Vec<Arc<Mutex<WorkerStats>>>,
    queued: Arc<AtomicUsize>,
) -> Result<(StopSignal, JoinHandle<()>), CerebrumError> {
    let stop: StopSignal = Arc::new((Mutex::new(false), Condvar::new()));
    let signal = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("pool-stats".to_string())
        .spawn(move || {
            let (lock, cvar) = &*signal;
            let Ok(mut stopped) = lock.lock() else { return };
            loop {
                let Ok((guard, _)) = cvar.wait_timeout(stopped, interval) else {
                    return;
                };
                stopped = guard;
                if *stopped {
                    return;
                }
                let report = PoolReport::collect(0, &stats);
                tracing::info!(
                    ok = report.ok,
                    failed = report.failed,
                    queued = queued.load(Ordering::SeqCst),
                    errors = ?report.errors_by_kind,
                    "progress"
                );
                for (worker, snapshot) in report.snapshots.iter().enumerate() {
                    tracing::debug!(worker, %snapshot, "worker snapshot");
                }
            }
        })?;
    Ok((stop, handle))
}
