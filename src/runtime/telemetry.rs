use crate::queue::work_queue::WorkQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`) unless
/// one is already set. Safe to call repeatedly.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

/// Rolling counters describing what the workers did with dequeued keys.
#[derive(Default, Debug)]
pub struct Telemetry {
    processed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    panics: AtomicU64,
    worker_pool_size: AtomicUsize,
}

impl Telemetry {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A panic also counts the key as dropped.
    pub fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_pool_size(&self, workers: usize) {
        self.worker_pool_size.store(workers, Ordering::Relaxed);
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub processed: u64,
    pub retried: u64,
    pub dropped: u64,
    pub panics: u64,
}

impl TelemetrySnapshot {
    fn since(&self, earlier: &TelemetrySnapshot) -> TelemetrySnapshot {
        TelemetrySnapshot {
            processed: self.processed.saturating_sub(earlier.processed),
            retried: self.retried.saturating_sub(earlier.retried),
            dropped: self.dropped.saturating_sub(earlier.dropped),
            panics: self.panics.saturating_sub(earlier.panics),
        }
    }
}

/// Turns counter snapshots into per-interval deltas.
struct MetricsReporter {
    telemetry: Arc<Telemetry>,
    queue: Arc<WorkQueue>,
    previous: TelemetrySnapshot,
    previous_at: Instant,
}

impl MetricsReporter {
    fn new(telemetry: Arc<Telemetry>, queue: Arc<WorkQueue>) -> Self {
        let previous = telemetry.snapshot();
        Self {
            telemetry,
            queue,
            previous,
            previous_at: Instant::now(),
        }
    }

    /// Logs the activity since the previous call and returns it.
    fn report(&mut self) -> TelemetrySnapshot {
        let current = self.telemetry.snapshot();
        let delta = current.since(&self.previous);
        let elapsed = self.previous_at.elapsed().as_secs_f64();
        let per_second = if elapsed > f64::EPSILON {
            delta.processed as f64 / elapsed
        } else {
            0.0
        };

        tracing::info!(
            target: "ctrlkit::metrics",
            processed_per_sec = format!("{per_second:.2}"),
            processed = delta.processed,
            retried = delta.retried,
            dropped = delta.dropped,
            panics = delta.panics,
            total_processed = current.processed,
            queue_ready = self.queue.len(),
            queue_waiting = self.queue.waiting_len(),
            workers = self.telemetry.worker_pool_size(),
            "dispatch metrics"
        );

        self.previous = current;
        self.previous_at = Instant::now();
        delta
    }
}

/// Spawns a task that logs counter deltas and queue depth every `interval`
/// until `shutdown` is cancelled.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    queue: Arc<WorkQueue>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    let mut reporter = MetricsReporter::new(telemetry, queue);
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    reporter.report();
                }
            }
        }
        tracing::debug!(target: "ctrlkit::metrics", "metrics reporter stopped");
    })
}
