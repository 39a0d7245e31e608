use crate::queue::rate_limiter::{
    controller_rate_limiter, RateLimiter, DEFAULT_BUCKET_BURST, DEFAULT_BUCKET_QPS,
    DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY,
};
use crate::queue::work_queue::{WorkQueue, DEFAULT_DEDUP_WINDOW};
use anyhow::{bail, Context, Result};
use std::time::Duration;

const DEFAULT_RESYNC_PERIOD_SECS: u64 = 20 * 60;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS: u64 = 100;

/// What a worker does when `Controller::process` panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Shut the runtime down in order, then resume the panic in the caller of
    /// `Generic::run`.
    #[default]
    Crash,
    /// Drop the key and keep the worker running.
    Isolate,
}

/// Runtime configuration shared by the controller runtime and every constructor.
///
/// All instances must be constructed via [`RuntimeConfig::builder`] or [`RuntimeConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    app_name: String,
    namespace: String,
    resync_period: Duration,
    workers: usize,
    dedup_window: Duration,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    bucket_qps: f64,
    bucket_burst: usize,
    cache_sync_poll_interval: Duration,
    metrics_interval: Option<Duration>,
    fault_policy: FaultPolicy,
}

pub struct RuntimeConfigParams {
    pub app_name: String,
    pub namespace: String,
    pub resync_period: Duration,
    pub workers: usize,
    pub dedup_window: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub bucket_qps: f64,
    pub bucket_burst: usize,
    pub cache_sync_poll_interval: Duration,
    pub metrics_interval: Option<Duration>,
    pub fault_policy: FaultPolicy,
}

impl RuntimeConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: RuntimeConfigParams) -> Result<Self> {
        let RuntimeConfigParams {
            app_name,
            namespace,
            resync_period,
            workers,
            dedup_window,
            retry_base_delay,
            retry_max_delay,
            bucket_qps,
            bucket_burst,
            cache_sync_poll_interval,
            metrics_interval,
            fault_policy,
        } = params;

        let config = Self {
            app_name: trimmed_string(app_name),
            namespace: trimmed_string(namespace),
            resync_period,
            workers,
            dedup_window,
            retry_base_delay,
            retry_max_delay,
            bucket_qps,
            bucket_burst,
            cache_sync_poll_interval,
            metrics_interval,
            fault_policy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Application name, used to label logs.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Namespace informers are restricted to. Empty means all namespaces.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Period at which informers redeliver their whole cache.
    pub fn resync_period(&self) -> Duration {
        self.resync_period
    }

    /// Number of worker loops draining the queue.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }

    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    pub fn retry_max_delay(&self) -> Duration {
        self.retry_max_delay
    }

    pub fn bucket_qps(&self) -> f64 {
        self.bucket_qps
    }

    pub fn bucket_burst(&self) -> usize {
        self.bucket_burst
    }

    /// Interval at which cache sync progress is checked during startup.
    pub fn cache_sync_poll_interval(&self) -> Duration {
        self.cache_sync_poll_interval
    }

    /// Interval of the metrics reporter, if enabled.
    pub fn metrics_interval(&self) -> Option<Duration> {
        self.metrics_interval
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        self.fault_policy
    }

    /// Rate limiter combining per-key exponential backoff and the overall bucket.
    pub fn rate_limiter(&self) -> Box<dyn RateLimiter> {
        Box::new(controller_rate_limiter(
            self.retry_base_delay,
            self.retry_max_delay,
            self.bucket_qps,
            self.bucket_burst,
        ))
    }

    /// Fresh work queue using the configured rate limiter and dedup window.
    pub fn work_queue(&self) -> WorkQueue {
        WorkQueue::with_dedup_window(self.rate_limiter(), self.dedup_window)
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_app_name(&self.app_name)?;

        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }

        if self.retry_base_delay.is_zero() {
            bail!("retry_base_delay must be greater than 0");
        }

        if self.retry_max_delay < self.retry_base_delay {
            bail!(
                "retry_max_delay ({:?}) must not be shorter than retry_base_delay ({:?})",
                self.retry_max_delay,
                self.retry_base_delay,
            );
        }

        if !(self.bucket_qps.is_finite() && self.bucket_qps > 0.0) {
            bail!("bucket_qps must be a positive number");
        }

        if self.bucket_burst == 0 {
            bail!("bucket_burst must be greater than 0");
        }

        if self.cache_sync_poll_interval.is_zero() {
            bail!("cache_sync_poll_interval must be greater than 0");
        }

        if matches!(self.metrics_interval, Some(interval) if interval.is_zero()) {
            bail!("metrics_interval must be greater than 0 when set");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct RuntimeConfigBuilder {
    app_name: Option<String>,
    namespace: Option<String>,
    resync_period: Option<Duration>,
    workers: Option<usize>,
    dedup_window: Option<Duration>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    bucket_qps: Option<f64>,
    bucket_burst: Option<usize>,
    cache_sync_poll_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    fault_policy: Option<FaultPolicy>,
}

impl RuntimeConfigBuilder {
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = Some(window);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    pub fn bucket_qps(mut self, qps: f64) -> Self {
        self.bucket_qps = Some(qps);
        self
    }

    pub fn bucket_burst(mut self, burst: usize) -> Self {
        self.bucket_burst = Some(burst);
        self
    }

    pub fn cache_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.cache_sync_poll_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<RuntimeConfig> {
        let params = RuntimeConfigParams {
            app_name: self.app_name.context("app_name is required")?,
            namespace: self.namespace.unwrap_or_default(),
            resync_period: self
                .resync_period
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RESYNC_PERIOD_SECS)),
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            dedup_window: self.dedup_window.unwrap_or(DEFAULT_DEDUP_WINDOW),
            retry_base_delay: self.retry_base_delay.unwrap_or(DEFAULT_RETRY_BASE_DELAY),
            retry_max_delay: self.retry_max_delay.unwrap_or(DEFAULT_RETRY_MAX_DELAY),
            bucket_qps: self.bucket_qps.unwrap_or(DEFAULT_BUCKET_QPS),
            bucket_burst: self.bucket_burst.unwrap_or(DEFAULT_BUCKET_BURST),
            cache_sync_poll_interval: self.cache_sync_poll_interval.unwrap_or_else(|| {
                Duration::from_millis(DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS)
            }),
            metrics_interval: self.metrics_interval,
            fault_policy: self.fault_policy.unwrap_or_default(),
        };

        RuntimeConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn validate_app_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("app_name cannot be empty");
    }
    if let Some(invalid) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        bail!("app_name contains invalid character {invalid:?}; use alphanumerics, '-' or '_'");
    }
    Ok(())
}
