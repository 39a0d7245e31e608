use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use ctrlkit::{
    ConstructionContext, Constructor, Controller, ControllerFuture, Descriptor, Informer,
    InformerFuture, MemoryInformer, ObjectRef, OwnerIndex, OwnerRefHandler, ProcessContext,
    ProcessError, ProcessFuture, QueueKey, ReadySignal, ResourceEventHandler, ResourceKind,
    RunError, RunStage, RuntimeConfig,
};
use once_cell::sync::Lazy;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn widget_kind() -> ResourceKind {
    ResourceKind::new("example.com", "v1", "Widget")
}

pub fn gadget_kind() -> ResourceKind {
    ResourceKind::new("example.com", "v1", "Gadget")
}

pub fn config_map_kind() -> ResourceKind {
    ResourceKind::new("", "v1", "ConfigMap")
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig::builder()
        .app_name("ctrlkit-test")
        .dedup_window(Duration::from_millis(5))
        .retry_base_delay(Duration::from_millis(10))
        .retry_max_delay(Duration::from_millis(80))
        .cache_sync_poll_interval(Duration::from_millis(1))
        .workers(2)
        .build()
        .expect("test config is valid")
}

/// Ordered record of lifecycle milestones shared by controllers and informers.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }
}

/// What the controller does on its next attempt for a given object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Retry,
    Fail,
    Panic,
    /// Sleep before succeeding.
    Slow(Duration),
}

pub struct RecordingController {
    kind: ResourceKind,
    log: EventLog,
    ready_delay: Option<Duration>,
    ready: Mutex<Option<ReadySignal>>,
    origin: Instant,
    started_at: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<(QueueKey, Duration)>>,
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingController {
    pub fn new(kind: ResourceKind, log: EventLog) -> Self {
        Self {
            kind,
            log,
            ready_delay: None,
            ready: Mutex::new(None),
            origin: Instant::now(),
            started_at: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            script: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Take a readiness signal and fire it `delay` after the run loop starts.
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = Some(delay);
        self
    }

    pub fn script(&self, name: &str, steps: impl IntoIterator<Item = Step>) {
        self.script
            .lock()
            .unwrap()
            .entry(name.to_owned())
            .or_default()
            .extend(steps);
    }

    /// Time since construction at which `run` was entered.
    pub fn started_at(&self) -> Option<Duration> {
        *self.started_at.lock().unwrap()
    }

    pub fn attempts(&self) -> Vec<(QueueKey, Duration)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, name: &str) -> Vec<Duration> {
        self.attempts()
            .into_iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, at)| at)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, name: &str) -> Step {
        self.script
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Succeed)
    }
}

impl Controller for RecordingController {
    fn run(self: Arc<Self>, token: CancellationToken) -> ControllerFuture {
        Box::pin(async move {
            *self.started_at.lock().unwrap() = Some(self.origin.elapsed());
            self.log.push(format!("controller {} started", self.kind.kind()));

            if let Some(delay) = self.ready_delay {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = sleep(delay) => {
                        if let Some(signal) = self.ready.lock().unwrap().take() {
                            signal.ready();
                        }
                    }
                }
            }

            token.cancelled().await;
            self.log.push(format!("controller {} stopped", self.kind.kind()));
            Ok(())
        })
    }

    fn process<'a>(&'a self, ctx: &'a ProcessContext) -> ProcessFuture<'a> {
        Box::pin(async move {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.attempts
                .lock()
                .unwrap()
                .push((ctx.key().clone(), self.origin.elapsed()));

            let step = self.next_step(ctx.name());
            let outcome = match step {
                Step::Succeed => Ok(()),
                Step::Slow(delay) => {
                    sleep(delay).await;
                    self.log.push(format!("processed {}", ctx.name()));
                    Ok(())
                }
                Step::Retry => Err(ProcessError::retriable(anyhow!("transient failure"))),
                Step::Fail => Err(ProcessError::terminal(anyhow!("invalid object"))),
                Step::Panic => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    panic!("reconcile exploded for {}", ctx.name());
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }
}

/// Informer wrapper that logs when its run loop returns.
pub struct TrackedInformer {
    inner: Arc<MemoryInformer>,
    log: EventLog,
}

impl TrackedInformer {
    pub fn new(inner: Arc<MemoryInformer>, log: EventLog) -> Self {
        Self { inner, log }
    }
}

impl Informer for TrackedInformer {
    fn kind(&self) -> &ResourceKind {
        self.inner.kind()
    }

    fn run(self: Arc<Self>, token: CancellationToken) -> InformerFuture {
        Box::pin(async move {
            let result = self.inner.clone().run(token).await;
            self.log
                .push(format!("informer {} stopped", self.inner.kind().kind()));
            result
        })
    }

    fn has_synced(&self) -> bool {
        self.inner.has_synced()
    }

    fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler>) {
        self.inner.add_event_handler(handler);
    }
}

/// Children of another kind routed to this controller by owner reference.
pub struct OwnedChildren {
    pub informer: Arc<MemoryInformer>,
    pub index: Option<Arc<dyn OwnerIndex>>,
}

pub struct RecordingConstructor {
    controller: Arc<RecordingController>,
    informer: Arc<MemoryInformer>,
    children: Option<OwnedChildren>,
    log: EventLog,
}

impl RecordingConstructor {
    pub fn new(
        controller: Arc<RecordingController>,
        informer: Arc<MemoryInformer>,
        log: EventLog,
    ) -> Self {
        Self {
            controller,
            informer,
            children: None,
            log,
        }
    }

    pub fn with_children(mut self, children: OwnedChildren) -> Self {
        self.children = Some(children);
        self
    }

    pub fn boxed(self) -> Box<dyn Constructor> {
        Box::new(self)
    }
}

impl Constructor for RecordingConstructor {
    fn describe(&self) -> Descriptor {
        Descriptor::new(self.controller.kind.clone())
    }

    fn construct(
        &self,
        config: &RuntimeConfig,
        ctx: &mut ConstructionContext<'_>,
    ) -> Result<Arc<dyn Controller>> {
        if self.controller.ready_delay.is_some() {
            *self.controller.ready.lock().unwrap() = Some(ctx.ready_signal());
        }

        ctx.register_informer(Arc::new(TrackedInformer::new(
            self.informer.clone(),
            self.log.clone(),
        )))?;

        if let Some(children) = &self.children {
            let child_kind = children.informer.kind().clone();
            let informer = ctx.main_informer(config, &child_kind, |_, _, _| {
                let tracked: Arc<dyn Informer> = Arc::new(TrackedInformer::new(
                    children.informer.clone(),
                    self.log.clone(),
                ));
                tracked
            })?;
            let mut handler = OwnerRefHandler::new(self.controller.kind.clone(), ctx.work_queue());
            if let Some(index) = &children.index {
                handler = handler.with_index(index.clone());
            }
            informer.add_event_handler(Arc::new(handler));
        }

        Ok(self.controller.clone())
    }
}

/// Constructor whose factory always fails.
pub struct FailingConstructor(pub ResourceKind);

impl Constructor for FailingConstructor {
    fn describe(&self) -> Descriptor {
        Descriptor::new(self.0.clone())
    }

    fn construct(
        &self,
        _config: &RuntimeConfig,
        _ctx: &mut ConstructionContext<'_>,
    ) -> Result<Arc<dyn Controller>> {
        bail!("missing credentials")
    }
}

pub fn object(kind: ResourceKind, name: &str) -> ObjectRef {
    ObjectRef::new(kind, "default", name)
}

pub async fn wait_until(
    what: &str,
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{what} did not happen within {timeout:?}");
        }
        sleep(Duration::from_millis(1)).await;
    }
}

/// Cancels a run that reached dispatch and checks it reports that stage.
pub async fn stop_dispatching(
    token: &CancellationToken,
    run: JoinHandle<Result<(), RunError>>,
) -> Result<()> {
    token.cancel();
    match run.await? {
        Err(RunError::Cancelled {
            stage: RunStage::Dispatching,
        }) => Ok(()),
        other => bail!("unexpected run result {other:?}"),
    }
}
