use std::{sync::Arc, time::Duration};

use anyhow::Result;
use ctrlkit::{
    ConstructionContext, Constructor, Controller, ControllerState, Descriptor, Generic,
    MemoryInformer, RunError, RunStage, RuntimeConfig,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::support::helpers::{
    config_map_kind, gadget_kind, init_tracing, object, test_config, wait_until, widget_kind,
    stop_dispatching, EventLog, RecordingConstructor, RecordingController, Step,
};

fn spawn_run(
    generic: Arc<Generic>,
    token: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), RunError>> {
    tokio::spawn(async move { generic.run(token).await })
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_cache_sync_never_starts_controllers() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let controller = Arc::new(RecordingController::new(widget_kind(), log.clone()));
    let informer = Arc::new(
        MemoryInformer::new(widget_kind())
            .with_objects([object(widget_kind(), "a")])
            .with_sync_delay(Duration::from_secs(3600)),
    );
    let generic = Arc::new(Generic::new(
        test_config(),
        vec![RecordingConstructor::new(controller.clone(), informer, log.clone()).boxed()],
    )?);

    let token = CancellationToken::new();
    let run = spawn_run(generic.clone(), token.clone());
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        generic.controller_state(&widget_kind()),
        Some(ControllerState::CacheSyncing)
    );
    token.cancel();

    let result = run.await?;
    assert!(matches!(
        result,
        Err(RunError::Cancelled {
            stage: RunStage::CacheSync
        })
    ));
    assert!(controller.started_at().is_none());
    assert!(controller.attempts().is_empty());
    assert_eq!(log.entries(), vec!["informer Widget stopped".to_owned()]);
    assert_eq!(
        generic.controller_state(&widget_kind()),
        Some(ControllerState::Stopped)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn processing_waits_for_the_slowest_cache() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let mut constructors = Vec::new();
    let mut controllers = Vec::new();
    for (kind, delay) in [
        (widget_kind(), 10),
        (gadget_kind(), 5),
        (config_map_kind(), 20),
    ] {
        let controller = Arc::new(RecordingController::new(kind.clone(), log.clone()));
        let informer = Arc::new(
            MemoryInformer::new(kind.clone())
                .with_objects([object(kind, "first")])
                .with_sync_delay(Duration::from_millis(delay)),
        );
        constructors.push(RecordingConstructor::new(controller.clone(), informer, log.clone()).boxed());
        controllers.push(controller);
    }
    let generic = Arc::new(Generic::new(test_config(), constructors)?);

    let token = CancellationToken::new();
    let run = spawn_run(generic.clone(), token.clone());
    wait_until("every controller to process", Duration::from_secs(5), || {
        controllers.iter().all(|c| !c.attempts().is_empty())
    })
    .await?;

    for controller in &controllers {
        let started = controller.started_at().expect("controller started");
        assert!(started >= Duration::from_millis(20), "started at {started:?}");
        let (_, first) = controller.attempts()[0].clone();
        assert!(first >= Duration::from_millis(20), "first attempt at {first:?}");
    }
    assert_eq!(
        generic.controller_state(&gadget_kind()),
        Some(ControllerState::Dispatching)
    );

    stop_dispatching(&token, run).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn workers_wait_for_every_controller_to_be_ready() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let slow = Arc::new(
        RecordingController::new(widget_kind(), log.clone())
            .with_ready_delay(Duration::from_millis(30)),
    );
    let eager = Arc::new(RecordingController::new(gadget_kind(), log.clone()));
    let generic = Arc::new(Generic::new(
        test_config(),
        vec![
            RecordingConstructor::new(
                slow.clone(),
                Arc::new(MemoryInformer::new(widget_kind()).with_objects([object(widget_kind(), "w")])),
                log.clone(),
            )
            .boxed(),
            RecordingConstructor::new(
                eager.clone(),
                Arc::new(MemoryInformer::new(gadget_kind()).with_objects([object(gadget_kind(), "g")])),
                log.clone(),
            )
            .boxed(),
        ],
    )?);
    assert!(!generic.holder(&widget_kind()).expect("holder").is_ready());
    assert!(generic.holder(&gadget_kind()).expect("holder").is_ready());

    let token = CancellationToken::new();
    let run = spawn_run(generic.clone(), token.clone());
    wait_until("controllers to start", Duration::from_secs(1), || {
        slow.started_at().is_some() && eager.started_at().is_some()
    })
    .await?;
    assert_eq!(
        generic.controller_state(&widget_kind()),
        Some(ControllerState::Activating)
    );
    assert!(eager.attempts().is_empty());

    wait_until("the eager controller to process", Duration::from_secs(1), || {
        !eager.attempts().is_empty()
    })
    .await?;
    let (_, first) = eager.attempts()[0].clone();
    assert!(first >= Duration::from_millis(30), "processed at {first:?}");
    assert!(generic.holder(&widget_kind()).expect("holder").is_ready());

    stop_dispatching(&token, run).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_after_dispatch_reports_the_dispatch_stage() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let controller = Arc::new(RecordingController::new(widget_kind(), log.clone()));
    let informer = Arc::new(
        MemoryInformer::new(widget_kind())
            .with_objects([object(widget_kind(), "a")])
            .with_sync_delay(Duration::from_millis(1)),
    );
    let generic = Arc::new(Generic::new(
        test_config(),
        vec![RecordingConstructor::new(controller.clone(), informer, log.clone()).boxed()],
    )?);

    let token = CancellationToken::new();
    let run = spawn_run(generic.clone(), token.clone());
    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        generic.controller_state(&widget_kind()),
        Some(ControllerState::Dispatching)
    );
    token.cancel();

    let result = run.await?;
    assert!(
        matches!(
            result,
            Err(RunError::Cancelled {
                stage: RunStage::Dispatching
            })
        ),
        "{result:?}"
    );
    assert_eq!(controller.attempts_for("a").len(), 1);
    assert_eq!(
        generic.controller_state(&widget_kind()),
        Some(ControllerState::Stopped)
    );
    Ok(())
}

/// Asks for a readiness signal and drops it without firing.
struct Abandoning(Arc<RecordingController>);

impl Constructor for Abandoning {
    fn describe(&self) -> Descriptor {
        Descriptor::new(widget_kind())
    }

    fn construct(
        &self,
        _config: &RuntimeConfig,
        ctx: &mut ConstructionContext<'_>,
    ) -> Result<Arc<dyn Controller>> {
        drop(ctx.ready_signal());
        ctx.register_informer(Arc::new(MemoryInformer::new(widget_kind())))?;
        Ok(self.0.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn dropped_readiness_signal_fails_the_run() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let controller = Arc::new(RecordingController::new(widget_kind(), log.clone()));
    let generic = Arc::new(Generic::new(
        test_config(),
        vec![Box::new(Abandoning(controller.clone())) as Box<dyn Constructor>],
    )?);

    let result = spawn_run(generic, CancellationToken::new()).await?;
    assert!(matches!(result, Err(RunError::ReadinessAbandoned { kind }) if kind == widget_kind()));
    assert!(log.position("controller Widget stopped").is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn teardown_runs_in_reverse_start_order() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let controller = Arc::new(RecordingController::new(widget_kind(), log.clone()));
    controller.script("a", [Step::Slow(Duration::from_millis(50))]);
    let informer = Arc::new(MemoryInformer::new(widget_kind()).with_objects([object(widget_kind(), "a")]));
    let generic = Arc::new(Generic::new(
        test_config(),
        vec![RecordingConstructor::new(controller.clone(), informer, log.clone()).boxed()],
    )?);

    let token = CancellationToken::new();
    let run = spawn_run(generic.clone(), token.clone());
    wait_until("processing to begin", Duration::from_secs(1), || {
        !controller.attempts().is_empty()
    })
    .await?;
    stop_dispatching(&token, run).await?;

    let processed = log.position("processed a").expect("in-flight work finished");
    let controller_stopped = log
        .position("controller Widget stopped")
        .expect("controller stopped");
    let informer_stopped = log
        .position("informer Widget stopped")
        .expect("informer stopped");
    assert!(processed < controller_stopped, "{:?}", log.entries());
    assert!(controller_stopped < informer_stopped, "{:?}", log.entries());
    assert_eq!(
        generic.controller_state(&widget_kind()),
        Some(ControllerState::Stopped)
    );
    assert_eq!(generic.telemetry().snapshot().processed, 1);
    Ok(())
}
