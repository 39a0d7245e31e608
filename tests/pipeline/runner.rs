use std::{sync::Arc, time::Duration};

use anyhow::Result;
use ctrlkit::{App, Constructor, LeaderElector, LeaderFuture, MemoryInformer};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::support::helpers::{
    init_tracing, object, test_config, wait_until, widget_kind, EventLog, FailingConstructor,
    RecordingConstructor, RecordingController,
};

/// Grants leadership after a fixed delay; the test revokes it through `leader`.
struct DelayedElector {
    delay: Duration,
    leader: CancellationToken,
}

impl LeaderElector for DelayedElector {
    fn acquire<'a>(&'a self, shutdown: CancellationToken) -> LeaderFuture<'a> {
        Box::pin(async move {
            tokio::select! {
                _ = shutdown.cancelled() => anyhow::bail!("shutdown before acquiring leadership"),
                _ = sleep(self.delay) => Ok(self.leader.clone()),
            }
        })
    }
}

fn widget_app(log: &EventLog) -> (App, Arc<RecordingController>) {
    let controller = Arc::new(RecordingController::new(widget_kind(), log.clone()));
    let informer = Arc::new(MemoryInformer::new(widget_kind()).with_objects([object(widget_kind(), "a")]));
    let app = App::new(
        test_config(),
        vec![RecordingConstructor::new(controller.clone(), informer, log.clone()).boxed()],
    );
    (app, controller)
}

#[tokio::test(start_paused = true)]
async fn app_returns_cleanly_on_cancellation() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let (app, controller) = widget_app(&log);
    let shutdown = app.cancellation_token();
    let run = tokio::spawn(app.run());

    wait_until("the controller to process", Duration::from_secs(1), || {
        !controller.attempts().is_empty()
    })
    .await?;
    shutdown.cancel();
    run.await??;
    assert!(log.position("informer Widget stopped").is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn controllers_run_only_while_leading() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let (app, controller) = widget_app(&log);
    let leader = CancellationToken::new();
    let app = app.with_leader_elector(Arc::new(DelayedElector {
        delay: Duration::from_millis(50),
        leader: leader.clone(),
    }));
    let shutdown = app.cancellation_token();
    let started = Instant::now();
    let run = tokio::spawn(app.run());

    wait_until("the controller to process", Duration::from_secs(1), || {
        !controller.attempts().is_empty()
    })
    .await?;
    assert!(started.elapsed() >= Duration::from_millis(50));

    leader.cancel();
    let err = run.await?.expect_err("losing leadership is an error");
    assert!(err.to_string().contains("leader status lost"), "{err:#}");
    assert!(log.position("controller Widget stopped").is_some());
    assert!(!shutdown.is_cancelled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_waiting_for_leadership_is_clean() -> Result<()> {
    init_tracing();
    let log = EventLog::default();
    let (app, controller) = widget_app(&log);
    let app = app.with_leader_elector(Arc::new(DelayedElector {
        delay: Duration::from_secs(3600),
        leader: CancellationToken::new(),
    }));
    let shutdown = app.cancellation_token();
    let run = tokio::spawn(app.run());

    sleep(Duration::from_millis(10)).await;
    shutdown.cancel();
    run.await??;
    assert!(controller.started_at().is_none());
    assert!(log.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn construction_failures_abort_before_running() -> Result<()> {
    init_tracing();
    let app = App::new(
        test_config(),
        vec![Box::new(FailingConstructor(widget_kind())) as Box<dyn Constructor>],
    );
    let err = app.run().await.expect_err("construction fails");
    let rendered = format!("{err:#}");
    assert!(rendered.contains("failed to construct controllers"), "{rendered}");
    assert!(rendered.contains("missing credentials"), "{rendered}");
    Ok(())
}
