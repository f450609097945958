//! The timer processor loop: leasing, failure handling, and shutdown.

use std::time::Duration;

use replayflow::{
    NewWorkflowInstance, RuntimeConfig, Timer, TimerProcessor, Workflow, WorkflowId,
    WorkflowStatus,
};
use serde_json::json;
use test_utils::{engine_test, wait_until};
use time::OffsetDateTime;
use tokio::sync::oneshot;

use crate::support::helpers::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, TestApp, test_runtime_config,
};
use crate::support::workflows::{FanOutWorkflow, HelloWorkflow};

engine_test!(running_processor_completes_workflows, {
    let app = TestApp::new();
    let mut ids = Vec::new();
    for name in ["Ada", "Grace", "Barbara"] {
        let wf = app
            .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg(name))
            .await?;
        ids.push(wf.id);
    }
    let fan_out = app
        .start(NewWorkflowInstance::new(FanOutWorkflow::TYPE).arg(json!(["x", "y"])))
        .await?;
    ids.push(fan_out.id);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let processor = TimerProcessor::new(app.engine.clone(), test_runtime_config());
    let handle = tokio::spawn(processor.run(async {
        shutdown_rx.await.ok();
    }));

    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || async {
        for id in &ids {
            if app.instance(id).await?.status == WorkflowStatus::Active {
                return Ok(None);
            }
        }
        Ok(Some(()))
    })
    .await?;

    shutdown_tx.send(()).ok();
    handle.await??;

    for id in &ids {
        assert_eq!(app.instance(id).await?.status, WorkflowStatus::Completed);
    }
    Ok(())
});

engine_test!(failed_handler_leaves_timer_leased, {
    let app = TestApp::new();
    let ghost = WorkflowId::new("ghost");
    app.engine
        .stores()
        .timers
        .create_or_update(Timer::decision(&ghost))
        .await?;

    let before = OffsetDateTime::now_utc();
    assert_eq!(app.step().await?, 1);

    let timers = app.timers().await;
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].retries, 1);
    assert!(timers[0].timeout > before + time::Duration::seconds(20));

    // Invisible until the lease runs out.
    assert_eq!(app.step().await?, 0);
    Ok(())
});

engine_test!(lease_limits_batch_size, {
    let app = TestApp::new();
    for i in 0..5 {
        app.engine
            .stores()
            .timers
            .create_or_update(Timer::decision(&WorkflowId::new(format!("ghost-{i}"))))
            .await?;
    }

    let processor = TimerProcessor::new(
        app.engine.clone(),
        RuntimeConfig {
            batch_size: 2,
            ..test_runtime_config()
        },
    );

    assert_eq!(processor.run_once().await?, 2);
    assert_eq!(processor.run_once().await?, 2);
    assert_eq!(processor.run_once().await?, 1);
    assert_eq!(processor.run_once().await?, 0);
    Ok(())
});

engine_test!(shutdown_returns_promptly_when_idle, {
    let app = TestApp::new();
    let processor = TimerProcessor::new(app.engine.clone(), test_runtime_config());
    assert_eq!(processor.worker_id(), "test-worker");

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        processor.run(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await;

    assert!(matches!(result, Ok(Ok(()))));
    Ok(())
});

engine_test!(generated_worker_ids_are_unique, {
    let app = TestApp::new();
    let config = RuntimeConfig::default();
    let a = TimerProcessor::new(app.engine.clone(), config.clone());
    let b = TimerProcessor::new(app.engine.clone(), config);
    assert_ne!(a.worker_id(), b.worker_id());
    Ok(())
});
