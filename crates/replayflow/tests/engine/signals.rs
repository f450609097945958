//! Durable waits and signals.

use std::time::Duration;

use replayflow::{
    Error, NewWorkflowInstance, OperationError, TimerKind, Workflow, WorkflowStatus,
};
use serde_json::json;
use test_utils::engine_test;
use time::OffsetDateTime;

use crate::support::helpers::TestApp;
use crate::support::workflows::ApprovalWorkflow;

fn approval(timeout_ms: u64) -> NewWorkflowInstance {
    NewWorkflowInstance::new(ApprovalWorkflow::TYPE).arg(timeout_ms)
}

engine_test!(unmet_wait_schedules_decision_at_deadline, {
    let app = TestApp::new();
    let wf = app.start(approval(5_000)).await?;

    let before = OffsetDateTime::now_utc();
    app.step().await?;

    let timers = app.timers().await;
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].kind, TimerKind::Decision);
    let delay = timers[0].timeout - before;
    assert!(delay > time::Duration::seconds(4), "delay was {delay}");
    assert!(delay <= time::Duration::seconds(5), "delay was {delay}");

    assert!(app.store.operation_requests(&wf.id).await.is_empty());
    assert_eq!(app.step().await?, 0);
    assert_eq!(app.instance(&wf.id).await?.status, WorkflowStatus::Active);
    Ok(())
});

engine_test!(signal_satisfies_wait, {
    let app = TestApp::new();
    let wf = app.start(approval(60_000)).await?;
    app.step().await?;

    let signalled = app
        .engine
        .execute_signal_consumer(&wf.id, "approve", vec![json!("grace")])
        .await?;
    assert_eq!(signalled.state["approved_by"], json!("grace"));
    assert_eq!(signalled.status, WorkflowStatus::Active);

    let done = app.run_to_end(&wf.id).await?;
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.result, Some(json!({"approved_by": "grace"})));
    assert!(app.history(&wf.id).await?.is_empty());
    Ok(())
});

engine_test!(unbounded_wait_is_scheduled_far_in_the_future, {
    let app = TestApp::new();
    let wf = app.start(approval(u64::MAX)).await?;

    let before = OffsetDateTime::now_utc();
    assert_eq!(app.step().await?, 1);

    let timers = app.timers().await;
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].kind, TimerKind::Decision);
    assert!(timers[0].timeout > before + time::Duration::days(365 * 1000));
    assert_eq!(app.step().await?, 0);

    app.engine
        .execute_signal_consumer(&wf.id, "approve", vec![json!("grace")])
        .await?;
    let done = app.run_to_end(&wf.id).await?;
    assert_eq!(done.status, WorkflowStatus::Completed);
    Ok(())
});

engine_test!(expired_wait_records_timeout_and_resumes, {
    let app = TestApp::new();
    let wf = app.start(approval(50)).await?;
    app.step().await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let done = app.run_to_end(&wf.id).await?;

    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.result, Some(json!("expired")));

    let history = app.history(&wf.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].error.as_ref().unwrap().kind,
        OperationError::WAIT_TIMEOUT
    );
    Ok(())
});

engine_test!(signal_to_completed_workflow_is_rejected, {
    let app = TestApp::new();
    let wf = app.start(approval(60_000)).await?;
    app.engine
        .execute_signal_consumer(&wf.id, "approve", vec![json!("grace")])
        .await?;
    let done = app.run_to_end(&wf.id).await?;
    assert_eq!(done.status, WorkflowStatus::Completed);

    let err = app
        .engine
        .execute_signal_consumer(&wf.id, "approve", vec![json!("mallory")])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::WorkflowTerminated {
            status: WorkflowStatus::Completed,
            action: "signals",
            ..
        }
    ));
    assert_eq!(app.instance(&wf.id).await?, done);
    assert!(app.timers().await.is_empty());
    Ok(())
});

engine_test!(unknown_signal_is_rejected, {
    let app = TestApp::new();
    let wf = app.start(approval(60_000)).await?;

    let err = app
        .engine
        .execute_signal_consumer(&wf.id, "reject", vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownSignal { ref signal, .. } if signal == "reject"));
    assert_eq!(app.instance(&wf.id).await?.version, wf.version);
    Ok(())
});

engine_test!(signal_arguments_are_validated, {
    let app = TestApp::new();
    let wf = app.start(approval(60_000)).await?;

    let err = app
        .engine
        .execute_signal_consumer(&wf.id, "approve", vec![json!(7)])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidArguments { ref method, .. } if method == "approval.approve"));
    assert_eq!(app.instance(&wf.id).await?.version, wf.version);
    Ok(())
});

engine_test!(failing_signal_handler_leaves_state_untouched, {
    let app = TestApp::new();
    let wf = app.start(approval(60_000)).await?;

    let err = app
        .engine
        .execute_signal_consumer(&wf.id, "approve", vec![json!("")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SignalFailed { .. }));
    let current = app.instance(&wf.id).await?;
    assert_eq!(current.state["approved_by"], json!(null));
    assert_eq!(current.version, wf.version);
    Ok(())
});
