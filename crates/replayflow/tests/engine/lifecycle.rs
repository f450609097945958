//! Instance creation, the decision/operation/callback cycle, and queries.

use std::sync::atomic::Ordering;

use replayflow::{
    CallbackRef, Error, NewWorkflowInstance, TimerKind, Workflow, WorkflowId, WorkflowStatus,
};
use serde_json::json;
use test_utils::engine_test;

use crate::support::helpers::{AUDIT_CALLBACK, TestApp};
use crate::support::workflows::{ApprovalWorkflow, HelloWorkflow};

engine_test!(single_call_runs_decision_operation_decision_callback, {
    let app = TestApp::new();
    let wf = app
        .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg("Ada"))
        .await?;
    assert_eq!(wf.status, WorkflowStatus::Active);
    assert_eq!(app.timer_kinds().await, vec![TimerKind::Decision]);

    app.step().await?;
    assert_eq!(app.timer_kinds().await, vec![TimerKind::OperationRequest]);
    assert_eq!(app.store.operation_requests(&wf.id).await.len(), 1);

    app.step().await?;
    assert_eq!(app.timer_kinds().await, vec![TimerKind::Decision]);
    assert_eq!(app.ops.greeter.calls.load(Ordering::SeqCst), 1);

    app.step().await?;
    assert_eq!(app.timer_kinds().await, vec![TimerKind::Callback]);

    let done = app.instance(&wf.id).await?;
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.result, Some(json!("Hello, Ada!")));
    assert_eq!(done.state["greeting"], json!("Hello, Ada!"));

    app.step().await?;
    assert!(app.timers().await.is_empty());
    Ok(())
});

engine_test!(unknown_workflow_type_is_rejected, {
    let app = TestApp::new();
    let err = app
        .engine
        .create_workflow_instance(NewWorkflowInstance::new("nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownWorkflowType(ref t) if t == "nope"));
    assert!(app.engine.list_workflow_instances().await?.is_empty());
    assert!(app.timers().await.is_empty());
    Ok(())
});

engine_test!(entry_arguments_are_validated_at_creation, {
    let app = TestApp::new();

    let err = app
        .engine
        .create_workflow_instance(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg(42))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArguments { .. }));

    let err = app
        .engine
        .create_workflow_instance(NewWorkflowInstance::new(HelloWorkflow::TYPE))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expected 1 arguments, got 0"));

    assert!(app.engine.list_workflow_instances().await?.is_empty());
    Ok(())
});

engine_test!(unknown_callback_is_rejected, {
    let app = TestApp::new();
    let err = app
        .engine
        .create_workflow_instance(
            NewWorkflowInstance::new(HelloWorkflow::TYPE)
                .arg("Ada")
                .with_callback(CallbackRef::new("missing")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownCallback(_)));
    Ok(())
});

engine_test!(correlation_id_makes_creation_idempotent, {
    let app = TestApp::new();
    let request = NewWorkflowInstance::new(HelloWorkflow::TYPE)
        .arg("Ada")
        .with_correlation_id("order-17");

    let first = app.start(request.clone()).await?;
    let second = app.start(request).await?;

    assert_eq!(first.id, second.id);
    assert_eq!(app.engine.list_workflow_instances().await?.len(), 1);
    Ok(())
});

engine_test!(same_correlation_id_on_another_type_creates_new_instance, {
    let app = TestApp::new();
    let hello = app
        .start(
            NewWorkflowInstance::new(HelloWorkflow::TYPE)
                .arg("Ada")
                .with_correlation_id("shared"),
        )
        .await?;
    let approval = app
        .start(
            NewWorkflowInstance::new(ApprovalWorkflow::TYPE)
                .arg(1_000)
                .with_correlation_id("shared"),
        )
        .await?;

    assert_ne!(hello.id, approval.id);
    Ok(())
});

engine_test!(explicit_id_is_used_and_duplicates_fail, {
    let app = TestApp::new();
    let id = WorkflowId::new("greeting-1");
    let wf = app
        .start(
            NewWorkflowInstance::new(HelloWorkflow::TYPE)
                .arg("Ada")
                .with_id(id.clone()),
        )
        .await?;
    assert_eq!(wf.id, id);

    let err = app
        .engine
        .create_workflow_instance(
            NewWorkflowInstance::new(HelloWorkflow::TYPE)
                .arg("Bob")
                .with_id(id.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateWorkflowInstance(_)));
    Ok(())
});

engine_test!(initial_state_comes_from_default, {
    let app = TestApp::new();
    let wf = app
        .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg("Ada"))
        .await?;

    assert_eq!(wf.state["greeting"], json!(null));
    assert_eq!(wf.initial_args, vec![json!("Ada")]);
    assert_eq!(wf.version, 0);
    Ok(())
});

engine_test!(callback_sees_terminal_instance, {
    let app = TestApp::new();
    let wf = app
        .start(
            NewWorkflowInstance::new(HelloWorkflow::TYPE)
                .arg("Ada")
                .with_callback(CallbackRef::new(AUDIT_CALLBACK)),
        )
        .await?;

    app.run_to_end(&wf.id).await?;

    let seen = app.audit.seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, wf.id);
    assert_eq!(seen[0].status, WorkflowStatus::Completed);
    Ok(())
});

engine_test!(redundant_decision_does_not_duplicate_work, {
    let app = TestApp::new();
    let wf = app
        .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg("Ada"))
        .await?;

    app.engine.process_decision(&wf.id).await?;
    app.engine.process_decision(&wf.id).await?;
    app.run_to_end(&wf.id).await?;

    assert_eq!(app.store.operation_requests(&wf.id).await.len(), 1);
    assert_eq!(app.ops.greeter.calls.load(Ordering::SeqCst), 1);
    Ok(())
});

engine_test!(decision_on_finished_workflow_is_a_no_op, {
    let app = TestApp::new();
    let wf = app
        .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg("Ada"))
        .await?;
    let done = app.run_to_end(&wf.id).await?;

    app.engine.process_decision(&wf.id).await?;

    assert_eq!(app.instance(&wf.id).await?, done);
    assert!(app.timers().await.is_empty());
    Ok(())
});
