//! Replay invariants observed through the engine.

use std::sync::atomic::Ordering;

use replayflow::{
    EngineConfig, MemoryStore, NewWorkflowInstance, OperationType, Timer, Workflow, WorkflowId,
};
use serde_json::json;
use test_utils::engine_test;

use crate::support::helpers::TestApp;
use crate::support::workflows::{FanOutWorkflow, HelloWorkflow};

engine_test!(request_ids_are_deterministic, {
    let id = WorkflowId::new("hello-det");
    let mut observed = Vec::new();

    for _ in 0..2 {
        let app = TestApp::new();
        app.start(
            NewWorkflowInstance::new(HelloWorkflow::TYPE)
                .arg("Ada")
                .with_id(id.clone()),
        )
        .await?;
        app.step().await?;
        observed.push(app.store.operation_requests(&id).await);
    }

    assert_eq!(observed[0].len(), 1);
    assert_eq!(observed[0][0].id, observed[1][0].id);
    assert_eq!(observed[0][0].arguments, observed[1][0].arguments);
    Ok(())
});

engine_test!(repeated_calls_get_consecutive_iterations, {
    let app = TestApp::new();
    let wf = app
        .start(NewWorkflowInstance::new(FanOutWorkflow::TYPE).arg(json!(["a", "b", "c"])))
        .await?;
    app.step().await?;

    let requests = app.store.operation_requests(&wf.id).await;
    let greet = OperationType::operation("greeter", "greet");
    assert!(requests.iter().all(|r| r.operation_type == greet));
    assert_eq!(
        requests.iter().map(|r| r.iteration).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let done = app.run_to_end(&wf.id).await?;
    assert_eq!(
        done.result,
        Some(json!(["Hello, a!", "Hello, b!", "Hello, c!"]))
    );
    Ok(())
});

engine_test!(instance_version_never_decreases, {
    let app = TestApp::new();
    let wf = app
        .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg("Ada"))
        .await?;

    let mut versions = vec![wf.version];
    while app.step().await? > 0 {
        versions.push(app.instance(&wf.id).await?.version);
    }

    assert!(versions.windows(2).all(|w| w[0] <= w[1]), "{versions:?}");
    assert!(versions.last() > versions.first());
    Ok(())
});

engine_test!(rescheduling_a_timer_keeps_one_entry, {
    let app = TestApp::new();
    let wf = WorkflowId::new("wf-timers");
    let timers = &app.engine.stores().timers;

    timers.create_or_update(Timer::decision(&wf)).await?;
    let second = timers.create_or_update(Timer::decision(&wf)).await?;

    let stored = app.timers().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].version, second.version);
    assert_eq!(second.version, 1);
    Ok(())
});

engine_test!(duplicate_operation_delivery_is_ignored, {
    let app = TestApp::new();
    let wf = app
        .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg("Ada"))
        .await?;
    app.step().await?;
    app.step().await?;

    let request_id = app.store.operation_requests(&wf.id).await[0].id;
    app.engine.process_operation_request(&request_id).await?;

    let history = app.engine.operation_history(&wf.id, true).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(app.ops.greeter.calls.load(Ordering::SeqCst), 1);

    app.run_to_end(&wf.id).await?;
    app.engine.process_operation_request(&request_id).await?;
    assert_eq!(app.ops.greeter.calls.load(Ordering::SeqCst), 1);
    Ok(())
});

engine_test!(state_survives_engine_restart, {
    let store = MemoryStore::new();
    let wf = {
        let app = TestApp::on_store(store.clone(), EngineConfig::default());
        let wf = app
            .start(NewWorkflowInstance::new(HelloWorkflow::TYPE).arg("Ada"))
            .await?;
        app.step().await?;
        app.step().await?;
        wf
    };

    // A fresh engine over the same store picks up where the first stopped.
    let app = TestApp::on_store(store, EngineConfig::default());
    let done = app.run_to_end(&wf.id).await?;

    assert_eq!(done.result, Some(json!("Hello, Ada!")));
    assert_eq!(app.ops.greeter.calls.load(Ordering::SeqCst), 0);
    Ok(())
});
