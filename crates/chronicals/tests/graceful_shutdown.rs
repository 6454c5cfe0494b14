mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use chronicals::{Action, HostStatus};
use common::{default_responder, Orchestrator};

#[tokio::test]
async fn safely_close_drains_in_flight_work_and_refuses_new() {
    common::init_tracing();
    let mut orchestrator = Orchestrator::start(default_responder()).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let handler_runs = runs.clone();
    let host = Arc::new(
        common::test_builder(orchestrator.endpoint())
            .route(
                "prompt",
                Action::from_fn(move |io, _ctx| {
                    let runs = handler_runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        let answer = io.render(json!({"kind": "INPUT_TEXT"})).await?;
                        Ok(answer.values.first().cloned().unwrap_or(Value::Null))
                    }
                }),
            )
            .build()
            .expect("host should build"),
    );
    host.listen().await.expect("listen should succeed");

    let conn = orchestrator.next_connection().await;
    conn.start_transaction("t1", "prompt");
    orchestrator.wait_for_call("SEND_IO_CALL").await;

    // Begin draining with t1 still live.
    let closer = {
        let host = host.clone();
        tokio::spawn(async move { host.safely_close().await })
    };
    orchestrator.wait_for_call("BEGIN_HOST_SHUTDOWN").await;

    // New work is refused during the drain.
    conn.start_transaction("t2", "prompt");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1, "t2 must be dropped");
    assert!(!closer.is_finished(), "drain must wait for t1");

    // Resolve t1; the drain completes within the grace period.
    conn.io_response("t1", "RETURN", json!(["done"]));
    tokio::time::timeout(Duration::from_secs(3), closer)
        .await
        .expect("safely_close must resolve after the drain empties")
        .expect("close task must not panic");
    assert_eq!(host.status(), HostStatus::Closed);

    let completes = orchestrator.calls_named("MARK_TRANSACTION_COMPLETE");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].data["transactionId"], json!("t1"));
}

#[tokio::test]
async fn safely_close_with_no_work_resolves_promptly() {
    common::init_tracing();
    let mut orchestrator = Orchestrator::start(default_responder()).await;

    let host = common::test_builder(orchestrator.endpoint())
        .route(
            "noop",
            Action::from_fn(|_io, _ctx| async { Ok(json!(null)) }),
        )
        .build()
        .expect("host should build");
    host.listen().await.expect("listen should succeed");
    let _conn = orchestrator.next_connection().await;

    tokio::time::timeout(Duration::from_secs(2), host.safely_close())
        .await
        .expect("idle drain must resolve quickly");
    assert_eq!(host.status(), HostStatus::Closed);
    assert_eq!(orchestrator.calls_named("BEGIN_HOST_SHUTDOWN").len(), 1);
}

#[tokio::test]
async fn immediately_close_forgets_everything() {
    common::init_tracing();
    let mut orchestrator = Orchestrator::start(default_responder()).await;

    let host = common::test_builder(orchestrator.endpoint())
        .route(
            "prompt",
            Action::from_fn(|io, _ctx| async move {
                io.render(json!({"kind": "INPUT_TEXT"})).await?;
                Ok(json!(null))
            }),
        )
        .build()
        .expect("host should build");
    host.listen().await.expect("listen should succeed");

    let conn = orchestrator.next_connection().await;
    conn.start_transaction("t1", "prompt");
    orchestrator.wait_for_call("SEND_IO_CALL").await;

    host.immediately_close();
    assert_eq!(host.status(), HostStatus::Closed);

    // No completion follows; the transaction was forgotten, not finished.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(orchestrator.calls_named("MARK_TRANSACTION_COMPLETE").is_empty());
}
