mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use chronicals::wire::types::LoadingState;
use chronicals::Action;
use common::{Orchestrator, Responder};

#[tokio::test]
async fn reconnect_replays_pending_io_and_loading() {
    common::init_tracing();

    // Answer SEND_IO_CALL only after the first connection is gone.
    let gate = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let responder_gate = gate.clone();
    let responder: Responder = Arc::new(move |method, _data| match method {
        "INITIALIZE_HOST" => Some(common::init_success()),
        "SEND_IO_CALL" => {
            if responder_gate.load(std::sync::atomic::Ordering::SeqCst) {
                Some(json!({"type": "SUCCESS"}))
            } else {
                None
            }
        }
        _ => Some(json!({"type": "SUCCESS"})),
    });
    let mut orchestrator = Orchestrator::start(responder).await;

    let host = common::test_builder(orchestrator.endpoint())
        .route(
            "slowPrompt",
            Action::from_fn(|io, ctx| async move {
                ctx.loading()
                    .set(LoadingState {
                        label: Some("Waiting".to_string()),
                        ..Default::default()
                    })
                    .await;
                let answer = io.render(json!({"kind": "INPUT_TEXT"})).await?;
                Ok(answer.values.first().cloned().unwrap_or(Value::Null))
            }),
        )
        .build()
        .expect("host should build");
    host.listen().await.expect("listen should succeed");

    let conn1 = orchestrator.next_connection().await;
    conn1.start_transaction("t3", "slowPrompt");

    // Loading state delivered on conn1; the io call goes unanswered and
    // stays pending.
    orchestrator.wait_for_call("SEND_LOADING_CALL").await;
    orchestrator.wait_for_call("SEND_IO_CALL").await;

    // Give the send loop time to exhaust its (short) retry budget so the
    // handler is parked waiting on the user, with the artifact pending.
    tokio::time::sleep(Duration::from_millis(700)).await;

    // Kill the connection; from here on, io calls get answered.
    gate.store(true, std::sync::atomic::Ordering::SeqCst);
    conn1.close();

    // The host reconnects under the same instance id, re-declares, and
    // replays both pending artifacts on the new connection.
    let conn2 = orchestrator.next_connection().await;
    let declares = orchestrator.wait_for_calls("INITIALIZE_HOST", 2).await;
    assert_eq!(declares[1].connection, conn2.index);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let io_replays: Vec<_> = orchestrator
            .calls_named("SEND_IO_CALL")
            .into_iter()
            .filter(|call| call.connection == conn2.index)
            .collect();
        let loading_replays: Vec<_> = orchestrator
            .calls_named("SEND_LOADING_CALL")
            .into_iter()
            .filter(|call| call.connection == conn2.index)
            .collect();
        if !io_replays.is_empty() && !loading_replays.is_empty() {
            assert_eq!(io_replays[0].data["transactionId"], json!("t3"));
            assert_eq!(loading_replays[0].data["transactionId"], json!("t3"));
            assert_eq!(loading_replays[0].data["label"], json!("Waiting"));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pending artifacts were not replayed after reconnect"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The conversation survives the reconnect: answer the prompt and the
    // transaction completes on the new connection.
    conn2.io_response("t3", "RETURN", json!(["ada"]));
    let complete = orchestrator.wait_for_call("MARK_TRANSACTION_COMPLETE").await;
    assert_eq!(complete.connection, conn2.index);
    assert_eq!(complete.data["transactionId"], json!("t3"));

    host.immediately_close();
}

#[tokio::test]
async fn rejected_render_surfaces_render_error() {
    common::init_tracing();

    // The orchestrator answers SEND_IO_CALL with a terminal error.
    let responder: Responder = Arc::new(|method, _data| match method {
        "INITIALIZE_HOST" => Some(common::init_success()),
        "SEND_IO_CALL" => Some(json!({"type": "ERROR", "message": "transaction closed"})),
        _ => Some(json!({"type": "SUCCESS"})),
    });
    let mut orchestrator = Orchestrator::start(responder).await;

    let host = common::test_builder(orchestrator.endpoint())
        .route(
            "doomedPrompt",
            Action::from_fn(|io, _ctx| async move {
                // The orchestrator rejects the render.
                let result = io.render(json!({"kind": "INPUT_TEXT"})).await;
                assert!(matches!(result, Err(chronicals::IoError::RenderError(_))));
                Err::<Value, _>(chronicals::HandlerError::msg("render rejected"))
            }),
        )
        .build()
        .expect("host should build");
    host.listen().await.expect("listen should succeed");

    let conn = orchestrator.next_connection().await;
    conn.start_transaction("t9", "doomedPrompt");

    // The rejected render surfaces as a FAILURE completion.
    let complete = orchestrator.wait_for_call("MARK_TRANSACTION_COMPLETE").await;
    assert_eq!(complete.data["resultStatus"], json!("FAILURE"));

    host.immediately_close();
}
