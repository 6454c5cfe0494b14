mod common;

use std::time::Duration;

use serde_json::json;

use chronicals::Action;
use common::{default_responder, Orchestrator};

#[tokio::test]
async fn unresponsive_peer_is_closed_and_reconnected() {
    common::init_tracing();
    let mut orchestrator = Orchestrator::start(default_responder()).await;

    let host = common::test_builder(orchestrator.endpoint())
        .ping_interval(Duration::from_millis(100))
        .ping_timeout(Duration::from_millis(100))
        .close_unresponsive_connection_timeout(Duration::from_millis(400))
        .route(
            "noop",
            Action::from_fn(|_io, _ctx| async { Ok(json!(null)) }),
        )
        .build()
        .expect("host should build");
    host.listen().await.expect("listen should succeed");

    let conn1 = orchestrator.next_connection().await;
    orchestrator.wait_for_calls("INITIALIZE_HOST", 1).await;

    // The peer goes quiet: the TCP connection stays up but nothing is
    // read, so pings go unanswered.
    conn1.stop_reading();

    // The ping loop must eventually force the socket closed and the
    // session must reconnect and re-declare.
    let conn2 = tokio::time::timeout(Duration::from_secs(5), orchestrator.next_connection())
        .await
        .expect("host never reconnected after unresponsive peer");
    let declares = orchestrator.wait_for_calls("INITIALIZE_HOST", 2).await;
    assert_eq!(declares[1].connection, conn2.index);

    host.immediately_close();
}

#[tokio::test]
async fn transient_ping_failures_do_not_close_a_fresh_connection() {
    common::init_tracing();
    let mut orchestrator = Orchestrator::start(default_responder()).await;

    let host = common::test_builder(orchestrator.endpoint())
        .ping_interval(Duration::from_millis(100))
        .ping_timeout(Duration::from_millis(100))
        // Generous threshold: a few failed pings are not enough.
        .close_unresponsive_connection_timeout(Duration::from_secs(30))
        .route(
            "noop",
            Action::from_fn(|_io, _ctx| async { Ok(json!(null)) }),
        )
        .build()
        .expect("host should build");
    host.listen().await.expect("listen should succeed");

    let conn1 = orchestrator.next_connection().await;
    conn1.stop_reading();

    // Pings fail for a while, but the stale threshold is far away; the
    // connection must remain the only one.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let second = tokio::time::timeout(
        Duration::from_millis(200),
        orchestrator.next_connection(),
    )
    .await;
    assert!(
        second.is_err(),
        "host must not reconnect before the unresponsiveness threshold"
    );

    host.immediately_close();
}
