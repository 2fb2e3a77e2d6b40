use bytes::Bytes;
use carepath_bus::{Bus, ConnectionEvent, LocalBus};
use carepath_store::Store;
use carepath_tests::harness::{TestHub, payload_str, recv_reply, try_recv_reply};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn fifo_processing_with_one_reply_each() {
    let hub = TestHub::start("carepath");
    let mut replies = hub.subscribe("carepath/response/valid/#");

    for i in 0..10 {
        hub.publish("carepath/request/store_user", &format!("user{i};pw;resident;"));
    }

    // Replies arrive in arrival order, one per request, none swapped.
    for i in 0..10 {
        let reply = recv_reply(&mut replies, WAIT).await;
        assert_eq!(reply.topic, format!("carepath/response/valid/user{i}/response"));
        assert_eq!(payload_str(&reply), "VALID");
    }
    assert!(
        try_recv_reply(&mut replies, Duration::from_millis(100))
            .await
            .is_none()
    );

    hub.stop().await;
}

#[tokio::test]
async fn stop_drains_pending_messages() {
    let hub = TestHub::start("carepath");
    let mut replies = hub.subscribe("carepath/response/valid/#");

    for i in 0..25 {
        hub.publish("carepath/request/store_user", &format!("user{i};pw;resident;"));
    }

    // Let the listener move the burst into the ingress queue, then stop while
    // most of it is still queued.
    tokio::time::sleep(Duration::from_millis(10)).await;
    hub.stop().await;

    // Every queued request was processed before the worker exited. The bus is
    // gone now, so the subscription yields the buffered replies then closes.
    let mut seen = 0;
    while let Some(reply) = replies.recv().await {
        assert_eq!(reply.topic, format!("carepath/response/valid/user{seen}/response"));
        seen += 1;
    }
    assert_eq!(seen, 25);
}

#[tokio::test]
async fn empty_payload_is_dropped_silently() {
    let hub = TestHub::start("carepath");
    let mut replies = hub.subscribe("carepath/response/valid/#");

    hub.publish("carepath/request/store_user", "");
    hub.publish("carepath/request/store_user", "zoe;pw;resident;");

    let reply = recv_reply(&mut replies, WAIT).await;
    assert_eq!(reply.topic, "carepath/response/valid/zoe/response");
    assert!(
        try_recv_reply(&mut replies, Duration::from_millis(100))
            .await
            .is_none()
    );

    hub.stop().await;
}

#[tokio::test]
async fn unknown_topic_gets_no_reply() {
    let hub = TestHub::start("carepath");
    let mut replies = hub.subscribe("carepath/response/#");

    hub.publish("carepath/request/frobnicate", "whatever;");
    assert!(
        try_recv_reply(&mut replies, Duration::from_millis(200))
            .await
            .is_none()
    );

    hub.stop().await;
}

#[tokio::test]
async fn retained_request_not_reprocessed_after_restart() {
    let bus = Arc::new(LocalBus::new());
    bus.publish_retained(
        "carepath/request/store_user",
        Bytes::from_static(b"alice;pw;resident;"),
    )
    .unwrap();

    let mut replies = bus.subscribe("carepath/response/valid/alice/response");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("carepath.db");

    // The first session replays the retained request exactly once.
    let hub = TestHub::start_on("carepath", bus.clone(), Store::open(Some(&path)).unwrap());
    assert_eq!(payload_str(&recv_reply(&mut replies, WAIT).await), "VALID");

    // The broker connection drops; the listener clears every retained
    // request topic in response.
    bus.emit_connection_event(ConnectionEvent::Disconnected);
    tokio::time::sleep(Duration::from_millis(50)).await;
    hub.stop().await;

    // A restarted session sees no stale request and publishes nothing.
    let hub = TestHub::start_on("carepath", bus.clone(), Store::open(Some(&path)).unwrap());
    assert!(
        try_recv_reply(&mut replies, Duration::from_millis(200))
            .await
            .is_none()
    );
    hub.stop().await;
}
