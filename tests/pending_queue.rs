//! Confirms the pending-frame queue's FIFO-with-drop-oldest contract holds
//! through the registry's public API surface, not just its internal tests.

use std::time::Instant;

use appgate::constants::PENDING_QUEUE_MAX;
use appgate::registry::{BackendSession, Registry};

/// A syntactically valid 64-hex session id, distinguishable by its last digit.
fn sid(n: u8) -> String {
    format!("{}{n}", "b".repeat(63))
}

#[test]
fn frames_queued_before_readiness_drain_in_order_after_ready() {
    let registry = Registry::new(vec![]);
    let session_id = &sid(1);

    registry.add_backend_session(BackendSession::new(session_id.to_string(), Instant::now()));

    for i in 0..10 {
        let dropped = registry.enqueue_pending(session_id, format!("frame-{i}"));
        assert!(!dropped, "queue isn't full yet");
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    registry.mark_backend_ready(session_id, &tx);
    drop(tx);

    let mut drained = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        drained.push(msg);
    }
    let expected: Vec<_> = (0..10)
        .map(|i| tokio_tungstenite::tungstenite::Message::Text(format!("frame-{i}").into()))
        .collect();
    assert_eq!(drained, expected);
    assert!(registry.backend_session_ready(session_id));
}

#[test]
fn overflow_drops_the_oldest_frame_first() {
    let registry = Registry::new(vec![]);
    let session_id = &sid(2);
    registry.add_backend_session(BackendSession::new(session_id.to_string(), Instant::now()));

    let total = PENDING_QUEUE_MAX + 50;
    let mut any_dropped = false;
    for i in 0..total {
        if registry.enqueue_pending(session_id, format!("frame-{i}")) {
            any_dropped = true;
        }
    }
    assert!(any_dropped);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    registry.mark_backend_ready(session_id, &tx);
    drop(tx);

    let mut drained = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        drained.push(msg);
    }
    assert_eq!(drained.len(), PENDING_QUEUE_MAX);
    assert_eq!(
        drained.first().unwrap(),
        &tokio_tungstenite::tungstenite::Message::Text(
            format!("frame-{}", total - PENDING_QUEUE_MAX).into()
        )
    );
    assert_eq!(
        drained.last().unwrap(),
        &tokio_tungstenite::tungstenite::Message::Text(format!("frame-{}", total - 1).into())
    );
}
