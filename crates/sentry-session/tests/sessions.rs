//! Registry and streamer working together over several sessions.

use std::{sync::Arc, time::Duration};

use sentry_core::{Message, MessageType, testing::RecordingSink};
use sentry_pty::{Pty, PtySize, PtySpawner, mock::MockSpawner};
use sentry_session::{OutputStreamer, SessionRegistry};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("sink dropped")
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let spawner = MockSpawner::new();
    let registry = Arc::new(SessionRegistry::new());
    let (sink, mut rx) = RecordingSink::new();
    let sink = Arc::new(sink);
    let tracker = TaskTracker::new();

    for id in ["a", "b"] {
        let pty = spawner.spawn(PtySize::DEFAULT).unwrap();
        let handle = registry.insert(id, pty, PtySize::DEFAULT).await;
        OutputStreamer::new(handle, Arc::clone(&registry), sink.clone()).spawn(&tracker);
    }

    registry.get("a").await.unwrap().write(b"alpha").unwrap();
    let msg = next(&mut rx).await;
    assert_eq!(msg, Message::data("a", "alpha"));

    registry.get("b").await.unwrap().write(b"beta").unwrap();
    let msg = next(&mut rx).await;
    assert_eq!(msg, Message::data("b", "beta"));

    // Closing one session leaves the other running.
    assert!(registry.remove("a").await);
    assert_eq!(next(&mut rx).await, Message::close_shell("a"));
    assert!(registry.contains("b").await);

    let spawned = spawner.spawned();
    assert!(spawned[0].is_closed());
    assert!(!spawned[1].is_closed());
}

#[tokio::test]
async fn test_close_all_drains_every_streamer() {
    let spawner = MockSpawner::with_banner(b"$ ");
    let registry = Arc::new(SessionRegistry::new());
    let (sink, _rx) = RecordingSink::new();
    let sink = Arc::new(sink);
    let tracker = TaskTracker::new();

    for i in 0..4 {
        let pty = spawner.spawn(PtySize::DEFAULT).unwrap();
        let handle = registry.insert(format!("s{i}"), pty, PtySize::DEFAULT).await;
        OutputStreamer::new(handle, Arc::clone(&registry), sink.clone()).spawn(&tracker);
    }

    assert_eq!(registry.close_all().await, 4);

    tracker.close();
    tokio::time::timeout(Duration::from_secs(2), tracker.wait())
        .await
        .expect("streamers did not finish");

    assert!(registry.is_empty().await);
    assert_eq!(sink.sent_of(&MessageType::CloseShell).await.len(), 4);
}

#[tokio::test]
async fn test_stale_streamer_keeps_successor() {
    let spawner = MockSpawner::new();
    let registry = Arc::new(SessionRegistry::new());
    let (sink, mut rx) = RecordingSink::new();
    let sink = Arc::new(sink);
    let tracker = TaskTracker::new();

    let first = spawner.spawn(PtySize::DEFAULT).unwrap();
    let handle = registry.insert("s1", first, PtySize::DEFAULT).await;
    OutputStreamer::new(handle, Arc::clone(&registry), sink.clone()).spawn(&tracker);

    // Reusing the id closes the first terminal. Its streamer must neither
    // unregister the second one nor announce a close for the shared id.
    let second = spawner.spawn(PtySize::DEFAULT).unwrap();
    let handle = registry.insert("s1", second, PtySize::DEFAULT).await;
    OutputStreamer::new(handle, Arc::clone(&registry), sink.clone()).spawn(&tracker);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.contains("s1").await);
    assert!(sink.sent_of(&MessageType::CloseShell).await.is_empty());

    registry.get("s1").await.unwrap().write(b"still here").unwrap();
    assert_eq!(next(&mut rx).await, Message::data("s1", "still here"));
}

#[tokio::test]
async fn test_output_after_close_is_dropped() {
    let spawner = MockSpawner::new();
    let registry = Arc::new(SessionRegistry::new());
    let (sink, _rx) = RecordingSink::new();
    let sink = Arc::new(sink);
    let tracker = TaskTracker::new();

    let pty = spawner.spawn(PtySize::DEFAULT).unwrap();
    let handle = registry.insert("s1", pty, PtySize::DEFAULT).await;
    OutputStreamer::new(handle, Arc::clone(&registry), sink.clone()).spawn(&tracker);

    let mock = Arc::clone(&spawner.spawned()[0]);
    for _ in 0..16 {
        mock.emit(b"burst");
    }
    assert!(registry.remove("s1").await);
    let at_close = sink.sent().await.len();

    tracker.close();
    tokio::time::timeout(Duration::from_secs(2), tracker.wait())
        .await
        .expect("streamer did not finish");

    let after = sink.sent().await.split_off(at_close);
    assert_eq!(after, vec![Message::close_shell("s1")]);
}
