//! Integration tests for flow-controlled frame fan-out.
//!
//! Validates:
//! - production runs only while a session has subscribers
//! - every Nth capture is emitted with a contiguous sequence
//! - at most one capture is ever unacknowledged
//! - a full viewer queue drops frames for that viewer only
//! - losing the capture source ends the stream but not the session

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use pilot_deck::config::StreamConfig;
use pilot_deck::driver::BrowserResource;
use pilot_deck::models::result::RunOutcome;
use pilot_deck::stream::FrameStreamer;

use super::test_helpers::{harness, request, test_config, FakeBrowser, WAIT};

fn streamer(fps: u32, max_capture_fps: u32, sink_capacity: usize) -> FrameStreamer {
    let config = StreamConfig {
        fps,
        max_capture_fps,
        sink_capacity,
        ..StreamConfig::default()
    };
    FrameStreamer::new(&config, Handle::current())
}

fn source() -> (Arc<FakeBrowser>, Arc<dyn BrowserResource>) {
    let browser = Arc::new(FakeBrowser::default());
    let source = Arc::clone(&browser) as Arc<dyn BrowserResource>;
    (browser, source)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_capture_without_subscribers() {
    let streamer = streamer(50, 100, 2);
    let (browser, source) = source();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(browser.captures(), 0);
    assert!(!streamer.is_producing("s1"));

    let subscription = streamer.subscribe("s1", source);
    assert!(streamer.is_producing("s1"));
    drop(subscription);

    assert!(!streamer.is_producing("s1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = browser.captures();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(browser.captures(), settled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn production_is_shared_and_stops_with_last_viewer() {
    let streamer = streamer(50, 100, 2);
    let (browser, source) = source();

    let mut first = streamer.subscribe("s1", Arc::clone(&source));
    let mut second = streamer.subscribe("s1", source);
    assert_eq!(streamer.subscriber_count("s1"), 2);
    assert_eq!(streamer.total_subscribers(), 2);

    let a = tokio::time::timeout(WAIT, first.recv()).await.expect("frame").expect("open");
    let b = tokio::time::timeout(WAIT, second.recv()).await.expect("frame").expect("open");
    assert_eq!(a.session_id, "s1");
    assert_eq!(a.sequence, 1);
    assert_eq!(b.sequence, 1);

    let sink = first.sink_id();
    drop(first);
    assert!(!streamer.unsubscribe("s1", sink));
    assert_eq!(streamer.subscriber_count("s1"), 1);
    assert!(streamer.is_producing("s1"));

    drop(second);
    assert!(!streamer.is_producing("s1"));
    assert_eq!(streamer.total_subscribers(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = browser.captures();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(browser.captures(), settled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_nth_capture_becomes_a_frame() {
    let streamer = streamer(10, 30, 4);
    let (_browser, source) = source();

    let mut viewer = streamer.subscribe("s1", source);
    let first = tokio::time::timeout(WAIT, viewer.recv()).await.expect("frame").expect("open");
    let second = tokio::time::timeout(WAIT, viewer.recv()).await.expect("frame").expect("open");

    assert_eq!(first.data.as_ref(), b"frame-3");
    assert_eq!(first.sequence, 1);
    assert_eq!(second.data.as_ref(), b"frame-6");
    assert_eq!(second.sequence, 2);
    assert_eq!(first.url, "https://example.com/live");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_queue_drops_frames_and_keeps_one_outstanding() {
    let streamer = streamer(50, 100, 1);
    let (browser, source) = source();

    let mut viewer = streamer.subscribe("s1", source);
    tokio::time::sleep(Duration::from_millis(250)).await;

    let oldest = viewer.try_recv().expect("queued frame");
    assert_eq!(oldest.sequence, 1);

    let next = tokio::time::timeout(WAIT, viewer.recv()).await.expect("frame").expect("open");
    assert!(next.sequence > 2, "frames were dropped while the queue was full");

    assert!(browser.captures() > 4);
    assert!(browser.max_outstanding.load(Ordering::SeqCst) <= 1);
    assert!(browser.acks.load(Ordering::SeqCst) + 1 >= browser.captures());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_viewer_does_not_hold_back_others() {
    let streamer = streamer(50, 100, 1);
    let (_browser, source) = source();

    let _stalled = streamer.subscribe("s1", Arc::clone(&source));
    let mut live = streamer.subscribe("s1", source);

    let mut last = 0;
    for _ in 0..10 {
        let frame = tokio::time::timeout(WAIT, live.recv()).await.expect("frame").expect("open");
        assert!(frame.sequence > last);
        last = frame.sequence;
    }
    assert_eq!(streamer.subscriber_count("s1"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lost_capture_source_ends_stream_only() {
    let h = harness(test_config());
    let streamer = FrameStreamer::new(&h.config.stream, Handle::current());

    h.manager.create_session(request("s-cap")).expect("created");
    let mut resources = h.manager.resource_watch("s-cap").expect("registered");
    let resource = tokio::time::timeout(WAIT, resources.wait_for(Option::is_some))
        .await
        .expect("published")
        .expect("watch open")
        .clone()
        .expect("resource");

    let mut viewer = streamer.subscribe("s-cap", resource);
    tokio::time::timeout(WAIT, viewer.recv()).await.expect("frame").expect("open");

    h.browser.capture_broken.store(true, Ordering::SeqCst);
    let ended = tokio::time::timeout(WAIT, async {
        while viewer.recv().await.is_some() {}
    })
    .await;
    assert!(ended.is_ok(), "stream ends once capture fails");
    assert!(!streamer.is_producing("s-cap"));

    // The session itself is unaffected.
    assert!(h.manager.get("s-cap").is_ok());
    let result = h.finish("s-cap").await;
    assert_eq!(result.outcome, RunOutcome::Stopped);
}
