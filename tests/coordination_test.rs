//! Cross-worker coordination tests.
//!
//! The crawler must stay idle while either the transcode scheduler or the
//! generation worker holds the yield signal, and resume afterwards without
//! redoing work.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, AsyncGate, FakeGeneration, TestHarness};
use tokio_util::sync::CancellationToken;
use vintagecast::cache::CacheClass;
use vintagecast::transcode::PassKind;

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn crawler_waits_for_transcode_then_resumes() {
    let harness = TestHarness::new();
    harness.add_png("photos/one.png", 320, 200);
    harness.add_png("photos/two.png", 320, 200);

    harness.transcoder.gate(PassKind::Single);
    harness.start_batch(&["clips/a.mp4"]);

    let scheduler = harness.services.scheduler();
    let transcode = std::thread::spawn(move || scheduler.run_until_idle());
    assert!(wait_until(TIMEOUT, || harness.services.signal.is_raised()));

    let crawler = harness.services.crawler();
    let shutdown = CancellationToken::new();
    let crawl = {
        let token = shutdown.clone();
        std::thread::spawn(move || crawler.crawl_pass(&token))
    };

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(harness.services.cache.len(CacheClass::Thumbnails), 0);

    harness.transcoder.release();
    assert_eq!(transcode.join().unwrap(), 1);

    let stats = crawl.join().unwrap();
    assert!(!stats.interrupted);
    // The clip fails without ffmpeg; both stills get both thumbnail classes.
    assert_eq!(stats.created, 4);
    assert_eq!(stats.failed, 1);
    assert_eq!(harness.services.cache.len(CacheClass::Thumbnails), 2);
    assert_eq!(harness.services.cache.len(CacheClass::ImageryThumbs), 2);

    let again = harness.services.crawler().crawl_pass(&shutdown);
    assert_eq!(again.created, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crawler_waits_for_generation_then_resumes() {
    let harness = TestHarness::new();
    harness.add_png("a.png", 300, 300);
    harness.add_png("b.png", 300, 300);

    let gate = AsyncGate::closed();
    let service = Arc::new(FakeGeneration::new(1).gated(gate.clone()));
    let worker = harness.services.generation_worker(service);
    let id = harness.services.generation.create();
    harness.services.generation.enqueue(id).unwrap();

    let shutdown = CancellationToken::new();
    let generation = {
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    };
    while !harness.services.signal.is_raised() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let crawler = harness.services.crawler();
    let crawl = {
        let token = shutdown.clone();
        tokio::task::spawn_blocking(move || crawler.crawl_pass(&token))
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(harness.services.cache.len(CacheClass::Thumbnails), 0);

    gate.open();
    let stats = crawl.await.unwrap();
    assert!(!stats.interrupted);
    assert!(stats.visited >= 2);
    assert_eq!(stats.failed, 0);

    let a = harness.media_root().join("a.png");
    let b = harness.media_root().join("b.png");
    for path in [&a, &b] {
        assert!(harness
            .services
            .cache
            .lookup(CacheClass::Thumbnails, &path.to_string_lossy())
            .is_some());
    }

    let again = harness.services.crawler().crawl_pass(&shutdown);
    assert_eq!(again.created, 0);

    shutdown.cancel();
    generation.await.unwrap();
    assert!(!harness.services.signal.is_raised());
}

#[test]
fn shutdown_releases_a_blocked_crawler() {
    let harness = TestHarness::new();
    harness.add_png("a.png", 64, 64);
    let _guard = harness.services.signal.raise();

    let crawler = harness.services.crawler();
    let shutdown = CancellationToken::new();
    let crawl = {
        let token = shutdown.clone();
        std::thread::spawn(move || crawler.crawl_pass(&token))
    };

    std::thread::sleep(Duration::from_millis(50));
    shutdown.cancel();
    let stats = crawl.join().unwrap();
    assert!(stats.interrupted);
    assert_eq!(stats.created, 0);
}
