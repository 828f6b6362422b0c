//! Concurrency tests: load coalescing, identical failure delivery, and
//! disposal racing in-flight work.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use embed_manager::EmbeddingError;
use futures::future::join_all;
use tokio::time::sleep;

use common::{manager_with, MockBackend, TestEnv};

const CALLERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_load() {
    let env = TestEnv::new();
    let backend = MockBackend::new(8).with_load_delay(Duration::from_millis(200));
    let (manager, probe) = manager_with(env.config("m.gguf", 8), backend);
    let manager = Arc::new(manager);

    let calls = (0..CALLERS).map(|i| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.generate_embedding(&format!("text {}", i)).await })
    });
    let results = join_all(calls).await;

    for result in results {
        let vector = result.unwrap().unwrap();
        assert_eq!(vector.len(), 8);
    }
    assert_eq!(probe.loads(), 1);
    assert_eq!(probe.contexts(), 1);
    assert_eq!(probe.embed_calls.load(Ordering::SeqCst), CALLERS);
    assert_eq!(probe.overlap_violations.load(Ordering::SeqCst), 0);
    assert_eq!(manager.stats().load_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failure() {
    let env = TestEnv::new();
    let backend = MockBackend::new(8).with_load_delay(Duration::from_millis(200));
    let (manager, probe) = manager_with(env.config("m.gguf", 8), backend);
    probe.fail_load.store(true, Ordering::SeqCst);
    let manager = Arc::new(manager);

    let calls = (0..CALLERS).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.generate_embedding("text").await })
    });
    let errors: Vec<EmbeddingError> = join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap_err())
        .collect();

    assert!(matches!(errors[0], EmbeddingError::LoadFailed { .. }));
    assert!(errors.iter().all(|e| *e == errors[0]));
    assert_eq!(probe.loads(), 1);
    assert!(!manager.stats().is_loaded);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_completes_when_caller_abandons() {
    let env = TestEnv::new();
    let backend = MockBackend::new(4).with_load_delay(Duration::from_millis(150));
    let (manager, probe) = manager_with(env.config("m.gguf", 4), backend);
    let manager = Arc::new(manager);

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.generate_embedding("text").await })
    };
    sleep(Duration::from_millis(30)).await;
    caller.abort();

    sleep(Duration::from_millis(400)).await;
    assert!(manager.stats().is_loaded);
    assert_eq!(probe.loads(), 1);

    // The finished load is reused
    manager.generate_embedding("text").await.unwrap();
    assert_eq!(probe.loads(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispose_during_load_releases_late_handles() {
    let env = TestEnv::new();
    let backend = MockBackend::new(4).with_load_delay(Duration::from_millis(300));
    let (manager, probe) = manager_with(env.config("m.gguf", 4), backend);
    let manager = Arc::new(manager);

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.generate_embedding("text").await })
    };
    sleep(Duration::from_millis(50)).await;
    manager.dispose().await;

    // The in-flight load finished and released both handles before dispose returned
    assert_eq!(probe.loads(), 1);
    assert_eq!(probe.contexts(), 1);
    assert_eq!(probe.context_releases(), 1);
    assert_eq!(probe.model_releases(), 1);
    assert_eq!(
        probe.events(),
        vec!["load_model", "create_context", "release_context", "release_model"]
    );

    let stats = manager.stats();
    assert!(!stats.is_loaded);
    assert!(stats.disposed);
    assert_eq!(stats.load_count, 0);

    let result = caller.await.unwrap();
    assert_eq!(result, Err(EmbeddingError::Disposed));

    assert_eq!(
        manager.generate_embedding("after").await,
        Err(EmbeddingError::Disposed)
    );
    assert_eq!(probe.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispose_calls_all_wait_for_release() {
    let env = TestEnv::new();
    let backend = MockBackend::new(4).with_load_delay(Duration::from_millis(200));
    let (manager, probe) = manager_with(env.config("m.gguf", 4), backend);
    let manager = Arc::new(manager);

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.generate_embedding("text").await })
    };
    sleep(Duration::from_millis(50)).await;

    let disposers = (0..4).map(|_| {
        let manager = Arc::clone(&manager);
        let probe = Arc::clone(&probe);
        tokio::spawn(async move {
            manager.dispose().await;
            (probe.context_releases(), probe.model_releases())
        })
    });
    for released in join_all(disposers).await {
        assert_eq!(released.unwrap(), (1, 1));
    }

    assert_eq!(caller.await.unwrap(), Err(EmbeddingError::Disposed));
    assert_eq!(probe.loads(), 1);
}

#[test]
fn test_lost_load_task_resets_to_unloaded() {
    let env = TestEnv::new();
    let backend = MockBackend::new(4).with_load_delay(Duration::from_millis(200));
    let (manager, probe) = manager_with(env.config("m.gguf", 4), backend);
    let manager = Arc::new(manager);

    // Start a load on a runtime that is shut down underneath it
    let first = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    {
        let manager = Arc::clone(&manager);
        first.spawn(async move { manager.generate_embedding("text").await });
    }
    std::thread::sleep(Duration::from_millis(50));
    first.shutdown_timeout(Duration::from_millis(10));

    let second = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    second.block_on(async {
        let err = manager.generate_embedding("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::LoadFailed { .. }));
        assert!(!manager.stats().is_loaded);

        // The next call starts a fresh load instead of rejoining the lost one
        let vector = manager.generate_embedding("text").await.unwrap();
        assert_eq!(vector.len(), 4);
        assert!(manager.stats().is_loaded);
        manager.dispose().await;
    });
    assert_eq!(probe.loads(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispose_waits_for_in_flight_embedding() {
    let env = TestEnv::new();
    let backend = MockBackend::new(4).with_embed_delay(Duration::from_millis(200));
    let (manager, probe) = manager_with(env.config("m.gguf", 4), backend);
    let manager = Arc::new(manager);

    manager.preload().await.unwrap();

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.generate_embedding("text").await })
    };
    sleep(Duration::from_millis(50)).await;
    manager.dispose().await;

    // The in-flight call finished before the handles were released
    assert!(caller.await.unwrap().is_ok());
    assert_eq!(probe.overlap_violations.load(Ordering::SeqCst), 0);
    assert_eq!(probe.context_releases(), 1);
    assert_eq!(probe.model_releases(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_use_with_idle_eviction_never_overlaps() {
    let env = TestEnv::new();
    let config = env
        .config("m.gguf", 4)
        .with_idle_timeout(Duration::from_millis(20))
        .with_idle_check_interval(Duration::from_millis(5));
    let backend = MockBackend::new(4).with_embed_delay(Duration::from_millis(5));
    let (manager, probe) = manager_with(config, backend);
    let manager = Arc::new(manager);

    let workers = (0..4).map(|w| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            for i in 0..10 {
                manager
                    .generate_embedding(&format!("{}-{}", w, i))
                    .await
                    .unwrap();
                sleep(Duration::from_millis(((w * 7 + i * 3) % 40) as u64)).await;
            }
        })
    });
    for result in join_all(workers).await {
        result.unwrap();
    }

    manager.dispose().await;
    assert_eq!(probe.overlap_violations.load(Ordering::SeqCst), 0);
    // Every model loaded was released exactly once
    assert_eq!(probe.model_releases(), probe.loads());
    assert_eq!(probe.context_releases(), probe.contexts());
}
