//! Cross-component integration tests
//!
//! These tests combine the rate limiters, the bulk executors and the channel
//! manager the way a caller fanning out work over a channel would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use realtime_flow_core::clock::ManualClock;
use realtime_flow_core::config::{ChannelConfig, RateLimitSettings, Settings};
use realtime_flow_core::connection_manager::ChannelManager;
use realtime_flow_core::error::BulkError;
use realtime_flow_core::ratelimit::{RateLimiters, WindowConfig};
use realtime_flow_core::tasks::{run_bounded, run_bounded_ordered, BatchProcessor};
use realtime_flow_core::timing::{throttle, Throttle};
use realtime_flow_core::websocket::{Frame, MemoryTransport};

struct TestEnvironment {
    manager: ChannelManager,
    transport: MemoryTransport,
    limiters: Arc<RateLimiters>,
    clock: Arc<ManualClock>,
}

/// Create a test environment with one open channel
async fn create_test_environment() -> TestEnvironment {
    let transport = MemoryTransport::new();
    let manager = ChannelManager::new(ChannelConfig::default(), Arc::new(transport.clone()));
    manager.connect("orders", "mem://orders").await.unwrap();

    let clock = Arc::new(ManualClock::new());
    let limiters = Arc::new(RateLimiters::with_clock(
        &RateLimitSettings::default(),
        clock.clone(),
    ));

    TestEnvironment {
        manager,
        transport,
        limiters,
        clock,
    }
}

// =============================================================================
// Rate Limiter + Executor Tests
// =============================================================================

mod limiter_tests {
    use super::*;

    #[tokio::test]
    async fn test_sensitive_sends_are_gated() {
        let env = create_test_environment().await;
        let mut peer = env.transport.take_peer("mem://orders").unwrap();

        let outcomes = run_bounded_ordered(0..8u32, 4, |i| {
            let limiters = env.limiters.clone();
            let manager = env.manager.clone();
            async move {
                if !limiters.sensitive.allow_request("cancel-order") {
                    return Ok::<_, String>(false);
                }
                Ok(manager.send_frame("orders", "cancel", json!({ "id": i })))
            }
        })
        .await
        .unwrap();

        assert_eq!(outcomes.iter().filter(|sent| **sent).count(), 5);
        for _ in 0..5 {
            let frame = Frame::parse(&peer.recv_sent().await.unwrap()).unwrap();
            assert_eq!(frame.message_type, "cancel");
        }
        assert!(peer.try_recv_sent().is_none());

        // The general limiter kept its own budget
        assert_eq!(env.limiters.general.remaining_requests("cancel-order"), 20);

        env.clock.advance(Duration::from_millis(1000));
        assert!(env.limiters.sensitive.allow_request("cancel-order"));
    }

    #[tokio::test]
    async fn test_limiter_shared_across_tasks() {
        let env = create_test_environment().await;
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiters = env.limiters.clone();
                let admitted = admitted.clone();
                tokio::spawn(async move {
                    if limiters.general.allow_request("shared") {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 20);
        assert_eq!(env.limiters.general.stats().tracked_requests, 20);
    }

    #[tokio::test]
    async fn test_settings_build_independent_limiters() {
        let settings = Settings::default();
        assert_eq!(settings.rate_limit.general, WindowConfig::new(20, 1000));

        let limiters = RateLimiters::from_settings(&settings.rate_limit);
        for _ in 0..5 {
            assert!(limiters.sensitive.allow_request("k"));
        }
        assert!(!limiters.sensitive.allow_request("k"));
        assert!(limiters.general.allow_request("k"));
    }
}

// =============================================================================
// Batch Processor Tests
// =============================================================================

mod batch_tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_stream_over_channel_in_order() {
        let env = create_test_environment().await;
        let mut peer = env.transport.take_peer("mem://orders").unwrap();
        let processor = BatchProcessor::with_clock(Duration::from_millis(100), env.clock.clone());

        let ids: Vec<u32> = (1..=7).collect();
        let sent = processor
            .run(ids, 3, |chunk| {
                let manager = env.manager.clone();
                async move {
                    let size = chunk.len();
                    let delivered = manager.send_frame("orders", "bulk", json!(chunk));
                    Ok::<_, String>(vec![(size, delivered)])
                }
            })
            .await
            .unwrap();

        assert_eq!(sent, vec![(3, true), (3, true), (1, true)]);
        assert_eq!(
            env.clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(100)]
        );

        let mut payloads = Vec::new();
        for _ in 0..3 {
            payloads.push(Frame::parse(&peer.recv_sent().await.unwrap()).unwrap().payload);
        }
        assert_eq!(payloads, vec![json!([1, 2, 3]), json!([4, 5, 6]), json!([7])]);
    }

    #[tokio::test]
    async fn test_batch_over_bounded_fanout() {
        let clock = Arc::new(ManualClock::new());
        let processor = BatchProcessor::with_clock(Duration::from_millis(50), clock.clone());

        let squares = processor
            .run((1..=10u64).collect::<Vec<_>>(), 4, |chunk| async move {
                run_bounded_ordered(chunk, 2, |n| async move { Ok::<_, String>(n * n) })
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .unwrap();

        assert_eq!(squares, (1..=10u64).map(|n| n * n).collect::<Vec<_>>());
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_nested_failure_surfaces_as_batch_abort() {
        let clock = Arc::new(ManualClock::new());
        let processor = BatchProcessor::with_clock(Duration::from_millis(50), clock);

        let err = processor
            .run((0..9u32).collect::<Vec<_>>(), 3, |chunk| async move {
                run_bounded(chunk, 3, |n| async move {
                    if n == 7 {
                        Err(format!("item {n} failed"))
                    } else {
                        Ok(n)
                    }
                })
                .await
            })
            .await
            .unwrap_err();

        match err {
            BulkError::BatchAbort { chunk, source } => {
                assert_eq!(chunk, 2);
                assert!(matches!(source, BulkError::ExecutorAbort { index: 1, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

// =============================================================================
// Temporal Primitive Tests
// =============================================================================

mod timing_tests {
    use super::*;

    #[tokio::test]
    async fn test_throttled_sends() {
        let env = create_test_environment().await;
        let mut peer = env.transport.take_peer("mem://orders").unwrap();
        let sent = Arc::new(Mutex::new(0));

        let manager = env.manager.clone();
        let counter = sent.clone();
        let refresh: Throttle<u32> = Throttle::with_clock(
            move |n: u32| {
                if manager.send_frame("orders", "refresh", json!(n)) {
                    *counter.lock().unwrap() += 1;
                }
            },
            Duration::from_millis(250),
            env.clock.clone(),
        );

        for n in 0..10 {
            refresh.call(n);
            env.clock.advance(Duration::from_millis(100));
        }

        // Runs at 0ms, 300ms, 600ms and 900ms
        assert_eq!(*sent.lock().unwrap(), 4);
        let first = Frame::parse(&peer.recv_sent().await.unwrap()).unwrap();
        assert_eq!(first.payload, json!(0));
    }

    #[test]
    fn test_throttle_helper_runs_first_call() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let throttled = throttle(
            move |_: ()| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_secs(60),
        );

        assert!(throttled.call(()));
        assert!(!throttled.call(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
