use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use login_queue::config::OrderingMode;
use login_queue::{DeduplicatingQueue, QueueError, Task, TaskQueue};
use proptest::prelude::*;
use tokio_test::{assert_pending, assert_ready_ok};
use tokio_util::sync::CancellationToken;

fn keyed(key: &str) -> Task<u32> {
    Task::new("TEST", 0).with_dedup_key(key)
}

/// A1. Duplicates of pending keys are counted and dropped
#[tokio::test]
async fn test_scenario_a_thousand_unique_five_thousand_duplicates() {
    let queue = DeduplicatingQueue::<u32>::new("scenario-a", 10_000);

    for i in 0..1000 {
        assert!(queue.offer(keyed(&format!("user-{}", i))).await.unwrap());
    }
    for round in 0..5 {
        for i in 0..1000 {
            let admitted = queue.offer(keyed(&format!("user-{}", i))).await.unwrap();
            assert!(!admitted, "round {} key {} admitted twice", round, i);
        }
    }

    let stats = queue.stats().await;
    assert_eq!(stats.current_size, 1000);
    assert_eq!(stats.index_size, 1000);
    assert_eq!(stats.offered, 6000);
    assert_eq!(stats.deduplicated, 5000);
    assert_eq!(stats.admitted(), 1000);
}

/// A2. Full queue refuses without blocking, discardable or not
#[tokio::test]
async fn test_capacity_is_never_exceeded() {
    let queue = DeduplicatingQueue::<u32>::new("bounded", 3);
    for key in ["a", "b", "c"] {
        assert!(queue.offer(keyed(key)).await.unwrap());
    }

    let refused = tokio::time::timeout(Duration::from_millis(100), queue.offer(keyed("d")))
        .await
        .expect("offer must not block");
    assert!(!refused.unwrap());
    assert!(!queue.offer(keyed("e").discardable(true)).await.unwrap());

    assert_eq!(queue.size().await, 3);
    assert!(!queue.contains_key("d"));
    assert_eq!(queue.stats().await.rejected, 2);

    // Room frees up once something is dequeued
    queue.poll().await.unwrap().unwrap();
    assert!(queue.offer(keyed("d")).await.unwrap());
}

/// A3. Every dequeue path releases the key
#[tokio::test]
async fn test_dequeue_releases_key() {
    let queue = DeduplicatingQueue::<u32>::new("release", 10);

    queue.offer(keyed("take")).await.unwrap();
    let taken = queue.take().await.unwrap().unwrap();
    assert_eq!(taken.dedup_key(), "take");
    assert!(queue.offer(keyed("take")).await.unwrap());

    queue.offer(keyed("poll")).await.unwrap();
    queue.poll().await.unwrap();
    queue.poll().await.unwrap();
    assert!(queue.offer(keyed("poll")).await.unwrap());

    queue.offer(keyed("timed")).await.unwrap();
    while queue.poll_timeout(Duration::from_millis(10)).await.unwrap().is_some() {}
    assert!(queue.is_empty());
    assert_eq!(queue.stats().await.index_size, 0);
    assert!(queue.offer(keyed("timed")).await.unwrap());
    assert_eq!(queue.stats().await.polled, 3);
}

/// A4. FIFO keeps offer order
#[tokio::test]
async fn test_fifo_order() {
    let queue = DeduplicatingQueue::<u32>::new("fifo", 100);
    for i in 0..20 {
        queue
            .offer(keyed(&i.to_string()).with_priority(20 - i))
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    while let Some(task) = queue.poll().await.unwrap() {
        order.push(task.dedup_key().parse::<i32>().unwrap());
    }
    assert_eq!(order, (0..20).collect::<Vec<_>>());
}

/// A5. Clear empties storage and index
#[tokio::test]
async fn test_clear_is_idempotent() {
    let queue = DeduplicatingQueue::<u32>::new("clear", 10);
    queue.offer(keyed("a")).await.unwrap();
    assert!(!queue.offer(keyed("a")).await.unwrap());

    queue.clear().await.unwrap();
    queue.clear().await.unwrap();
    assert_eq!(queue.size().await, 0);
    assert_eq!(queue.stats().await.current_size, 0);
    assert!(queue.offer(keyed("a")).await.unwrap());
}

/// A6. Empty ids, types and keys are input errors
#[tokio::test]
async fn test_malformed_tasks_are_errors() {
    let queue = DeduplicatingQueue::<u32>::new("input", 10);
    let err = queue.offer(Task::new("", 1u32)).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTask(_)));
    assert!(queue.offer(keyed("")).await.is_err());
    assert_eq!(queue.stats().await.offered, 0);
}

/// B1. Take parks until an offer arrives
#[test]
fn test_take_waits_for_offer() {
    let queue = DeduplicatingQueue::<u32>::new("blocking", 10);
    let mut take = tokio_test::task::spawn(queue.take());
    assert_pending!(take.poll());

    assert!(queue.try_offer(keyed("late")).unwrap());
    assert!(take.is_woken());
    let task = assert_ready_ok!(take.poll()).unwrap();
    assert_eq!(task.dedup_key(), "late");
    assert!(!queue.contains_key("late"));
}

/// B2. Cancelling a waiting take leaves the queue untouched
#[tokio::test]
async fn test_cancelled_take_is_interrupted() {
    let queue = Arc::new(DeduplicatingQueue::<u32>::new("cancel", 10));
    let cancel = CancellationToken::new();

    let waiter = {
        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.take_until(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(QueueError::Interrupted)));

    assert!(queue.offer(keyed("after")).await.unwrap());
    assert_eq!(queue.size().await, 1);
    assert_eq!(queue.index_len(), 1);
}

/// B3. Concurrent offers of one key have exactly one winner
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_offers_single_winner() {
    let queue = Arc::new(DeduplicatingQueue::<u32>::new("race", 100));

    let offers: Vec<_> = (0..32)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer(keyed("contended")).await.unwrap() })
        })
        .collect();

    let mut winners = 0;
    for offer in offers {
        if offer.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(queue.stats().await.deduplicated, 31);
}

/// B4. Clear racing with offers never leaves an index entry without its task
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clear_racing_offers_keeps_index_consistent() {
    let queue = Arc::new(DeduplicatingQueue::<u32>::new("clear-race", 100_000));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..2_000 {
                    queue.try_offer(keyed(&format!("{}-{}", p, i))).unwrap();
                }
            })
        })
        .collect();
    let clearer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                queue.clear_all();
                tokio::task::yield_now().await;
            }
        })
    };
    for producer in producers {
        producer.await.unwrap();
    }
    clearer.await.unwrap();

    let stats = queue.snapshot();
    assert_eq!(stats.index_size, stats.current_size);
    while let Some(task) = queue.try_poll() {
        assert!(!queue.contains_key(task.dedup_key()));
    }
    assert_eq!(queue.index_len(), 0);
}

proptest! {
    /// N offers over K distinct keys leave K entries and N - K duplicates
    #[test]
    fn prop_dedup_counts(keys in prop::collection::vec(0u8..16, 1..200)) {
        let queue = DeduplicatingQueue::<u32>::new("prop", 1000);
        for key in &keys {
            queue.try_offer(keyed(&key.to_string())).unwrap();
        }

        let distinct: HashSet<u8> = keys.iter().copied().collect();
        let stats = queue.snapshot();
        prop_assert_eq!(stats.current_size, distinct.len());
        prop_assert_eq!(stats.index_size, distinct.len());
        prop_assert_eq!(stats.deduplicated as usize, keys.len() - distinct.len());

        let mut seen = HashSet::new();
        while let Some(task) = queue.try_poll() {
            prop_assert!(seen.insert(task.dedup_key().to_string()));
        }
    }

    /// Priority mode dequeues in non-decreasing priority, offer order among equals
    #[test]
    fn prop_priority_order(priorities in prop::collection::vec(-5i32..5, 1..100)) {
        let queue = DeduplicatingQueue::<u32>::new("prop-priority", 1000)
            .with_ordering(OrderingMode::Priority);
        for (i, priority) in priorities.iter().enumerate() {
            queue.try_offer(keyed(&i.to_string()).with_priority(*priority)).unwrap();
        }

        let mut previous: Option<(i32, usize)> = None;
        while let Some(task) = queue.try_poll() {
            let current = (task.priority(), task.dedup_key().parse::<usize>().unwrap());
            if let Some(previous) = previous {
                prop_assert!(previous < current);
            }
            previous = Some(current);
        }
    }
}
