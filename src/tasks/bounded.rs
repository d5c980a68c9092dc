//! Bounded-concurrency executor

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::BulkError;

/// Map every item through `f`, keeping at most `max_concurrent` futures in flight.
///
/// Results come back in completion order. The first failure aborts the run;
/// futures still in flight are dropped with it.
pub async fn run_bounded<I, F, Fut, T, E>(
    items: I,
    max_concurrent: usize,
    f: F,
) -> Result<Vec<T>, BulkError<E>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let completed = drive(items, max_concurrent, f).await?;
    Ok(completed.into_iter().map(|(_, value)| value).collect())
}

/// Like [`run_bounded`], but results follow input order
pub async fn run_bounded_ordered<I, F, Fut, T, E>(
    items: I,
    max_concurrent: usize,
    f: F,
) -> Result<Vec<T>, BulkError<E>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut completed = drive(items, max_concurrent, f).await?;
    completed.sort_unstable_by_key(|(index, _)| *index);
    Ok(completed.into_iter().map(|(_, value)| value).collect())
}

/// Returns `(input index, value)` pairs in completion order
async fn drive<I, F, Fut, T, E>(
    items: I,
    max_concurrent: usize,
    mut f: F,
) -> Result<Vec<(usize, T)>, BulkError<E>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if max_concurrent == 0 {
        return Err(BulkError::ZeroLimit("max_concurrent"));
    }

    let items = items.into_iter();
    let mut completed = Vec::with_capacity(items.size_hint().0);
    let mut in_flight = FuturesUnordered::new();

    for (index, item) in items.enumerate() {
        let fut = f(item);
        in_flight.push(async move { (index, fut.await) });

        // Admit the next item only once a slot frees up
        while in_flight.len() >= max_concurrent {
            match in_flight.next().await {
                Some((index, result)) => completed.push((index, settle(index, result)?)),
                None => break,
            }
        }
    }

    while let Some((index, result)) = in_flight.next().await {
        completed.push((index, settle(index, result)?));
    }

    Ok(completed)
}

fn settle<T, E>(index: usize, result: Result<T, E>) -> Result<T, BulkError<E>> {
    result.map_err(|source| {
        tracing::warn!(index = index, "Bounded execution aborted by failing item");
        BulkError::ExecutorAbort { index, source }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded(0..10u64, 3, |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 * (i % 4 + 1))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(i * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        let mut sorted = results.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_order_vs_input_order() {
        let delays = vec![30u64, 10, 20];

        let unordered = run_bounded(delays.clone(), 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(ms)
        })
        .await
        .unwrap();
        assert_eq!(unordered, vec![10, 20, 30]);

        let ordered = run_bounded_ordered(delays, 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(ms)
        })
        .await
        .unwrap();
        assert_eq!(ordered, vec![30, 10, 20]);
    }

    #[test]
    fn test_admits_next_item_as_soon_as_a_slot_frees() {
        let started = Arc::new(AtomicUsize::new(0));
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..4).map(|_| oneshot::channel::<u32>()).unzip();

        let counter = started.clone();
        let mut run = task::spawn(run_bounded(receivers, 2, move |rx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                rx.await.map_err(|e| e.to_string())
            }
        }));

        assert_pending!(run.poll());
        assert_eq!(started.load(Ordering::SeqCst), 2);

        let mut senders = senders.into_iter();
        senders.next().unwrap().send(10).unwrap();
        assert!(run.is_woken());
        assert_pending!(run.poll());
        assert_eq!(started.load(Ordering::SeqCst), 3);

        for tx in senders {
            tx.send(1).unwrap();
        }
        let results = assert_ready_ok!(run.poll());
        assert_eq!(results.len(), 4);
        assert_eq!(results[0], 10);
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let started = Arc::new(AtomicUsize::new(0));

        let err = run_bounded(0..100usize, 2, |i| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                if i == 3 {
                    Err(format!("item {i} rejected"))
                } else {
                    Ok(i)
                }
            }
        })
        .await
        .unwrap_err();

        match err {
            BulkError::ExecutorAbort { index, source } => {
                assert_eq!(index, 3);
                assert_eq!(source, "item 3 rejected");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.load(Ordering::SeqCst) < 100);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let err = run_bounded(vec![1], 0, |i| async move { Ok::<_, String>(i) })
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::ZeroLimit("max_concurrent")));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results = run_bounded(Vec::<u32>::new(), 4, |i| async move { Ok::<_, String>(i) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
