//! Chunked batch processor with inter-chunk pacing

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{system_clock, Clock};
use crate::config::BatchConfig;
use crate::error::BulkError;

/// Runs large inputs through a batch function in fixed-size chunks.
///
/// The first chunk goes out immediately, every later one after `delay`.
#[derive(Clone)]
pub struct BatchProcessor {
    delay: Duration,
    clock: Arc<dyn Clock>,
}

impl BatchProcessor {
    pub fn new(delay: Duration) -> Self {
        Self::with_clock(delay, system_clock())
    }

    pub fn with_clock(delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { delay, clock }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.inter_batch_delay())
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Process `items` in chunks of `chunk_size`, concatenating results in chunk order.
    ///
    /// A failing chunk aborts the run and the results of earlier chunks are
    /// discarded.
    pub async fn run<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        mut process: F,
    ) -> Result<Vec<R>, BulkError<E>>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, E>>,
    {
        if chunk_size == 0 {
            return Err(BulkError::ZeroLimit("chunk_size"));
        }

        let total_chunks = items.len().div_ceil(chunk_size);
        let mut results = Vec::with_capacity(items.len());
        let mut items = items.into_iter();

        for chunk in 0..total_chunks {
            if chunk > 0 {
                self.clock.sleep(self.delay).await;
            }

            let batch: Vec<T> = items.by_ref().take(chunk_size).collect();
            tracing::trace!(chunk = chunk, total_chunks = total_chunks, size = batch.len(), "Processing batch");

            match process(batch).await {
                Ok(mut processed) => results.append(&mut processed),
                Err(source) => {
                    tracing::warn!(chunk = chunk, total_chunks = total_chunks, "Batch processing aborted");
                    return Err(BulkError::BatchAbort { chunk, source });
                }
            }
        }

        Ok(results)
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

/// [`BatchProcessor::run`] with the default inter-chunk delay
pub async fn run_batched<T, R, E, F, Fut>(
    items: Vec<T>,
    chunk_size: usize,
    process: F,
) -> Result<Vec<R>, BulkError<E>>
where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<R>, E>>,
{
    BatchProcessor::default().run(items, chunk_size, process).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn processor() -> (BatchProcessor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            BatchProcessor::with_clock(Duration::from_millis(100), clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_chunks_in_order_with_pacing() {
        let (processor, clock) = processor();
        let mut calls = Vec::new();

        let results = processor
            .run((1..=5).collect(), 2, |chunk: Vec<i32>| {
                calls.push(chunk.clone());
                async move { Ok::<_, String>(chunk.into_iter().map(|n| n * 10).collect::<Vec<i32>>()) }
            })
            .await
            .unwrap();

        assert_eq!(results, vec![10, 20, 30, 40, 50]);
        assert_eq!(calls, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(100)]
        );
    }

    #[tokio::test]
    async fn test_single_chunk_runs_without_delay() {
        let (processor, clock) = processor();

        let results = processor
            .run(vec!["a", "b"], 10, |chunk| async move { Ok::<_, String>(chunk) })
            .await
            .unwrap();

        assert_eq!(results, vec!["a", "b"]);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_chunks() {
        let (processor, _clock) = processor();
        let mut calls = 0;

        let err = processor
            .run((0..6).collect::<Vec<u32>>(), 2, |chunk| {
                calls += 1;
                async move {
                    if chunk.contains(&2) {
                        Err("downstream rejected".to_string())
                    } else {
                        Ok(chunk)
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BulkError::BatchAbort { chunk: 1, .. }));
        assert_eq!(err.into_source().as_deref(), Some("downstream rejected"));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_empty_input_and_zero_chunk() {
        let (processor, _clock) = processor();

        let empty = processor
            .run(Vec::<u8>::new(), 3, |chunk| async move { Ok::<_, String>(chunk) })
            .await
            .unwrap();
        assert!(empty.is_empty());

        let err = processor
            .run(vec![1u8], 0, |chunk| async move { Ok::<_, String>(chunk) })
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::ZeroLimit("chunk_size")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_processor_paces_with_tokio_time() {
        let start = tokio::time::Instant::now();
        let results = run_batched((0..3).collect::<Vec<u8>>(), 1, |chunk| async move {
            Ok::<_, String>(chunk)
        })
        .await
        .unwrap();

        assert_eq!(results, vec![0, 1, 2]);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
