//! Bounded fan-out helper for "process N things with a limit of K".
//!
//! Items are submitted in order, at most `limit` operations run at once, and
//! results accumulate in submission order. `break_on_error` aborts the whole
//! traversal on the first failure (in-flight operations of the current batch
//! are left to finish detached); otherwise each failure is routed to
//! `on_error` and the traversal continues.

use std::future::Future;
use std::time::Duration;

use tracing::error;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum operations in flight at once.
    pub limit: usize,
    /// Optional throttle between batches.
    pub batch_delay: Option<Duration>,
    pub break_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            batch_delay: None,
            break_on_error: false,
        }
    }
}

pub async fn process_batched<T, R, E, F, Fut>(
    items: Vec<T>,
    options: &BatchOptions,
    handler: F,
    mut on_error: impl FnMut(usize, E),
) -> Result<Vec<R>, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let limit = options.limit.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut index = 0usize;

    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        let batch: Vec<T> = iter.by_ref().take(limit).collect();

        let mut handles = Vec::with_capacity(batch.len());
        for item in batch {
            let handler = handler.clone();
            handles.push(tokio::spawn(async move { handler(item).await }));
        }

        for handle in handles {
            let item_index = index;
            index += 1;
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(err)) => {
                    if options.break_on_error {
                        return Err(err);
                    }
                    on_error(item_index, err);
                }
                Err(join_err) => {
                    error!(error = %join_err, "batch worker panicked");
                }
            }
        }

        if let Some(delay) = options.batch_delay {
            if iter.peek().is_some() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

    #[tokio::test]
    async fn results_keep_submission_order() {
        let items: Vec<u32> = (0..25).collect();
        let results = process_batched(
            items,
            &BatchOptions::default(),
            |n| async move { Ok::<_, ()>(n * 2) },
            |_, _| {},
        )
        .await
        .unwrap();

        let expected: Vec<u32> = (0..25).map(|n| n * 2).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_limit() {
        let in_flight = Arc::new(AtomicI32::new(0));
        let peak = Arc::new(AtomicI32::new(0));

        let items: Vec<u32> = (0..40).collect();
        let in_flight_ref = in_flight.clone();
        let peak_ref = peak.clone();

        let _ = process_batched(
            items,
            &BatchOptions {
                limit: 10,
                ..Default::default()
            },
            move |_| {
                let in_flight = in_flight_ref.clone();
                let peak = peak_ref.clone();
                async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }
            },
            |_, _| {},
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 10);
    }

    #[tokio::test]
    async fn failures_route_to_on_error_and_traversal_continues() {
        let items: Vec<u32> = (0..6).collect();
        let mut failed_indexes = Vec::new();

        let results = process_batched(
            items,
            &BatchOptions::default(),
            |n| async move {
                if n % 2 == 0 {
                    Err(format!("item {n} failed"))
                } else {
                    Ok(n)
                }
            },
            |index, _err| failed_indexes.push(index),
        )
        .await
        .unwrap();

        assert_eq!(results, vec![1, 3, 5]);
        assert_eq!(failed_indexes, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn break_on_error_aborts_the_traversal() {
        let processed = Arc::new(AtomicU32::new(0));
        let processed_ref = processed.clone();

        let items: Vec<u32> = (0..30).collect();
        let result = process_batched(
            items,
            &BatchOptions {
                limit: 5,
                break_on_error: true,
                ..Default::default()
            },
            move |n| {
                let processed = processed_ref.clone();
                async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                    if n == 3 { Err("boom") } else { Ok(n) }
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.unwrap_err(), "boom");
        // Only the first batch was submitted before the abort.
        assert!(processed.load(Ordering::SeqCst) <= 5);
    }
}
