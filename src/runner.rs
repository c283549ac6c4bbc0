use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use tracing::debug;

use crate::error::PipelineError;

/// Number of workers that actually engage for `len` items.
pub fn effective_workers(limit: usize, len: usize) -> usize {
    limit.min(len)
}

/// Worker limit for a multi-artifact stage: an explicit positive request
/// wins, otherwise one worker per artifact.
pub fn resolve_concurrency(requested: usize, artifact_count: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        artifact_count
    }
}

/// Run `operation` over `items` on at most `limit` concurrent workers.
///
/// Workers race over a shared cursor, each claiming the next unclaimed index
/// until the sequence is exhausted, so every item is processed exactly once
/// in no particular order. Results are placed positionally and always come
/// back in input order.
///
/// A zero `limit` fails before any work starts. The first `Err` returned by
/// `operation` stops the dispatch of unclaimed items; items already in
/// flight run to completion and the error is returned. Callers that want
/// every item attempted should carry failures inside `R`.
pub fn run_bounded<T, R, E, F>(items: &[T], limit: usize, operation: F) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: From<PipelineError> + Send,
    F: Fn(&T, usize) -> Result<R, E> + Sync,
{
    if limit == 0 {
        return Err(PipelineError::InvalidConcurrency { limit }.into());
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let workers = effective_workers(limit, items.len());
    debug!(items = items.len(), limit, workers, "Starting worker pool");

    let cursor = AtomicUsize::new(0);
    let aborted = AtomicBool::new(false);
    let (cursor, aborted, operation) = (&cursor, &aborted, &operation);

    let batches: Vec<Result<Vec<(usize, R)>, E>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| scope.spawn(move || claim_loop(items, cursor, aborted, operation)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    });

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for batch in batches {
        for (index, value) in batch? {
            slots[index] = Some(value);
        }
    }

    // Without an error every index was claimed and completed.
    Ok(slots.into_iter().flatten().collect())
}

fn claim_loop<T, R, E, F>(
    items: &[T],
    cursor: &AtomicUsize,
    aborted: &AtomicBool,
    operation: &F,
) -> Result<Vec<(usize, R)>, E>
where
    F: Fn(&T, usize) -> Result<R, E>,
{
    let mut completed = Vec::new();
    while !aborted.load(Ordering::Acquire) {
        let index = cursor.fetch_add(1, Ordering::AcqRel);
        let Some(item) = items.get(index) else {
            break;
        };
        match operation(item, index) {
            Ok(value) => completed.push((index, value)),
            Err(err) => {
                aborted.store(true, Ordering::Release);
                return Err(err);
            }
        }
    }
    Ok(completed)
}
