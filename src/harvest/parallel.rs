//! Chunked fan-out with a concurrency bound

use crate::{HarvestError, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Splits `items` into chunks of `chunk_size` and runs `op(chunk, index)`
/// over every chunk, with at most `max_concurrent` chunks in flight.
///
/// Returns once every chunk has finished. If any chunk failed, the error of
/// the lowest chunk index is returned. Empty input never calls `op`.
pub async fn process_in_parallel<T, F, Fut>(
    items: Vec<T>,
    chunk_size: usize,
    max_concurrent: usize,
    op: F,
) -> Result<()>
where
    F: Fn(Vec<T>, usize) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if chunk_size == 0 {
        return Err(HarvestError::InvalidArgument(
            "chunk size must be at least 1".to_string(),
        ));
    }
    if max_concurrent == 0 {
        return Err(HarvestError::InvalidArgument(
            "max concurrent chunks must be at least 1".to_string(),
        ));
    }
    if items.is_empty() {
        return Ok(());
    }

    let chunks = split_chunks(items, chunk_size);
    tracing::trace!("Processing {} chunks, {} at a time", chunks.len(), max_concurrent);

    let results: Vec<(usize, Result<()>)> = stream::iter(chunks.into_iter().enumerate())
        .map(|(index, chunk)| {
            let fut = op(chunk, index);
            async move { (index, fut.await) }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    match results
        .into_iter()
        .filter_map(|(index, result)| result.err().map(|e| (index, e)))
        .min_by_key(|(index, _)| *index)
    {
        Some((_, e)) => Err(e),
        None => Ok(()),
    }
}

fn split_chunks<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }
    chunks
}
