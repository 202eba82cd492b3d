//! Horizontal scaling by session multiplication.
//!
//! Each partition of the root states gets its own crawler, and with it its
//! own browser session. Partitions share nothing but the output tree (each
//! leaf path belongs to exactly one partition) and the stop signal.

use std::future::Future;
use tracing::{error, info, warn};

use crate::core::error::CrawlError;
use crate::features::sink::ResultSink;
use crate::features::summary::RunSummary;
use crate::scraping::session::SessionDriver;
use crate::tools::crawl::{select_states, Crawler};

/// Split `items` round-robin into at most `n` non-empty, disjoint partitions.
pub fn partition<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    let n = n.max(1).min(items.len().max(1));
    let mut parts: Vec<Vec<T>> = vec![Vec::new(); n];
    for (i, item) in items.iter().enumerate() {
        parts[i % n].push(item.clone());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Run `sessions` crawlers side by side over disjoint subsets of the root states.
///
/// `make` builds the crawler for session `i` (launching its browser). The first
/// crawler discovers the states from the portal; `filter` (values or labels)
/// is resolved against them before partitioning, so each state is crawled by
/// exactly one session however it was named. A later session that fails to
/// start is dropped and the states are spread over the sessions that did. The
/// leaf cap in each crawler's options applies per session.
pub async fn run_partitioned<S, K, F, Fut>(
    filter: Option<Vec<String>>,
    sessions: usize,
    mut make: F,
) -> Result<RunSummary, CrawlError>
where
    S: SessionDriver + 'static,
    K: ResultSink + 'static,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Crawler<S, K>, CrawlError>>,
{
    let mut first = make(0).await?;
    let discovered = match first.root_states().await {
        Ok(states) => states,
        Err(e) => {
            first.into_session().close().await;
            return Err(e);
        }
    };
    let nodes = match filter.as_deref() {
        Some(f) => select_states(discovered, f),
        None => discovered,
    };
    let mut states: Vec<String> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if !states.contains(&node.value) {
            states.push(node.value);
        }
    }

    if states.is_empty() {
        warn!("no states to crawl");
        first.into_session().close().await;
        return Ok(RunSummary::start());
    }

    let wanted = sessions.max(1).min(states.len());
    let mut crawlers = vec![first];
    for i in 1..wanted {
        match make(i).await {
            Ok(c) => crawlers.push(c),
            Err(e) => error!("session {} failed to start, continuing without it: {}", i, e),
        }
    }

    let parts = partition(&states, crawlers.len());
    info!(
        "crawling {} state(s) across {} session(s)",
        states.len(),
        parts.len()
    );

    let mut handles = Vec::with_capacity(parts.len());
    for (i, (mut crawler, part)) in crawlers.into_iter().zip(parts).enumerate() {
        handles.push(tokio::spawn(async move {
            info!("session {}: states {:?}", i, part);
            let outcome = crawler.run(Some(&part)).await;
            crawler.into_session().close().await;
            outcome
        }));
    }

    let mut merged: Option<RunSummary> = None;
    let mut first_err: Option<CrawlError> = None;
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(summary)) => match merged.as_mut() {
                Some(m) => m.merge(&summary),
                None => merged = Some(summary),
            },
            Ok(Err(e)) => {
                error!("session {} aborted: {}", i, e);
                first_err.get_or_insert(e);
            }
            Err(e) => {
                error!("session {} task failed: {}", i, e);
                first_err.get_or_insert(CrawlError::Startup(format!(
                    "session {} panicked: {}",
                    i, e
                )));
            }
        }
    }

    match (merged, first_err) {
        (Some(summary), _) => Ok(summary),
        (None, Some(e)) => Err(e),
        (None, None) => Ok(RunSummary::start()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let items: Vec<u32> = (1..=7).collect();
        let parts = partition(&items, 3);
        assert_eq!(parts, vec![vec![1, 4, 7], vec![2, 5], vec![3, 6]]);
        let mut all: Vec<u32> = parts.concat();
        all.sort();
        assert_eq!(all, items);
    }

    #[test]
    fn test_partition_never_yields_empty_parts() {
        let parts = partition(&["a", "b"], 5);
        assert_eq!(parts.len(), 2);
        assert!(partition::<u8>(&[], 4).is_empty());
        assert_eq!(partition(&[1, 2, 3], 0), vec![vec![1, 2, 3]]);
    }
}
