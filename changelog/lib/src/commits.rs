//! Paged commit-range retrieval.

use std::time::Instant;

use crate::commit::GitCommit;
use crate::error::TransportError;
use crate::gitiles::{GitilesClient, LogRequest};

/// Size of the first page requested.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Each following page is this many times larger than the previous one.
pub const PAGE_SIZE_GROWTH: usize = 5;
/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Clamps a proposed page size to what is still wanted.
pub(crate) fn limit_page_size(page_size: usize, remaining: Option<usize>) -> usize {
    match remaining {
        Some(remaining) if remaining < page_size => remaining,
        _ => page_size,
    }
}

/// Lists commits reachable from `committish` that are not reachable from
/// `ancestor`, newest first.
///
/// An empty `ancestor` lists the full history. `query_size` caps the number
/// of commits returned; `None` fetches everything. The returned flag is `true`
/// when more commits exist beyond the cap.
pub async fn fetch_commits(
    client: &GitilesClient,
    repo: &str,
    committish: &str,
    ancestor: &str,
    query_size: Option<usize>,
) -> Result<(Vec<GitCommit>, bool), TransportError> {
    tracing::debug!(repo, committish, ancestor, "fetching commits");
    let started = Instant::now();
    if query_size == Some(0) {
        let head = client
            .log(&LogRequest {
                project: repo,
                committish,
                exclude_ancestors_of: ancestor,
                page_token: None,
                page_size: 1,
            })
            .await?;
        return Ok((Vec::new(), !head.commits.is_empty()));
    }

    let mut remaining = query_size;
    let mut page_size = DEFAULT_PAGE_SIZE;
    let mut page_token: Option<String> = None;
    let mut commits = Vec::new();
    loop {
        let size = limit_page_size(page_size, remaining);
        let page = client
            .log(&LogRequest {
                project: repo,
                committish,
                exclude_ancestors_of: ancestor,
                page_token: page_token.as_deref(),
                page_size: size,
            })
            .await?;
        commits.extend(page.commits);
        page_token = page.next_page_token;
        if let Some(remaining) = remaining.as_mut() {
            *remaining = remaining.saturating_sub(size);
        }
        if page_token.is_none() || remaining == Some(0) {
            break;
        }
        page_size = (page_size * PAGE_SIZE_GROWTH).min(MAX_PAGE_SIZE);
    }

    let mut has_more = page_token.is_some();
    if let Some(limit) = query_size.filter(|&limit| commits.len() > limit) {
        commits.truncate(limit);
        has_more = true;
    }

    tracing::debug!(
        repo,
        count = commits.len(),
        has_more,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "retrieved commits"
    );
    Ok((commits, has_more))
}
