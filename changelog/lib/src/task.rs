//! Overall deadlines for top-level operations.

use std::future::Future;

use tokio::time::Instant;

use crate::error::ChangelogError;

/// Runs `operation`, failing with an internal error once `deadline` passes.
///
/// Expiry drops `operation`, and with it every `JoinSet` it owns, so fanned-out
/// requests are aborted too.
pub(crate) async fn with_deadline<T>(
    deadline: Option<Instant>,
    name: &str,
    operation: impl Future<Output = Result<T, ChangelogError>>,
) -> Result<T, ChangelogError> {
    match deadline {
        None => operation.await,
        Some(deadline) => tokio::time::timeout_at(deadline, operation)
            .await
            .unwrap_or_else(|_| Err(ChangelogError::internal(format!("{name} exceeded its deadline")))),
    }
}
