use std::{future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::time::{Instant, timeout};

/// Wraps `tokio::time::timeout`, converting elapsed deadlines and inner errors into contextual
/// `anyhow::Error` values for consistent diagnostics.
pub async fn timeout_with_context<F, T, E>(
    duration: Duration,
    future: F,
    context: impl Into<String>,
) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let context = context.into();
    timeout(duration, future)
        .await
        .map_err(|_| anyhow!("timed out {context}"))?
        .with_context(|| format!("failed while {context}"))
}

/// Time left until `deadline`, or a "timed out" error once it has passed.
pub fn remaining_deadline(deadline: Instant, context: &str) -> Result<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
        .ok_or_else(|| anyhow!("timed out {context}"))
}

/// True when the error chain came from an elapsed deadline rather than an I/O failure.
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.to_string().starts_with("timed out")
}
