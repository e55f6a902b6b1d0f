//! Deadline timers for the suspending stages of a dial.
//!
//! A fired deadline is reported as an ordinary `io::ErrorKind::TimedOut`
//! failure of the guarded operation, so callers handle it on the same path
//! as a refused connection or a failed lookup.

use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Suspension point a deadline is armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Resolve,
    Connect,
    Handshake,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Resolve => f.write_str("resolve"),
            Stage::Connect => f.write_str("connect"),
            Stage::Handshake => f.write_str("handshake"),
        }
    }
}

/// Run `op` under a one-shot deadline.
///
/// Whichever finishes first wins. When the deadline fires the operation
/// future is dropped, which cancels it.
pub(crate) async fn supervise<F, T>(stage: Stage, limit: Duration, op: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(%stage, ?limit, "deadline fired, cancelling operation");
            Err(timed_out(stage, limit))
        }
    }
}

pub(crate) fn timed_out(stage: Stage, limit: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{stage} timed out after {limit:?}"),
    )
}
