//! Controller glue: deadlines, requeue actions and error policy.

pub mod nodekeeper;
pub mod notification;

use std::future::Future;
use std::time::Duration;

use kube::runtime::controller::Action;

use crate::error::MuoError;

const TRANSIENT_RETRY: Duration = Duration::from_secs(10);
const PERMANENT_RETRY: Duration = Duration::from_secs(60);

/// Bound a reconciliation by `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, MuoError>
where
    F: Future<Output = Result<T, MuoError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| MuoError::DeadlineExceeded(deadline.as_secs()))?
}

/// Convert a requeue delay into a controller action.
pub fn requeue_action(requeue: Option<Duration>) -> Action {
    match requeue {
        Some(d) => Action::requeue(d),
        None => Action::await_change(),
    }
}

/// Retry delay for a failed reconciliation.
pub const fn retry_after(err: &MuoError) -> Duration {
    if err.is_transient() {
        TRANSIENT_RETRY
    } else {
        PERMANENT_RETRY
    }
}

/// Metrics label for a reconcile outcome.
pub fn result_label<T>(result: &Result<T, MuoError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(MuoError::DeadlineExceeded(_)) => "timeout",
        Err(_) => "error",
    }
}
