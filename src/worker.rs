//! Bounded joins for the long-lived worker tasks

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::warn;

use crate::error::{Result, TelemetryError};

/// Await a worker task for at most `deadline`
///
/// A worker that misses the deadline is aborted, which drops everything it
/// owns.
pub(crate) async fn join_worker<T>(name: &str, mut handle: JoinHandle<T>, deadline: Duration) -> Result<T> {
    match timeout(deadline, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TelemetryError::Worker(format!("{}: {}", name, e))),
        Err(_) => {
            handle.abort();
            warn!(worker = name, ?deadline, "Worker missed join deadline, aborted");
            Err(TelemetryError::ShutdownTimeout(name.to_string()))
        }
    }
}
