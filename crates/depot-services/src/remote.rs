//! Request-level timeouts for calls to the artifact store and the job queue

use std::future::Future;
use std::time::Duration;

use depot_core::{DepotError, DepotResult};

/// Run a remote call under `limit`. An elapsed timer is a transient failure.
pub async fn with_timeout<T, E, F>(limit: Duration, operation: &'static str, call: F) -> DepotResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<DepotError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "Remote call timed out"
            );
            Err(DepotError::TransientIo(format!(
                "{} timed out after {}ms",
                operation,
                limit.as_millis()
            )))
        }
    }
}
