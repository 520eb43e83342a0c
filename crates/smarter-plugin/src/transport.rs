//! Unix socket gRPC dialing

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout_at, Instant};
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::trace;

/// Pause between connection attempts while waiting for a socket
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Failure to reach a Unix socket before the deadline
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// Nothing answered before the deadline
    #[error("no connection to {} within {timeout:?}", path.display())]
    Timeout {
        /// Socket path
        path: PathBuf,
        /// Deadline that expired
        timeout: Duration,
    },

    /// The deadline expired and the last attempt failed with this error
    #[error("no connection to {} within {timeout:?}: {source}", path.display())]
    Unreachable {
        /// Socket path
        path: PathBuf,
        /// Deadline that expired
        timeout: Duration,
        /// Error from the last attempt
        #[source]
        source: tonic::transport::Error,
    },
}

/// Connect a gRPC channel to the Unix socket at `path`
///
/// Attempts are repeated until one succeeds or `timeout` elapses, so a socket
/// that is still being created or a server that is still starting is waited
/// for instead of failing immediately.
pub async fn dial(path: &Path, timeout: Duration) -> Result<Channel, DialError> {
    dial_until(path, Instant::now() + timeout).await
}

/// Like [`dial`], but bounded by an absolute `deadline`
///
/// Lets a caller spend one budget across connecting and the calls that
/// follow.
pub async fn dial_until(path: &Path, deadline: Instant) -> Result<Channel, DialError> {
    let timeout = deadline.saturating_duration_since(Instant::now());
    let mut last_error = None;

    // The authority is ignored: every connection goes to the socket
    let endpoint = Endpoint::from_static("http://[::]:50051").connect_timeout(timeout);

    loop {
        let socket = path.to_path_buf();
        let attempt = endpoint.connect_with_connector(service_fn(move |_: Uri| {
            UnixStream::connect(socket.clone())
        }));

        match timeout_at(deadline, attempt).await {
            Ok(Ok(channel)) => return Ok(channel),
            Ok(Err(e)) => {
                trace!(socket = %path.display(), error = %e, "Connection attempt failed");
                last_error = Some(e);
            }
            Err(_) => break,
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(RETRY_INTERVAL.min(deadline - now)).await;
    }

    let path = path.to_path_buf();
    Err(match last_error {
        Some(source) => DialError::Unreachable {
            path,
            timeout,
            source,
        },
        None => DialError::Timeout { path, timeout },
    })
}
