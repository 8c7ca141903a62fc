//! Request/response transports for JSON-RPC documents.
//!
//! A [`Transport`] performs one round trip: it takes a serialized request and
//! returns the serialized response. Two implementations exist:
//!
//! - [`IpcTransport`] talks to a bound local engine over its envelope link.
//! - [`HttpTransport`] posts to an engine on another host.
//!
//! Every low-level failure is reported as `ControlError::TransportIo`.

mod http;
mod ipc;

pub use http::HttpTransport;
pub use ipc::IpcTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ControlError, Result};

/// One JSON-RPC round trip.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: String) -> Result<String>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: String) -> Result<String> {
        (**self).execute(request).await
    }
}

/// Outer deadline on any transport.
///
/// Expiry abandons the inner call and reports `TransportIo` with kind
/// `TimedOut`.
#[derive(Debug, Clone)]
pub struct Timeout<T> {
    inner: T,
    after: Duration,
}

impl<T: Transport> Timeout<T> {
    pub fn new(inner: T, after: Duration) -> Self {
        Self { inner, after }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for Timeout<T> {
    async fn execute(&self, request: String) -> Result<String> {
        tokio::time::timeout(self.after, self.inner.execute(request))
            .await
            .map_err(|_| ControlError::timed_out(self.after))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportFailure;

    struct Sleepy(Duration);

    #[async_trait]
    impl Transport for Sleepy {
        async fn execute(&self, request: String) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok(request)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires() {
        let transport = Timeout::new(Sleepy(Duration::from_secs(30)), Duration::from_secs(5));
        let err = transport.execute("{}".into()).await.unwrap_err();
        assert_eq!(err.transport_failure(), Some(TransportFailure::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_passes_fast_reply() {
        let transport = Timeout::new(Sleepy(Duration::from_millis(10)), Duration::from_secs(5));
        assert_eq!(transport.execute("ok".into()).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_arc_dyn_transport_is_transport() {
        let shared: Arc<dyn Transport> = Arc::new(Sleepy(Duration::ZERO));
        let wrapped = Timeout::new(shared, Duration::from_secs(1));
        assert_eq!(wrapped.execute("x".into()).await.unwrap(), "x");
    }
}
