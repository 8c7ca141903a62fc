//! Reply-address router for one engine link.
//!
//! Every in-flight call owns a one-shot reply address. The receive task hands
//! each incoming [`Delivery`] to [`ReplyRouter::deliver`], which resolves the
//! matching [`PendingCall`] at most once. Abandoning a call (dropping it or
//! cancelling it) removes its route under the same lock, so a late reply finds
//! nothing and is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::envelope::{Delivery, Envelope, ReplyAddress};
use crate::{ControlError, Result};

enum Route {
    /// Resolves exactly once, then the address is retired.
    Reply(oneshot::Sender<Result<Envelope>>),
    /// Long-lived address, e.g. the notification address of a connection.
    Stream(mpsc::UnboundedSender<Envelope>),
}

#[derive(Default)]
struct Routes {
    table: HashMap<ReplyAddress, Route>,
    closed: bool,
}

/// Pending-call registry keyed by locally minted reply addresses.
pub struct ReplyRouter {
    next_address: AtomicU64,
    routes: Mutex<Routes>,
}

impl ReplyRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_address: AtomicU64::new(1),
            routes: Mutex::new(Routes::default()),
        })
    }

    // A panic while holding the lock leaves the table consistent: every
    // mutation is a single insert or remove.
    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint(&self) -> ReplyAddress {
        ReplyAddress(self.next_address.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a one-shot reply address for a new call.
    pub fn open_call(self: &Arc<Self>) -> Result<PendingCall> {
        let address = self.mint();
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.lock();
            if routes.closed {
                return Err(ControlError::remote_closed());
            }
            routes.table.insert(address, Route::Reply(tx));
        }
        Ok(PendingCall {
            address,
            rx,
            router: Arc::clone(self),
        })
    }

    /// Register a long-lived address whose deliveries are queued in order.
    pub fn open_stream(&self) -> Result<(ReplyAddress, mpsc::UnboundedReceiver<Envelope>)> {
        let address = self.mint();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.lock();
        if routes.closed {
            return Err(ControlError::remote_closed());
        }
        routes.table.insert(address, Route::Stream(tx));
        Ok((address, rx))
    }

    /// Retire an address. Unknown addresses are ignored.
    pub fn release(&self, address: ReplyAddress) {
        self.lock().table.remove(&address);
    }

    /// Route one delivery. Returns `false` if nobody was listening.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        let Delivery { address, envelope } = delivery;
        let mut routes = self.lock();

        match routes.table.remove(&address) {
            Some(Route::Reply(tx)) => {
                if tx.send(Ok(envelope)).is_err() {
                    debug!("Reply for {} arrived after its caller went away", address);
                    return false;
                }
                true
            }
            Some(Route::Stream(tx)) => {
                if tx.send(envelope).is_ok() {
                    routes.table.insert(address, Route::Stream(tx));
                    true
                } else {
                    debug!("Stream {} has no receiver, retiring it", address);
                    false
                }
            }
            None => {
                debug!(
                    "Dropping delivery for abandoned address {} (opcode {:#x})",
                    address, envelope.opcode
                );
                false
            }
        }
    }

    /// Tear down: fail every pending call and close every stream.
    ///
    /// Calls opened afterwards fail immediately.
    pub fn close(&self) -> usize {
        let drained: Vec<Route> = {
            let mut routes = self.lock();
            routes.closed = true;
            routes.table.drain().map(|(_, route)| route).collect()
        };

        let mut failed = 0;
        for route in drained {
            if let Route::Reply(tx) = route {
                if tx.send(Err(ControlError::remote_closed())).is_ok() {
                    failed += 1;
                }
            }
        }
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of live addresses, calls and streams together.
    pub fn pending(&self) -> usize {
        self.lock().table.len()
    }
}

/// One in-flight call waiting on its reply address.
///
/// Dropping a `PendingCall` abandons the address.
pub struct PendingCall {
    address: ReplyAddress,
    rx: oneshot::Receiver<Result<Envelope>>,
    router: Arc<ReplyRouter>,
}

impl PendingCall {
    pub fn address(&self) -> ReplyAddress {
        self.address
    }

    /// Wait for the reply, or for the link to be torn down.
    pub async fn wait(mut self) -> Result<Envelope> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ControlError::remote_closed()),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.router.release(self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::envelope::Opcode;
    use crate::TransportFailure;

    fn reply(address: ReplyAddress, payload: &str) -> Delivery {
        Delivery {
            address,
            envelope: Envelope::new(Opcode::RPC_REPLY, payload),
        }
    }

    #[tokio::test]
    async fn test_reply_resolves_matching_call() {
        let router = ReplyRouter::new();
        let first = router.open_call().unwrap();
        let second = router.open_call().unwrap();
        assert_ne!(first.address(), second.address());

        // Out of order on purpose.
        assert!(router.deliver(reply(second.address(), "two")));
        assert!(router.deliver(reply(first.address(), "one")));

        assert_eq!(first.wait().await.unwrap().payload, "one");
        assert_eq!(second.wait().await.unwrap().payload, "two");
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_second_reply_to_same_address_is_dropped() {
        let router = ReplyRouter::new();
        let call = router.open_call().unwrap();
        let address = call.address();

        assert!(router.deliver(reply(address, "first")));
        assert!(!router.deliver(reply(address, "second")));
        assert_eq!(call.wait().await.unwrap().payload, "first");
    }

    #[test]
    fn test_dropped_call_releases_address() {
        let router = ReplyRouter::new();
        let call = router.open_call().unwrap();
        let address = call.address();
        assert_eq!(router.pending(), 1);

        drop(call);
        assert_eq!(router.pending(), 0);
        assert!(!router.deliver(reply(address, "late")));
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let router = ReplyRouter::new();
        let a = router.open_call().unwrap();
        let b = router.open_call().unwrap();

        assert_eq!(router.close(), 2);

        for call in [a, b] {
            let err = call.wait().await.unwrap_err();
            assert_eq!(err.transport_failure(), Some(TransportFailure::RemoteClosed));
        }
        assert!(router.open_call().is_err());
        assert!(router.open_stream().is_err());
    }

    #[tokio::test]
    async fn test_stream_keeps_order_and_stays_open() {
        let router = ReplyRouter::new();
        let (address, mut rx) = router.open_stream().unwrap();

        for text in ["a", "b", "c"] {
            assert!(router.deliver(Delivery {
                address,
                envelope: Envelope::new(Opcode::NOTIFY_MESSAGE, text),
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().payload);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(router.pending(), 1);

        router.close();
        assert!(rx.recv().await.is_none());
    }
}
