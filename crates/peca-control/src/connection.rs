//! Connection lifecycle to the engine.
//!
//! A [`ConnectionManager`] binds to the engine through an [`EngineHost`],
//! registers the single notification address on the new link and tells
//! [`ConnectEventListener`]s about every transition. Each successful connect
//! gets a generation number; listeners remember the last generation they were
//! told about so that a listener added during `connect()` is never called twice
//! for the same connect, and a link that dies is torn down exactly once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{ControlConfig, NetworkConfig};
use crate::host::{BindError, EngineHost, EngineStream};
use crate::ipc::{Envelope, IpcLink, Opcode, ReplyAddress};
use crate::listener::{same_listener, ConnectEventListener, NotifyEventListener, NotifyListenerSlot};
use crate::notify::NotificationFanout;
use crate::rpc::RpcClient;
use crate::transport::IpcTransport;
use crate::upnp::{NoPortMapping, PortMapper};
use crate::{ControlError, Result};

/// Builder for [`ConnectionManager`].
///
/// ```rust,ignore
/// let manager = ConnectionManager::builder(LocalEngineHost::new("/opt/peercast/peercast"))
///     .config(ControlConfig::default().with_upnp_port(7144, true))
///     .port_mapper(Arc::new(MyUpnp::new()))
///     .build();
/// ```
pub struct ConnectionManagerBuilder {
    host: Arc<dyn EngineHost>,
    config: ControlConfig,
    port_mapper: Arc<dyn PortMapper>,
}

impl ConnectionManagerBuilder {
    pub fn config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn port_mapper(mut self, mapper: Arc<dyn PortMapper>) -> Self {
        self.port_mapper = mapper;
        self
    }

    pub fn build(self) -> ConnectionManager {
        let (connected_tx, _) = watch::channel(false);
        ConnectionManager {
            inner: Arc::new(Inner {
                host: self.host,
                config: self.config,
                port_mapper: self.port_mapper,
                shared: Mutex::new(Shared::default()),
                notify_slot: NotifyListenerSlot::default(),
                connect_lock: tokio::sync::Mutex::new(()),
                connected_tx,
            }),
        }
    }
}

/// Binds to the engine and tracks the connection's lifecycle.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    host: Arc<dyn EngineHost>,
    config: ControlConfig,
    port_mapper: Arc<dyn PortMapper>,
    shared: Mutex<Shared>,
    notify_slot: NotifyListenerSlot,
    /// Serialises connect attempts. Released before any callback fires.
    connect_lock: tokio::sync::Mutex<()>,
    connected_tx: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct Shared {
    bound: Option<Bound>,
    generation: u64,
    listeners: Vec<ListenerEntry>,
}

struct Bound {
    link: Arc<IpcLink>,
    notify_address: ReplyAddress,
    fanout: NotificationFanout,
    generation: u64,
}

struct ListenerEntry {
    listener: Arc<dyn ConnectEventListener>,
    /// Last connect generation this listener was told about.
    notified: u64,
}

impl ConnectionManager {
    pub fn new(host: impl EngineHost) -> Self {
        Self::builder(host).build()
    }

    pub fn builder(host: impl EngineHost) -> ConnectionManagerBuilder {
        Self::builder_with_host(Arc::new(host))
    }

    pub fn builder_with_host(host: Arc<dyn EngineHost>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            host,
            config: ControlConfig::default(),
            port_mapper: Arc::new(NoPortMapping),
        }
    }

    /// Bind to the engine, launching it first if nothing is listening.
    ///
    /// Returns `Ok(true)` when connected (including when already connected) and
    /// `Ok(false)` when binding failed; the failure itself is reported to
    /// [`ConnectEventListener::on_connect_failed`]. Errors only with
    /// [`ControlError::EngineNotInstalled`].
    pub async fn connect(&self) -> Result<bool> {
        let host = &self.inner.host;
        if !host.is_installed() {
            let location = host.location();
            error!("Engine is not installed at {}", location);
            return Err(ControlError::EngineNotInstalled { location });
        }

        // A link that died before its watcher ran still owes its listeners a
        // disconnect.
        if let Some(stale) = self.take_closed_bound() {
            debug!("Tearing down closed link (generation {})", stale.generation);
            self.teardown(stale, false).await;
        }

        let attempt = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            debug!("connect() while already connected");
            return Ok(true);
        }

        let stream = match self.bind_or_launch().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to bind to engine: {}", e);
                drop(attempt);
                self.fire_connect_failed(&e);
                return Ok(false);
            }
        };

        let link = IpcLink::spawn(stream);
        let (notify_address, queue) = match register_notify(&link).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!("Failed to register for engine notifications: {}", e);
                link.shutdown().await;
                drop(attempt);
                self.fire_connect_failed(&e);
                return Ok(false);
            }
        };
        let fanout = NotificationFanout::spawn(queue, self.inner.notify_slot.clone());
        let closed = link.subscribe_closed();

        let (generation, stale, to_notify) = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            let generation = shared.generation;
            let stale = shared.bound.replace(Bound {
                link,
                notify_address,
                fanout,
                generation,
            });
            self.inner.connected_tx.send_replace(true);

            let to_notify = shared
                .listeners
                .iter_mut()
                .filter(|entry| entry.notified < generation)
                .map(|entry| {
                    entry.notified = generation;
                    Arc::clone(&entry.listener)
                })
                .collect::<Vec<_>>();
            (generation, stale, to_notify)
        };

        tokio::spawn(watch_link(Arc::downgrade(&self.inner), closed, generation));
        info!("Connected to engine (generation {})", generation);
        drop(attempt);

        if let Some(stale) = stale {
            self.teardown(stale, false).await;
        }

        if let Some(port) = self.inner.config.upnp_port {
            self.inner.port_mapper.open_port(port);
        }
        for listener in to_notify {
            listener.on_connect_service(self);
        }
        Ok(true)
    }

    /// Release the connection. Does nothing when not connected.
    pub async fn disconnect(&self) {
        let bound = self.take_bound(None);
        match bound {
            Some(bound) => {
                info!("Disconnecting from engine");
                self.teardown(bound, true).await;
            }
            None => debug!("disconnect() while not connected"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .bound
            .as_ref()
            .is_some_and(|bound| !bound.link.is_closed())
    }

    /// Register a lifecycle listener. Registering the same `Arc` twice is a
    /// no-op. When already connected, `on_connect_service` fires right away.
    pub fn add_connect_event_listener(&self, listener: Arc<dyn ConnectEventListener>) {
        let connected = {
            let mut shared = self.inner.lock();
            if shared
                .listeners
                .iter()
                .any(|entry| same_listener(&entry.listener, &listener))
            {
                return;
            }
            let current = shared.bound.as_ref().map(|bound| bound.generation);
            shared.listeners.push(ListenerEntry {
                listener: Arc::clone(&listener),
                notified: current.unwrap_or(0),
            });
            current.is_some()
        };

        if connected {
            listener.on_connect_service(self);
        }
    }

    /// Returns whether the listener was registered.
    pub fn remove_connect_event_listener(&self, listener: &Arc<dyn ConnectEventListener>) -> bool {
        let mut shared = self.inner.lock();
        let before = shared.listeners.len();
        shared
            .listeners
            .retain(|entry| !same_listener(&entry.listener, listener));
        shared.listeners.len() != before
    }

    /// Replace the notification listener; `None` clears it.
    pub fn set_notify_event_listener(&self, listener: Option<Arc<dyn NotifyEventListener>>) {
        self.inner.notify_slot.set(listener);
    }

    /// Transport over the current link.
    pub fn transport(&self) -> Result<IpcTransport> {
        let shared = self.inner.lock();
        shared
            .bound
            .as_ref()
            .map(|bound| IpcTransport::new(Arc::clone(&bound.link)))
            .ok_or_else(ControlError::not_connected)
    }

    /// RPC client over the current link. Clients for one connection share its
    /// request-id counter.
    pub fn rpc_client(&self) -> Result<RpcClient> {
        let shared = self.inner.lock();
        let bound = shared.bound.as_ref().ok_or_else(ControlError::not_connected)?;
        let transport = Arc::new(IpcTransport::new(Arc::clone(&bound.link)));
        Ok(RpcClient::with_request_ids(transport, bound.link.request_ids()))
    }

    /// JSON-RPC endpoint of the engine's HTTP server, e.g.
    /// `http://127.0.0.1:7144/api/1`. Only known while connected.
    pub fn rpc_end_point(&self) -> Result<Url> {
        if !self.is_connected() {
            return Err(ControlError::not_connected());
        }
        let port = self.inner.host.http_port();
        Url::parse(&format!("http://127.0.0.1:{}{}", port, NetworkConfig::API_PATH)).map_err(|_| {
            ControlError::InvalidEndpoint {
                host: "127.0.0.1".into(),
                port,
            }
        })
    }

    /// Wait until connected, then return a client for the connection.
    pub async fn wait_for_client(&self, timeout: Duration) -> Result<RpcClient> {
        let mut connected = self.inner.connected_tx.subscribe();
        tokio::time::timeout(timeout, connected.wait_for(|c| *c))
            .await
            .map_err(|_| ControlError::timed_out(timeout))?
            .map_err(|_| ControlError::not_connected())?;
        self.rpc_client()
    }

    pub fn config(&self) -> &ControlConfig {
        &self.inner.config
    }

    async fn bind_or_launch(&self) -> Result<Box<dyn EngineStream>> {
        let host = &self.inner.host;
        match host.bind().await {
            Ok(stream) => Ok(stream),
            Err(BindError::Refused(e)) => {
                info!("Engine refused the bind ({}), launching it", e);
                host.launch().await?;
                tokio::time::sleep(self.inner.config.launch_retry_delay).await;
                host.bind().await.map_err(BindError::into_error)
            }
            Err(BindError::Failed(e)) => Err(e),
        }
    }

    /// Take the current binding, optionally only if it belongs to `generation`.
    fn take_bound(&self, generation: Option<u64>) -> Option<Bound> {
        let mut shared = self.inner.lock();
        let matches = match (&shared.bound, generation) {
            (Some(bound), Some(generation)) => bound.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        self.inner.connected_tx.send_replace(false);
        shared.bound.take()
    }

    /// Take the binding if its link has already closed.
    fn take_closed_bound(&self) -> Option<Bound> {
        let mut shared = self.inner.lock();
        if !shared.bound.as_ref().is_some_and(|bound| bound.link.is_closed()) {
            return None;
        }
        self.inner.connected_tx.send_replace(false);
        shared.bound.take()
    }

    async fn on_link_lost(&self, generation: u64) {
        if let Some(bound) = self.take_bound(Some(generation)) {
            warn!("Engine link lost (generation {})", generation);
            self.teardown(bound, false).await;
        }
    }

    async fn teardown(&self, bound: Bound, unregister: bool) {
        let Bound {
            link,
            notify_address,
            fanout,
            ..
        } = bound;

        let failed = link.fail_pending();
        if failed > 0 {
            debug!("Failed {} pending calls on teardown", failed);
        }
        if unregister {
            // Queued only; shutdown gives it a bounded chance to go out.
            let envelope = Envelope::new(Opcode::UNREGISTER_NOTIFY, "").with_reply_to(notify_address);
            if let Err(e) = link.send(&envelope) {
                debug!("Could not unregister notifications: {}", e);
            }
        }
        link.close_stream(notify_address);
        link.shutdown().await;
        drop(fanout);

        let config = &self.inner.config;
        if let (Some(port), true) = (config.upnp_port, config.close_port_on_disconnect) {
            self.inner.port_mapper.close_port(port);
        }

        for listener in self.snapshot_listeners() {
            listener.on_disconnect_service(self);
        }
    }

    fn fire_connect_failed(&self, error: &ControlError) {
        for listener in self.snapshot_listeners() {
            listener.on_connect_failed(self, error);
        }
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn ConnectEventListener>> {
        self.inner
            .lock()
            .listeners
            .iter()
            .map(|entry| Arc::clone(&entry.listener))
            .collect()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("engine", &self.inner.host.location())
            .field("connected", &shared.bound.is_some())
            .field("generation", &shared.generation)
            .field("listeners", &shared.listeners.len())
            .finish()
    }
}

async fn register_notify(
    link: &IpcLink,
) -> Result<(ReplyAddress, tokio::sync::mpsc::UnboundedReceiver<Envelope>)> {
    let (address, queue) = link.open_stream()?;
    let envelope = Envelope::new(Opcode::REGISTER_NOTIFY, "").with_reply_to(address);
    link.send(&envelope)?;
    Ok((address, queue))
}

/// Tear the connection down when its link closes underneath us.
async fn watch_link(inner: Weak<Inner>, mut closed: watch::Receiver<bool>, generation: u64) {
    // An error means the link was dropped, which only happens after teardown.
    if closed.wait_for(|closed| *closed).await.is_err() {
        return;
    }
    let Some(inner) = inner.upgrade() else {
        return;
    };
    ConnectionManager { inner }.on_link_lost(generation).await;
}
