//! peca-control - control plane for a PeerCast-style relay engine.
//!
//! The engine runs either as a separate process on this machine, reached over a
//! local envelope link, or on another host reached over HTTP. Both expose the
//! same JSON-RPC 2.0 API, wrapped here by [`RpcClient`]. Push events (log
//! messages, channel start/update/stop) are only available over the local link
//! and reach a [`NotifyEventListener`] without polling.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peca_control::{ConnectionManager, LocalEngineHost, NotifyEventAdapter};
//!
//! #[tokio::main]
//! async fn main() -> peca_control::Result<()> {
//!     let manager = ConnectionManager::new(LocalEngineHost::new("/opt/peercast/peercast"));
//!     manager.set_notify_event_listener(Some(Arc::new(
//!         NotifyEventAdapter::new().on_message(|_, text| println!("engine: {}", text)),
//!     )));
//!
//!     if manager.connect().await? {
//!         let client = manager.rpc_client()?;
//!         println!("{} channels", client.get_channels().await?.len());
//!         manager.disconnect().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod host;
pub mod ipc;
pub mod listener;
pub mod notify;
pub mod rpc;
pub mod transport;
pub mod upnp;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use config::{ControlConfig, HttpTransportConfig, IpcConfig, NetworkConfig, RpcConfig};
pub use connection::{ConnectionManager, ConnectionManagerBuilder};
pub use error::{ControlError, Result, TransportFailure};
pub use host::{BindError, EngineHost, EngineStream, LocalEngineHost};
pub use listener::{
    ConnectEventAdapter, ConnectEventListener, NotifyEventAdapter, NotifyEventListener,
};
pub use notify::{
    MessageCategories, NotificationEvent, NotificationFanout, NotifyChannelType,
    NotifyMessageType,
};
pub use rpc::{
    Channel, ChannelConnection, ChannelInfo, ChannelInfoResult, ChannelRelayTree, ChannelStatus,
    ConnectionStatus, EndPoint, Log, LogSettings, RpcClient, Settings, Status, Track, VersionInfo,
    YellowPage, YellowPageChannelStatus, YpChannel,
};
pub use transport::{HttpTransport, IpcTransport, Timeout, Transport};
pub use upnp::{NoPortMapping, PortMapper};
