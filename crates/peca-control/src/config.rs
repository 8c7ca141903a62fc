//! Centralized configuration for the control plane.
//!
//! Constant holders for the IPC link, the HTTP transport and the JSON-RPC codec,
//! plus the runtime structs the public constructors accept.

use std::time::Duration;

/// Configuration for the local envelope link.
pub struct IpcConfig;

impl IpcConfig {
    pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024; // 4MB
    pub const BIND_TIMEOUT: Duration = Duration::from_secs(3);
    pub const LAUNCH_RETRY_DELAY: Duration = Duration::from_secs(2);
    pub const MAX_SERVER_CONNECTIONS: usize = 16;
    /// Default loopback port of the engine's control socket.
    pub const DEFAULT_CONTROL_PORT: u16 = 7145;
    /// How long a closing link keeps writing queued frames.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
}

/// Configuration for the direct HTTP transport.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const READ_TIMEOUT: Duration = Duration::from_secs(20);
    pub const API_PATH: &'static str = "/api/1";
    pub const DEFAULT_PORT: u16 = 7144;
    pub const MIN_PORT: u16 = 1025;
    pub const USER_AGENT: &'static str = concat!("peca-control/", env!("CARGO_PKG_VERSION"));
}

/// Configuration for the JSON-RPC codec.
pub struct RpcConfig;

impl RpcConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Ids below this are left for hand-written debug requests.
    pub const REQUEST_ID_SEED: i64 = 10_000;
    pub const DEFAULT_ERROR_MESSAGE: &'static str = "rpc error";
    pub const DEFAULT_ERROR_CODE: i32 = -1;
}

/// Timeouts and identification for [`crate::transport::HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: NetworkConfig::CONNECT_TIMEOUT,
            read_timeout: NetworkConfig::READ_TIMEOUT,
            user_agent: NetworkConfig::USER_AGENT.to_string(),
        }
    }
}

impl HttpTransportConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Runtime options for [`crate::ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Delay between launching the engine and the second bind attempt.
    pub launch_retry_delay: Duration,
    /// Relay port to map through UPnP after connecting.
    pub upnp_port: Option<u16>,
    /// Remove the UPnP mapping again on disconnect.
    pub close_port_on_disconnect: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            launch_retry_delay: IpcConfig::LAUNCH_RETRY_DELAY,
            upnp_port: None,
            close_port_on_disconnect: false,
        }
    }
}

impl ControlConfig {
    pub fn with_launch_retry_delay(mut self, delay: Duration) -> Self {
        self.launch_retry_delay = delay;
        self
    }

    pub fn with_upnp_port(mut self, port: u16, close_on_disconnect: bool) -> Self {
        self.upnp_port = Some(port);
        self.close_port_on_disconnect = close_on_disconnect;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        let cfg = HttpTransportConfig::default();
        assert!(cfg.connect_timeout >= Duration::from_secs(3));
        assert!(cfg.read_timeout <= Duration::from_secs(20));
        assert!(cfg.user_agent.starts_with("peca-control/"));
    }

    #[test]
    fn test_request_id_seed_leaves_low_range() {
        assert!(RpcConfig::REQUEST_ID_SEED >= 1000);
    }

    #[test]
    fn test_control_config_builder() {
        let cfg = ControlConfig::default().with_upnp_port(7144, true);
        assert_eq!(cfg.upnp_port, Some(7144));
        assert!(cfg.close_port_on_disconnect);
    }
}
