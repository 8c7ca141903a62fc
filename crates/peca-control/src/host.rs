//! Where the engine lives and how to reach it.
//!
//! [`EngineHost`] is the platform seam of the connection manager: it reports
//! whether the engine is installed, opens a stream to its control socket and
//! launches it when nothing is listening. [`LocalEngineHost`] implements it for
//! an engine executable on this machine listening on a loopback port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::{IpcConfig, NetworkConfig};
use crate::{ControlError, Result};

/// A connected stream to the engine's control socket.
pub trait EngineStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> EngineStream for T {}

/// Why a bind attempt failed.
#[derive(Debug)]
pub enum BindError {
    /// Nothing is accepting connections; launching the engine may help.
    Refused(ControlError),
    /// Any other failure. Launching will not help.
    Failed(ControlError),
}

impl BindError {
    pub fn into_error(self) -> ControlError {
        match self {
            BindError::Refused(e) | BindError::Failed(e) => e,
        }
    }
}

impl From<ControlError> for BindError {
    fn from(err: ControlError) -> Self {
        match err.transport_failure() {
            Some(crate::TransportFailure::Refused) => BindError::Refused(err),
            _ => BindError::Failed(err),
        }
    }
}

/// Platform operations the connection manager needs.
#[async_trait]
pub trait EngineHost: Send + Sync + 'static {
    /// Whether the engine is present at all.
    fn is_installed(&self) -> bool;

    /// Human-readable location, used in `EngineNotInstalled`.
    fn location(&self) -> String;

    /// Open a stream to the engine's control socket.
    async fn bind(&self) -> std::result::Result<Box<dyn EngineStream>, BindError>;

    /// Start the engine. Returns once the launch was issued, not when the
    /// engine is ready.
    async fn launch(&self) -> Result<()>;

    /// Loopback port of the engine's HTTP server.
    fn http_port(&self) -> u16 {
        NetworkConfig::DEFAULT_PORT
    }
}

/// An engine executable on this machine with a loopback control port.
#[derive(Debug, Clone)]
pub struct LocalEngineHost {
    executable: PathBuf,
    args: Vec<String>,
    control_addr: SocketAddr,
    bind_timeout: Duration,
    http_port: u16,
}

impl LocalEngineHost {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            control_addr: SocketAddr::from(([127, 0, 0, 1], IpcConfig::DEFAULT_CONTROL_PORT)),
            bind_timeout: IpcConfig::BIND_TIMEOUT,
            http_port: NetworkConfig::DEFAULT_PORT,
        }
    }

    /// Arguments passed to the executable on launch.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_control_addr(mut self, addr: SocketAddr) -> Self {
        self.control_addr = addr;
        self
    }

    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }
}

#[async_trait]
impl EngineHost for LocalEngineHost {
    fn is_installed(&self) -> bool {
        self.executable.is_file()
    }

    fn location(&self) -> String {
        self.executable.display().to_string()
    }

    async fn bind(&self) -> std::result::Result<Box<dyn EngineStream>, BindError> {
        let stream = tokio::time::timeout(self.bind_timeout, TcpStream::connect(self.control_addr))
            .await
            .map_err(|_| BindError::Failed(ControlError::timed_out(self.bind_timeout)))?
            .map_err(|e| BindError::from(ControlError::from(e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY on engine link: {}", e);
        }
        debug!("Bound to engine at {}", self.control_addr);
        Ok(Box::new(stream))
    }

    fn http_port(&self) -> u16 {
        self.http_port
    }

    async fn launch(&self) -> Result<()> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // Detach so the engine outlives this process.
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        info!("Launching engine {}", self.executable.display());
        match cmd.spawn() {
            Ok(mut child) => {
                info!("Launched engine with PID {:?}", child.id());
                // Reap the engine when it exits.
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) => info!("Engine exited: {}", status),
                        Err(e) => debug!("Could not wait for engine: {}", e),
                    }
                });
                Ok(())
            }
            Err(e) => {
                error!("Failed to launch engine: {}", e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_missing_executable_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalEngineHost::new(dir.path().join("peercast"));
        assert!(!host.is_installed());
        assert!(host.location().ends_with("peercast"));
    }

    #[test]
    fn test_existing_file_is_installed() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("peercast");
        std::fs::write(&exe, b"").unwrap();
        assert!(LocalEngineHost::new(&exe).is_installed());

        // A directory is not an executable.
        assert!(!LocalEngineHost::new(dir.path()).is_installed());
    }

    #[tokio::test]
    async fn test_bind_refused_when_nothing_listens() {
        // Grab a free port, then release it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let host = LocalEngineHost::new("/nonexistent").with_control_addr(addr);
        match host.bind().await {
            Err(BindError::Refused(e)) => {
                assert_eq!(e.transport_failure(), Some(crate::TransportFailure::Refused))
            }
            Err(other) => panic!("expected refused, got {:?}", other),
            Ok(_) => panic!("expected refused, got a stream"),
        }
    }

    #[tokio::test]
    async fn test_bind_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = LocalEngineHost::new("/nonexistent").with_control_addr(listener.local_addr().unwrap());

        let (bound, accepted) = tokio::join!(host.bind(), listener.accept());
        assert!(bound.is_ok());
        assert!(accepted.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_spawns_and_reaps_engine() {
        let host = LocalEngineHost::new("/bin/sh").with_args(["-c", "exit 0"]);
        assert!(host.is_installed());
        host.launch().await.unwrap();
        // The reaper task collects the exit without the caller waiting.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_http_port_defaults_and_overrides() {
        let host = LocalEngineHost::new("/nonexistent");
        assert_eq!(host.http_port(), NetworkConfig::DEFAULT_PORT);
        assert_eq!(host.with_http_port(8144).http_port(), 8144);
    }

    #[tokio::test]
    async fn test_launch_missing_executable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalEngineHost::new(dir.path().join("missing"));
        assert!(host.launch().await.is_err());
    }
}
