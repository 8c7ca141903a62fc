//! Shared fixtures: an in-process engine and a host that binds to it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use peca_control::host::{BindError, EngineHost, EngineStream};
use peca_control::ipc::{EngineDispatch, IpcServer, IpcServerHandle};
use peca_control::{
    ConnectEventListener, ConnectionManager, ControlError, NotificationEvent, NotifyEventListener,
    Result,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};

/// Engine that answers a handful of methods and records every call.
#[derive(Default)]
pub struct FakeEngine {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }
}

#[async_trait]
impl EngineDispatch for FakeEngine {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        match method {
            "getVersionInfo" => Ok(json!({
                "agentName": "PeerCastStation/2.3.6.0",
                "apiVersion": "1.0.0",
            })),
            "getStatus" => Ok(json!({
                "uptime": 58541,
                "isFirewalled": null,
                "globalRelayEndPoint": ["110.0.0.1", 7144],
                "localRelayEndPoint": null,
                "localDirectEndPoint": "192.168.0.6:7144",
            })),
            "bumpChannel" => {
                // A channel named "slow" takes long enough to be cancelled.
                if params[0] == "slow" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(Value::Null)
            }
            "stopChannel" => Ok(Value::Null),
            _ => Err(ControlError::RpcProtocol {
                code: -32601,
                id: 0,
                message: "Method not found".into(),
            }),
        }
    }
}

/// Host bound to a fixed loopback address. `launch` starts the engine there.
pub struct TestHost {
    pub addr: SocketAddr,
    pub engine: Arc<FakeEngine>,
    pub installed: AtomicBool,
    pub launchable: AtomicBool,
    pub launches: AtomicUsize,
    server: tokio::sync::Mutex<Option<IpcServerHandle>>,
}

impl TestHost {
    /// Host whose engine is already running.
    pub async fn running() -> Arc<Self> {
        let engine = FakeEngine::new();
        let server = IpcServer::start(Arc::clone(&engine)).await.unwrap();
        Arc::new(Self {
            addr: server.addr(),
            engine,
            installed: AtomicBool::new(true),
            launchable: AtomicBool::new(true),
            launches: AtomicUsize::new(0),
            server: tokio::sync::Mutex::new(Some(server)),
        })
    }

    /// Host with nothing listening yet.
    pub async fn stopped() -> Arc<Self> {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        Arc::new(Self {
            addr,
            engine: FakeEngine::new(),
            installed: AtomicBool::new(true),
            launchable: AtomicBool::new(true),
            launches: AtomicUsize::new(0),
            server: tokio::sync::Mutex::new(None),
        })
    }

    /// Stop the engine. Connected clients see their link die.
    pub async fn kill(&self) {
        if let Some(mut server) = self.server.lock().await.take() {
            server.shutdown();
        }
    }

    pub async fn subscribers(&self) -> usize {
        match self.server.lock().await.as_ref() {
            Some(server) => server.subscriber_count(),
            None => 0,
        }
    }

    pub async fn push(&self, event: &NotificationEvent) -> usize {
        let server = self.server.lock().await;
        server.as_ref().map_or(0, |s| s.push(event).unwrap())
    }

    pub async fn push_envelope(&self, envelope: peca_control::ipc::Envelope) -> usize {
        let server = self.server.lock().await;
        server.as_ref().map_or(0, |s| s.push_envelope(envelope))
    }

    pub fn manager(self: &Arc<Self>) -> ConnectionManager {
        let host: Arc<dyn EngineHost> = Arc::clone(self) as Arc<dyn EngineHost>;
        ConnectionManager::builder_with_host(host)
            .config(
                peca_control::ControlConfig::default()
                    .with_launch_retry_delay(Duration::from_millis(50)),
            )
            .build()
    }
}

#[async_trait]
impl EngineHost for TestHost {
    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    fn location(&self) -> String {
        format!("test engine at {}", self.addr)
    }

    async fn bind(&self) -> std::result::Result<Box<dyn EngineStream>, BindError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| BindError::from(ControlError::from(e)))?;
        Ok(Box::new(stream))
    }

    async fn launch(&self) -> Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launchable.load(Ordering::SeqCst) {
            return Ok(());
        }
        let server = IpcServer::start_on(self.addr, Arc::clone(&self.engine)).await?;
        *self.server.lock().await = Some(server);
        Ok(())
    }
}

/// Counts lifecycle callbacks.
#[derive(Default)]
pub struct LifecycleCounter {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub failures: Mutex<Vec<String>>,
}

impl LifecycleCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl ConnectEventListener for LifecycleCounter {
    fn on_connect_service(&self, _manager: &ConnectionManager) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect_service(&self, _manager: &ConnectionManager) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connect_failed(&self, _manager: &ConnectionManager, error: &ControlError) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

/// Records every push in arrival order.
#[derive(Default)]
pub struct EventRecorder {
    pub events: Mutex<Vec<NotificationEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NotifyEventListener for EventRecorder {
    fn on_notify_message(&self, categories: peca_control::MessageCategories, message: &str) {
        self.events.lock().unwrap().push(NotificationEvent::Message {
            categories,
            text: message.to_string(),
        });
    }

    fn on_notify_channel(
        &self,
        kind: peca_control::NotifyChannelType,
        channel_id: &str,
        info: &peca_control::ChannelInfo,
    ) {
        self.events.lock().unwrap().push(NotificationEvent::Channel {
            kind,
            channel_id: channel_id.to_string(),
            info: info.clone(),
        });
    }
}

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within a second");
}
