//! Engine side of the envelope protocol.
//!
//! Listens on a loopback port, answers `RPC_CALL` envelopes through an
//! [`EngineDispatch`] implementation and keeps track of the notification address
//! each connected client registered, so the engine can push events to it.
//!
//! # Thread Safety
//!
//! Each connection gets a reader task and a writer task. Calls are dispatched
//! in their own tasks so that a slow method never holds up the others; replies
//! go through the connection's outbound queue, which keeps frames whole.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::envelope::{read_message, write_message, Delivery, Envelope, Opcode, ReplyAddress};
use crate::config::{IpcConfig, RpcConfig};
use crate::notify::NotificationEvent;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::{ControlError, Result};

/// Trait for answering JSON-RPC method calls on the engine side.
#[async_trait::async_trait]
pub trait EngineDispatch: Send + Sync + 'static {
    /// Dispatch one method call and return its result.
    ///
    /// An `Err(ControlError::RpcProtocol { .. })` is sent back with its own code;
    /// any other error becomes an internal error (-32603).
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value>;
}

struct Subscriber {
    address: ReplyAddress,
    outbound: mpsc::UnboundedSender<Delivery>,
}

type Subscribers = Arc<Mutex<HashMap<u64, Subscriber>>>;

/// Handle to a running engine server. Dropping shuts it down.
pub struct IpcServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
    subscribers: Subscribers,
}

impl IpcServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Push a notification to every client that registered an address.
    ///
    /// Returns how many clients it was queued for.
    pub fn push(&self, event: &NotificationEvent) -> Result<usize> {
        Ok(self.push_envelope(event.to_envelope()?))
    }

    /// Push a raw envelope to every registered notification address.
    pub fn push_envelope(&self, envelope: Envelope) -> usize {
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers
            .values()
            .filter(|sub| {
                sub.outbound
                    .send(Delivery {
                        address: sub.address,
                        envelope: envelope.clone(),
                    })
                    .is_ok()
            })
            .count()
    }

    /// Number of clients with a registered notification address.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop accepting and close every client connection.
    ///
    /// To a connected client this looks exactly like the engine dying.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Engine control server.
pub struct IpcServer;

impl IpcServer {
    /// Start the server on a random loopback port.
    pub async fn start<D: EngineDispatch>(dispatch: Arc<D>) -> Result<IpcServerHandle> {
        Self::start_on(SocketAddr::from(([127, 0, 0, 1], 0)), dispatch).await
    }

    /// Start the server on a fixed address.
    pub async fn start_on<D: EngineDispatch>(
        addr: SocketAddr,
        dispatch: Arc<D>,
    ) -> Result<IpcServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("Engine control server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let subscribers: Subscribers = Arc::new(Mutex::new(HashMap::new()));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            dispatch,
            shutdown_rx,
            conn_shutdown_rx,
            Arc::clone(&subscribers),
        ));

        Ok(IpcServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
            subscribers,
        })
    }

    async fn accept_loop<D: EngineDispatch>(
        listener: TcpListener,
        dispatch: Arc<D>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        subscribers: Subscribers,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));
        let next_conn_id = AtomicU64::new(1);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Engine control server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= IpcConfig::MAX_SERVER_CONNECTIONS {
                                warn!(
                                    "Rejecting control connection from {}: at max capacity ({})",
                                    peer_addr,
                                    IpcConfig::MAX_SERVER_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                            let dispatch = Arc::clone(&dispatch);
                            let conns = Arc::clone(&active_connections);
                            let subscribers = Arc::clone(&subscribers);
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Control connection {} from {}", conn_id, peer_addr);
                                if let Err(e) = Self::handle_connection(
                                    conn_id,
                                    stream,
                                    dispatch,
                                    &subscribers,
                                    &mut conn_shutdown,
                                )
                                .await
                                {
                                    debug!("Control connection {} ended: {}", conn_id, e);
                                }
                                subscribers
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .remove(&conn_id);
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Control accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<D: EngineDispatch>(
        conn_id: u64,
        stream: TcpStream,
        dispatch: Arc<D>,
        subscribers: &Subscribers,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Delivery>();

        let writer_task = tokio::spawn(async move {
            while let Some(delivery) = queue.recv().await {
                if let Err(e) = write_message(&mut writer, &delivery).await {
                    debug!("Control writer stopped: {}", e);
                    break;
                }
            }
        });

        let outcome = loop {
            let envelope = tokio::select! {
                result = read_message::<_, Envelope>(&mut reader) => {
                    match result {
                        Ok(Some(env)) => env,
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                _ = shutdown_rx.changed() => break Ok(()),
            };

            match envelope.opcode {
                Opcode::RPC_CALL => {
                    let Some(address) = envelope.reply_to else {
                        warn!("RPC_CALL without reply address on connection {}", conn_id);
                        continue;
                    };
                    let dispatch = Arc::clone(&dispatch);
                    let outbound = outbound.clone();
                    tokio::spawn(async move {
                        let response = Self::process_request(&envelope.payload, &*dispatch).await;
                        let delivery = Delivery {
                            address,
                            envelope: Envelope::new(Opcode::RPC_REPLY, response),
                        };
                        // The client may be gone by now.
                        let _ = outbound.send(delivery);
                    });
                }
                Opcode::REGISTER_NOTIFY => match envelope.reply_to {
                    Some(address) => {
                        debug!("Connection {} registered notify address {}", conn_id, address);
                        subscribers
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(
                                conn_id,
                                Subscriber {
                                    address,
                                    outbound: outbound.clone(),
                                },
                            );
                    }
                    None => warn!("REGISTER_NOTIFY without address on connection {}", conn_id),
                },
                Opcode::UNREGISTER_NOTIFY => {
                    subscribers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&conn_id);
                }
                other => warn!("Ignoring unknown opcode {:#x} on connection {}", other, conn_id),
            }
        };

        writer_task.abort();
        outcome
    }

    async fn process_request<D: EngineDispatch>(request_str: &str, dispatch: &D) -> String {
        let response = match serde_json::from_str::<RpcRequest>(request_str) {
            Err(e) => RpcResponse::failure(None, -32700, format!("Parse error: {}", e)),
            Ok(request) if request.jsonrpc != RpcConfig::JSONRPC_VERSION => RpcResponse::failure(
                Some(request.id.into()),
                -32600,
                "Invalid Request: expected jsonrpc 2.0",
            ),
            Ok(request) => {
                let id = Value::from(request.id);
                let params = request.params.map(Value::from).unwrap_or(Value::Null);
                match dispatch.dispatch(&request.method, params).await {
                    Ok(result) => RpcResponse::success(Some(id), result),
                    Err(ControlError::RpcProtocol { code, message, .. }) => {
                        RpcResponse::failure(Some(id), code, message)
                    }
                    Err(e) => RpcResponse::failure(Some(id), -32603, e.to_string()),
                }
            }
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            error!("Failed to encode RPC response: {}", e);
            String::from(r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"encode failure"},"id":null}"#)
        })
    }
}
