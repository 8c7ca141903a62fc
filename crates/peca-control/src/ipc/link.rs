//! A bound link to the engine's control socket.
//!
//! The link owns a [`ReplyRouter`], a receive task that reads [`Delivery`]
//! frames and routes them, and a writer task that drains an outbound queue of
//! encoded frames. Callers only ever enqueue whole frames, so a caller that
//! gives up mid-call cannot leave half a frame on the stream. When the engine
//! closes the stream (or dies), the receive task fails every pending call and
//! flips the link's closed signal, which the connection manager watches.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::envelope::{check_frame_size, read_frame, write_frame, Delivery, Envelope, ReplyAddress};
use super::router::ReplyRouter;
use crate::config::IpcConfig;
use crate::rpc::RequestIds;
use crate::{ControlError, Result};

/// Opaque handle to the engine.
pub struct IpcLink {
    router: Arc<ReplyRouter>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed_tx: Arc<watch::Sender<bool>>,
    receiver: JoinHandle<()>,
    request_ids: Arc<RequestIds>,
}

impl IpcLink {
    /// Take ownership of a connected stream and start the receive and writer tasks.
    pub fn spawn<S>(stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let router = ReplyRouter::new();
        let (closed_tx, _) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        let (outbound, queue) = mpsc::unbounded_channel();

        let receiver = tokio::spawn(receive_loop(
            read_half,
            Arc::clone(&router),
            Arc::clone(&closed_tx),
        ));
        let writer = tokio::spawn(write_loop(
            write_half,
            queue,
            Arc::clone(&router),
            Arc::clone(&closed_tx),
        ));

        Arc::new(Self {
            router,
            outbound,
            writer: Mutex::new(Some(writer)),
            closed_tx,
            receiver,
            request_ids: Arc::new(RequestIds::default()),
        })
    }

    /// Queue one envelope for the writer task.
    ///
    /// Returns once the whole frame is queued. Frames go out in queue order and
    /// never interleave.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(ControlError::remote_closed());
        }
        let frame = serde_json::to_vec(envelope)?;
        check_frame_size(frame.len())?;
        self.outbound
            .send(frame)
            .map_err(|_| ControlError::remote_closed())
    }

    /// Send `envelope` with a fresh reply address and wait for the reply.
    ///
    /// Dropping the returned future abandons the reply address; a reply that
    /// arrives afterwards is discarded.
    pub async fn call(&self, envelope: Envelope) -> Result<Envelope> {
        let pending = self.router.open_call()?;
        let envelope = envelope.with_reply_to(pending.address());
        self.send(&envelope)?;
        pending.wait().await
    }

    /// Mint a long-lived address; deliveries arrive on the receiver in order.
    pub fn open_stream(&self) -> Result<(ReplyAddress, mpsc::UnboundedReceiver<Envelope>)> {
        self.router.open_stream()
    }

    pub fn close_stream(&self, address: ReplyAddress) {
        self.router.release(address);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Closed-signal receiver that does not keep the link alive.
    ///
    /// Waiting on it errors out if the link is dropped before it closes.
    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Resolves once the link is closed, locally or by the engine.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Request ids shared by every client built on this link.
    pub fn request_ids(&self) -> Arc<RequestIds> {
        Arc::clone(&self.request_ids)
    }

    /// Number of reply addresses currently registered.
    pub fn pending_calls(&self) -> usize {
        self.router.pending()
    }

    /// Fail every pending call and refuse new ones. Sending stays possible.
    pub fn fail_pending(&self) -> usize {
        self.router.close()
    }

    /// Close the link from this side.
    ///
    /// Frames queued before the call are still written, for at most
    /// [`IpcConfig::SHUTDOWN_GRACE`]; an engine that stops reading does not
    /// hold the shutdown up past that.
    pub async fn shutdown(&self) {
        self.receiver.abort();
        let failed = self.router.close();
        if failed > 0 {
            debug!("Failed {} pending calls on shutdown", failed);
        }
        self.closed_tx.send_replace(true);

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut writer) = writer {
            if tokio::time::timeout(IpcConfig::SHUTDOWN_GRACE, &mut writer)
                .await
                .is_err()
            {
                debug!("Engine stopped reading, dropping unsent frames");
                writer.abort();
            }
        }
    }
}

impl Drop for IpcLink {
    fn drop(&mut self) {
        self.receiver.abort();
        if let Some(writer) = self
            .writer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            writer.abort();
        }
        self.router.close();
        self.closed_tx.send_replace(true);
    }
}

impl std::fmt::Debug for IpcLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcLink")
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

async fn receive_loop<R>(mut reader: R, router: Arc<ReplyRouter>, closed_tx: Arc<watch::Sender<bool>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Engine closed the link");
                break;
            }
            Err(e) => {
                warn!("Engine link read failed: {}", e);
                break;
            }
        };

        match serde_json::from_slice::<Delivery>(&frame) {
            Ok(delivery) => {
                router.deliver(delivery);
            }
            // Framing is still intact, keep reading.
            Err(e) => warn!("Dropping undecodable frame from engine: {}", e),
        }
    }

    let failed = router.close();
    if failed > 0 {
        warn!("Engine link lost with {} calls in flight", failed);
    }
    closed_tx.send_replace(true);
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    router: Arc<ReplyRouter>,
    closed_tx: Arc<watch::Sender<bool>>,
) where
    W: AsyncWrite + Unpin,
{
    let mut closed = closed_tx.subscribe();
    loop {
        tokio::select! {
            biased;
            frame = queue.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!("Engine link write failed: {}", e);
                    router.close();
                    closed_tx.send_replace(true);
                    return;
                }
            }
            _ = async { closed.wait_for(|closed| *closed).await.map(|_| ()) } => {
                // Write out what was queued before the close.
                queue.close();
                while let Some(frame) = queue.recv().await {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        debug!("Dropping unsent frames after close: {}", e);
                        return;
                    }
                }
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Error shutting down engine link: {}", e);
    }
}
