//! Transport over the bound engine link.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::Transport;
use crate::cancel::{CancellationToken, CancelledError};
use crate::ipc::{Envelope, IpcLink, Opcode};
use crate::{ControlError, Result};

/// Sends each request as an `RPC_CALL` envelope with its own reply address.
///
/// Calls are independent: concurrent calls never wait on each other and their
/// replies may arrive in any order.
#[derive(Debug, Clone)]
pub struct IpcTransport {
    link: Arc<IpcLink>,
}

impl IpcTransport {
    pub fn new(link: Arc<IpcLink>) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &Arc<IpcLink> {
        &self.link
    }

    /// Like [`Transport::execute`], but gives up when `token` is cancelled.
    ///
    /// The reply address is retired before this returns, so a reply arriving
    /// later is dropped by the link.
    pub async fn execute_cancellable(
        &self,
        request: String,
        token: &CancellationToken,
    ) -> Result<String> {
        token.check()?;
        tokio::select! {
            result = self.execute(request) => result,
            _ = token.cancelled() => {
                debug!("Engine call cancelled");
                Err(CancelledError.into())
            }
        }
    }
}

#[async_trait]
impl Transport for IpcTransport {
    async fn execute(&self, request: String) -> Result<String> {
        let reply = self
            .link
            .call(Envelope::new(Opcode::RPC_CALL, request))
            .await?;

        if reply.opcode != Opcode::RPC_REPLY {
            return Err(ControlError::decode(format!(
                "expected RPC_REPLY, got opcode {:#x}",
                reply.opcode
            )));
        }
        Ok(reply.payload)
    }
}
