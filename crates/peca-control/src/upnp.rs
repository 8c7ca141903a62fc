//! UPnP port-mapping collaborator.
//!
//! The control plane never maps ports itself. It asks a [`PortMapper`] to open
//! the relay port after connecting and, when configured, to close it again on
//! disconnect. Both calls are fire-and-forget.

/// Opens and closes a port mapping on the local gateway.
pub trait PortMapper: Send + Sync {
    fn open_port(&self, port: u16);

    fn close_port(&self, port: u16);
}

/// Mapper that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPortMapping;

impl PortMapper for NoPortMapping {
    fn open_port(&self, port: u16) {
        tracing::debug!("UPnP disabled, not opening port {}", port);
    }

    fn close_port(&self, _port: u16) {}
}
