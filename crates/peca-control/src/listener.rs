//! Listener traits for connection lifecycle and push events.
//!
//! Callbacks run outside of every internal lock, so they may call back into the
//! [`ConnectionManager`] (add or remove listeners, disconnect, start calls).
//! For partial interest, use the closure adapters [`ConnectEventAdapter`] and
//! [`NotifyEventAdapter`].

use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::ConnectionManager;
use crate::notify::{MessageCategories, NotifyChannelType};
use crate::rpc::ChannelInfo;
use crate::ControlError;

/// Connection lifecycle callbacks.
pub trait ConnectEventListener: Send + Sync {
    /// The manager is bound to the engine.
    fn on_connect_service(&self, manager: &ConnectionManager);

    /// The binding was released, locally or because the engine went away.
    fn on_disconnect_service(&self, manager: &ConnectionManager);

    /// A `connect()` attempt failed.
    fn on_connect_failed(&self, manager: &ConnectionManager, error: &ControlError);
}

/// Push-event callbacks.
pub trait NotifyEventListener: Send + Sync {
    fn on_notify_message(&self, categories: MessageCategories, message: &str);

    fn on_notify_channel(&self, kind: NotifyChannelType, channel_id: &str, info: &ChannelInfo);
}

type ManagerCallback = Box<dyn Fn(&ConnectionManager) + Send + Sync>;
type FailureCallback = Box<dyn Fn(&ConnectionManager, &ControlError) + Send + Sync>;

/// [`ConnectEventListener`] built from closures; unset callbacks do nothing.
///
/// ```rust,ignore
/// let listener = Arc::new(ConnectEventAdapter::new().on_connect(|manager| {
///     tracing::info!("engine ready");
/// }));
/// manager.add_connect_event_listener(listener);
/// ```
#[derive(Default)]
pub struct ConnectEventAdapter {
    on_connect: Option<ManagerCallback>,
    on_disconnect: Option<ManagerCallback>,
    on_failed: Option<FailureCallback>,
}

impl ConnectEventAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, f: impl Fn(&ConnectionManager) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(&ConnectionManager) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    pub fn on_failed(
        mut self,
        f: impl Fn(&ConnectionManager, &ControlError) + Send + Sync + 'static,
    ) -> Self {
        self.on_failed = Some(Box::new(f));
        self
    }
}

impl ConnectEventListener for ConnectEventAdapter {
    fn on_connect_service(&self, manager: &ConnectionManager) {
        if let Some(f) = &self.on_connect {
            f(manager);
        }
    }

    fn on_disconnect_service(&self, manager: &ConnectionManager) {
        if let Some(f) = &self.on_disconnect {
            f(manager);
        }
    }

    fn on_connect_failed(&self, manager: &ConnectionManager, error: &ControlError) {
        if let Some(f) = &self.on_failed {
            f(manager, error);
        }
    }
}

type MessageCallback = Box<dyn Fn(MessageCategories, &str) + Send + Sync>;
type ChannelCallback = Box<dyn Fn(NotifyChannelType, &str, &ChannelInfo) + Send + Sync>;

/// [`NotifyEventListener`] built from closures.
#[derive(Default)]
pub struct NotifyEventAdapter {
    on_message: Option<MessageCallback>,
    on_channel: Option<ChannelCallback>,
}

impl NotifyEventAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message(mut self, f: impl Fn(MessageCategories, &str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    pub fn on_channel(
        mut self,
        f: impl Fn(NotifyChannelType, &str, &ChannelInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_channel = Some(Box::new(f));
        self
    }
}

impl NotifyEventListener for NotifyEventAdapter {
    fn on_notify_message(&self, categories: MessageCategories, message: &str) {
        if let Some(f) = &self.on_message {
            f(categories, message);
        }
    }

    fn on_notify_channel(&self, kind: NotifyChannelType, channel_id: &str, info: &ChannelInfo) {
        if let Some(f) = &self.on_channel {
            f(kind, channel_id, info);
        }
    }
}

/// The single notification-listener slot of a manager.
///
/// Shared with the dispatch task, which reads it once per event.
#[derive(Clone, Default)]
pub struct NotifyListenerSlot {
    inner: Arc<Mutex<Option<Arc<dyn NotifyEventListener>>>>,
}

impl NotifyListenerSlot {
    /// Replace the listener; returns the previous one.
    pub fn set(
        &self,
        listener: Option<Arc<dyn NotifyEventListener>>,
    ) -> Option<Arc<dyn NotifyEventListener>> {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, listener)
    }

    pub fn get(&self) -> Option<Arc<dyn NotifyEventListener>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for NotifyListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyListenerSlot")
            .field("occupied", &self.get().is_some())
            .finish()
    }
}

/// Identity of a listener `Arc`, ignoring vtable metadata.
pub(crate) fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
