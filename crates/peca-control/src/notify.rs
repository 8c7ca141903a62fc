//! Push notifications from the engine.
//!
//! The engine sends two kinds of unsolicited envelopes to a connection's
//! notification address:
//!
//! - `NOTIFY_MESSAGE`: `arg` is a category bitmask, `payload` the message text.
//! - `NOTIFY_CHANNEL`: `arg` is the event ordinal (start, update, stop) and
//!   `payload` is `{"channelId": "...", "channelInfo": "<ChannelInfo JSON>"}`.
//!
//! The link's receive task only queues envelopes; a separate dispatch task
//! decodes them and calls the registered [`NotifyEventListener`], so a slow
//! listener never holds up RPC replies.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ipc::{Envelope, Opcode};
use crate::listener::{NotifyEventListener, NotifyListenerSlot};
use crate::rpc::null_safe::null_as_default;
use crate::rpc::ChannelInfo;
use crate::{ControlError, Result};

/// Category of a log message push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyMessageType {
    Upgrade,
    PeerCast,
    Broadcasters,
    TrackInfo,
}

impl NotifyMessageType {
    pub const ALL: [NotifyMessageType; 4] = [
        NotifyMessageType::Upgrade,
        NotifyMessageType::PeerCast,
        NotifyMessageType::Broadcasters,
        NotifyMessageType::TrackInfo,
    ];

    pub fn bit(self) -> i32 {
        match self {
            NotifyMessageType::Upgrade => 0x01,
            NotifyMessageType::PeerCast => 0x02,
            NotifyMessageType::Broadcasters => 0x04,
            NotifyMessageType::TrackInfo => 0x08,
        }
    }
}

/// Set of message categories carried by one push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageCategories(i32);

impl MessageCategories {
    /// Keep only the known category bits of `bits`.
    pub fn from_bits(bits: i32) -> Self {
        let known = NotifyMessageType::ALL
            .iter()
            .fold(0, |acc, t| acc | t.bit());
        Self(bits & known)
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, kind: NotifyMessageType) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn with(self, kind: NotifyMessageType) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = NotifyMessageType> {
        NotifyMessageType::ALL
            .into_iter()
            .filter(move |t| self.contains(*t))
    }
}

impl From<NotifyMessageType> for MessageCategories {
    fn from(kind: NotifyMessageType) -> Self {
        Self(kind.bit())
    }
}

impl FromIterator<NotifyMessageType> for MessageCategories {
    fn from_iter<I: IntoIterator<Item = NotifyMessageType>>(iter: I) -> Self {
        iter.into_iter()
            .fold(MessageCategories::default(), MessageCategories::with)
    }
}

/// Channel lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyChannelType {
    Start,
    Update,
    Stop,
}

impl NotifyChannelType {
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(NotifyChannelType::Start),
            1 => Some(NotifyChannelType::Update),
            2 => Some(NotifyChannelType::Stop),
            _ => None,
        }
    }

    pub fn ordinal(self) -> i32 {
        match self {
            NotifyChannelType::Start => 0,
            NotifyChannelType::Update => 1,
            NotifyChannelType::Stop => 2,
        }
    }
}

impl fmt::Display for NotifyChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyChannelType::Start => "start",
            NotifyChannelType::Update => "update",
            NotifyChannelType::Stop => "stop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelPayload {
    #[serde(rename = "channelId", default, deserialize_with = "null_as_default")]
    channel_id: String,
    /// `ChannelInfo` serialized a second time, as a string.
    #[serde(rename = "channelInfo", default, deserialize_with = "null_as_default")]
    channel_info: String,
}

/// A decoded push.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Message {
        categories: MessageCategories,
        text: String,
    },
    Channel {
        kind: NotifyChannelType,
        channel_id: String,
        info: ChannelInfo,
    },
}

impl NotificationEvent {
    /// Decode a push envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        match envelope.opcode {
            Opcode::NOTIFY_MESSAGE => Ok(NotificationEvent::Message {
                categories: MessageCategories::from_bits(envelope.arg),
                text: envelope.payload.clone(),
            }),
            Opcode::NOTIFY_CHANNEL => {
                let kind = NotifyChannelType::from_ordinal(envelope.arg).ok_or_else(|| {
                    ControlError::decode(format!("unknown channel event ordinal {}", envelope.arg))
                })?;
                let payload: ChannelPayload = serde_json::from_str(&envelope.payload)?;
                let info: ChannelInfo = serde_json::from_str(&payload.channel_info)?;
                Ok(NotificationEvent::Channel {
                    kind,
                    channel_id: payload.channel_id,
                    info,
                })
            }
            other => Err(ControlError::decode(format!(
                "opcode {:#x} is not a notification",
                other
            ))),
        }
    }

    /// Encode as the engine would send it.
    pub fn to_envelope(&self) -> Result<Envelope> {
        match self {
            NotificationEvent::Message { categories, text } => {
                Ok(Envelope::new(Opcode::NOTIFY_MESSAGE, text.clone()).with_arg(categories.bits()))
            }
            NotificationEvent::Channel {
                kind,
                channel_id,
                info,
            } => {
                let payload = ChannelPayload {
                    channel_id: channel_id.clone(),
                    channel_info: serde_json::to_string(info)?,
                };
                Ok(
                    Envelope::new(Opcode::NOTIFY_CHANNEL, serde_json::to_string(&payload)?)
                        .with_arg(kind.ordinal()),
                )
            }
        }
    }

    /// Hand the event to `listener`.
    pub fn deliver_to(&self, listener: &dyn NotifyEventListener) {
        match self {
            NotificationEvent::Message { categories, text } => {
                listener.on_notify_message(*categories, text)
            }
            NotificationEvent::Channel {
                kind,
                channel_id,
                info,
            } => listener.on_notify_channel(*kind, channel_id, info),
        }
    }
}

/// Dispatch task between a connection's notification queue and its listener.
///
/// Stops when the queue closes or the fanout is dropped.
#[derive(Debug)]
pub struct NotificationFanout {
    task: JoinHandle<()>,
}

impl NotificationFanout {
    pub fn spawn(queue: mpsc::UnboundedReceiver<Envelope>, slot: NotifyListenerSlot) -> Self {
        Self {
            task: tokio::spawn(dispatch_loop(queue, slot)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for NotificationFanout {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn dispatch_loop(mut queue: mpsc::UnboundedReceiver<Envelope>, slot: NotifyListenerSlot) {
    while let Some(envelope) = queue.recv().await {
        let event = match NotificationEvent::from_envelope(&envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping notification: {}", e);
                continue;
            }
        };

        match slot.get() {
            Some(listener) => event.deliver_to(listener.as_ref()),
            None => debug!("No notification listener, dropping {:?}", event),
        }
    }
    debug!("Notification queue closed");
}
