//! Local envelope link to the engine.
//!
//! The engine's control socket carries length-prefixed JSON frames over a local
//! stream (loopback TCP by default).
//!
//! # Architecture
//!
//! - **Envelope**: framing and the `{opcode, arg, payload, replyTo}` message unit
//! - **Router**: one-shot reply addresses for in-flight calls, plus long-lived
//!   streams for pushes
//! - **Link**: the client's bound handle, owning the stream and the receive task
//! - **Server**: the engine side, used to embed the protocol in an engine process

pub mod envelope;
pub mod link;
pub mod router;
pub mod server;

pub use envelope::{Delivery, Envelope, Opcode, ReplyAddress};
pub use link::IpcLink;
pub use router::{PendingCall, ReplyRouter};
pub use server::{EngineDispatch, IpcServer, IpcServerHandle};
