//! JSON-RPC 2.0 codec and the typed engine API.

pub mod client;
pub mod endpoint;
pub mod null_safe;
pub mod request;
pub mod response;
pub mod types;

pub use client::RpcClient;
pub use endpoint::EndPoint;
pub use request::{Params, RequestIds, RpcRequest};
pub use response::{RpcErrorObject, RpcResponse};
pub use types::{
    Channel, ChannelConnection, ChannelInfo, ChannelInfoResult, ChannelRelayTree, ChannelStatus,
    ConnectionStatus, Log, LogSettings, Settings, Status, Track, VersionInfo, YellowPage,
    YellowPageChannelStatus, YpChannel,
};
