//! Engine data types returned by the JSON-RPC API.
//!
//! Every scalar field decodes `null` (or absence) as its zero value, see
//! [`null_as_default`].

use serde::{Deserialize, Serialize};

use super::endpoint::EndPoint;
use super::null_safe::null_as_default;

/// Engine-wide status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, deserialize_with = "null_as_default")]
    pub uptime: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_firewalled: bool,
    #[serde(default)]
    pub global_relay_end_point: Option<EndPoint>,
    #[serde(default)]
    pub global_direct_end_point: Option<EndPoint>,
    #[serde(default)]
    pub local_relay_end_point: Option<EndPoint>,
    #[serde(default)]
    pub local_direct_end_point: Option<EndPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub agent_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub api_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genre: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub album: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub creator: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

/// Broadcast metadata of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genre: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub desc: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bitrate: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mime_type: String,
}

impl ChannelInfo {
    /// File extension players expect for this content type, if any.
    pub fn stream_extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "WMV" => ".wmv",
            "FLV" => ".flv",
            "MKV" => ".mkv",
            "WEBM" => ".webm",
            _ => "",
        }
    }

    /// Local playback URL of `channel_id` on the engine's HTTP port.
    pub fn stream_url(&self, channel_id: &str, port: u16) -> String {
        format!(
            "http://localhost:{}/stream/{}{}",
            port,
            channel_id,
            self.stream_extension()
        )
    }
}

/// Connection state of a channel or a single connection.
///
/// Engines report either the mixed-case names or the legacy upper-case ones;
/// both decode to the same variant. Anything else is `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[serde(alias = "RECEIVE")]
    Receiving,
    #[serde(alias = "SEARCH")]
    Searching,
    #[serde(alias = "ERROR")]
    Error,
    #[serde(alias = "IDLE")]
    Idle,
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "WAIT")]
    Wait,
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "REQUEST")]
    Request,
    #[serde(rename = "CLOSE")]
    Close,
    #[serde(rename = "BROADCAST")]
    Broadcast,
    #[serde(rename = "ABORT")]
    Abort,
    #[serde(rename = "NOHOSTS")]
    NoHosts,
    #[serde(rename = "NOTFOUND")]
    NotFound,
    #[serde(rename = "CONNECTING", alias = "Connecting")]
    Connecting,
    #[serde(rename = "PROTOCOL")]
    Protocol,
    #[serde(rename = "HANDSHAKE")]
    Handshake,
    #[serde(rename = "CONNECTED", alias = "Connected")]
    Connected,
    #[serde(rename = "CLOSING")]
    Closing,
    #[serde(rename = "LISTENING")]
    Listening,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "REFUSED")]
    Refused,
    #[serde(rename = "VERIFIED")]
    Verified,
    #[serde(rename = "FREE")]
    Free,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ConnectionStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uptime: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub local_relays: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub local_directs: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_relays: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_directs: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_broadcasting: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_relay_full: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_direct_full: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_receiving: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(default, deserialize_with = "null_as_default")]
    pub channel_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ChannelStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub info: ChannelInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub track: Track,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfoResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub info: ChannelInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub track: Track,
}

/// One connection of a channel: its source, a direct listener or a relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConnection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub connection_id: i32,
    /// `"source"`, `"direct"` or `"relay"`.
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub connection_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub send_rate: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recv_rate: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub protocol_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub local_relays: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub local_directs: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_position: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub agent_name: String,
    #[serde(default)]
    pub remote_end_point: Option<EndPoint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub remote_host_status: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub remote_name: String,
}

/// A node of a channel's relay tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRelayTree {
    #[serde(default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub port: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_firewalled: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub local_relays: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub local_directs: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_tracker: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_relay_full: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_direct_full: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_receiving: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_control_full: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<ChannelRelayTree>,
}

impl ChannelRelayTree {
    /// Number of nodes in this subtree, including the node itself.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }
}

/// Relay and direct limits. `max_upstream_rate_per_channel` is read-only on
/// the engine side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_directs: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_directs_per_channel: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_relays: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_relays_per_channel: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_upstream_rate: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_upstream_rate_per_channel: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub level: i32,
}

/// A slice of the engine log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    #[serde(default, deserialize_with = "null_as_default")]
    pub from: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lines: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub log: Vec<String>,
}

/// State of one announced channel on a yellow page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YellowPageChannelStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub channel_id: String,
    /// `"Idle"`, `"Connecting"`, `"Connected"` or `"Error"`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YellowPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub yellow_page_id: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub announce_uri: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channels_uri: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub protocol: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channels: Vec<YellowPageChannelStatus>,
}

/// A channel listed by a yellow page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YpChannel {
    #[serde(default, deserialize_with = "null_as_default")]
    pub yellow_page: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channel_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tracker: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contact_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genre: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bitrate: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub track_title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub album: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub creator: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub track_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub listeners: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relays: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_status_legacy_and_unknown_names() {
        let searching: ChannelStatus = serde_json::from_str(r#"{"status":"SEARCH"}"#).unwrap();
        assert_eq!(searching.status, ConnectionStatus::Searching);

        let unknown: ChannelStatus = serde_json::from_str(r#"{"status":"Teleporting"}"#).unwrap();
        assert_eq!(unknown.status, ConnectionStatus::Unknown);

        let null: ChannelStatus = serde_json::from_str(r#"{"status":null}"#).unwrap();
        assert_eq!(null.status, ConnectionStatus::Unknown);
    }

    #[test]
    fn test_channel_info_null_content_type() {
        let info: ChannelInfo = serde_json::from_str(
            r#"{"name":"テストch","bitrate":0,"contentType":null,"mimeType":"application/octet-stream"}"#,
        )
        .unwrap();
        assert_eq!(info.name, "テストch");
        assert_eq!(info.content_type, "");
        assert_eq!(info.stream_extension(), "");
    }

    #[test]
    fn test_stream_url_uses_container_extension() {
        let info = ChannelInfo {
            content_type: "FLV".into(),
            ..Default::default()
        };
        assert_eq!(
            info.stream_url("A0B184CC8F166FD0BCB9618B74A2CD80", 7144),
            "http://localhost:7144/stream/A0B184CC8F166FD0BCB9618B74A2CD80.flv"
        );

        let mkv = ChannelInfo {
            content_type: "MKV".into(),
            ..Default::default()
        };
        assert!(mkv.stream_url("X", 8144).ends_with("/stream/X.mkv"));
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let settings = Settings {
            max_relays: 2,
            max_upstream_rate: 600,
            ..Default::default()
        };
        let json = serde_json::to_value(settings).unwrap();
        assert_eq!(json["maxRelays"], 2);
        assert_eq!(json["maxUpstreamRate"], 600);
        assert_eq!(json["maxDirectsPerChannel"], 0);
    }

    #[test]
    fn test_relay_tree_counts_nodes() {
        let tree: ChannelRelayTree = serde_json::from_str(
            r#"{"sessionId":"root","version":null,"children":[
                {"sessionId":"a","version":1218,"children":[]},
                {"sessionId":"b","children":[{"sessionId":"c","children":null}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(tree.node_count(), 4);
        assert!(tree.children[1].children[0].children.is_empty());
    }

    #[test]
    fn test_yellow_page_channels() {
        let yp: YellowPage = serde_json::from_str(
            r#"{"yellowPageId":1,"name":"SP","announceUri":"pcp://yp.example/","channelsUri":null,
                "protocol":"pcp","channels":[{"channelId":"AB","status":"Connected"}]}"#,
        )
        .unwrap();
        assert_eq!(yp.channels_uri, "");
        assert_eq!(yp.channels[0].status, "Connected");
    }
}
