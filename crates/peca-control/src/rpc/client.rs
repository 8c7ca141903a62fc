//! Typed JSON-RPC client for the engine API.

use std::sync::Arc;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::request::{Params, RequestIds, RpcRequest};
use super::response::RpcResponse;
use super::types::{
    Channel, ChannelConnection, ChannelInfoResult, ChannelRelayTree, ChannelStatus, Log,
    LogSettings, Settings, Status, VersionInfo, YellowPage, YpChannel,
};
use crate::transport::{HttpTransport, Transport};
use crate::Result;

/// Engine API client over any [`Transport`].
///
/// Cheap to clone; clones share the transport and the request-id counter.
///
/// # Example
///
/// ```rust,ignore
/// use peca_control::RpcClient;
///
/// let client = RpcClient::http("192.168.0.10", 7144)?;
/// for channel in client.get_channels().await? {
///     println!("{} {}", channel.channel_id, channel.info.name);
/// }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    ids: Arc<RequestIds>,
}

impl RpcClient {
    /// Create a client with its own request-id counter.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_request_ids(transport, Arc::new(RequestIds::default()))
    }

    /// Create a client that shares `ids` with other clients of one connection.
    pub fn with_request_ids(transport: Arc<dyn Transport>, ids: Arc<RequestIds>) -> Self {
        Self { transport, ids }
    }

    /// Client for an engine on another host.
    pub fn http(host: &str, port: u16) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(host, port)?)))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Build a request with the next id of this connection.
    pub fn build_request(&self, method: &str, params: Option<Params>) -> RpcRequest {
        RpcRequest::new(method, params, self.ids.next_id())
    }

    /// Send `request` and decode its result.
    pub async fn invoke<T: DeserializeOwned>(&self, request: &RpcRequest) -> Result<T> {
        let body = self.round_trip(request).await?;
        serde_json::from_str::<RpcResponse<T>>(&body)?.into_result()
    }

    /// Send `request` and only check for an error.
    pub async fn invoke_void(&self, request: &RpcRequest) -> Result<()> {
        let body = self.round_trip(request).await?;
        serde_json::from_str::<RpcResponse<IgnoredAny>>(&body)?.check_error()
    }

    async fn round_trip(&self, request: &RpcRequest) -> Result<String> {
        debug!("RPC {} (id {})", request.method, request.id);
        self.transport.execute(request.to_json()?).await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Params>) -> Result<T> {
        let request = self.build_request(method, params);
        self.invoke(&request).await
    }

    async fn call_void(&self, method: &str, params: Option<Params>) -> Result<()> {
        let request = self.build_request(method, params);
        self.invoke_void(&request).await
    }

    /// Uptime, firewall state and endpoints.
    pub async fn get_status(&self) -> Result<Status> {
        self.call("getStatus", None).await
    }

    pub async fn get_version_info(&self) -> Result<VersionInfo> {
        self.call("getVersionInfo", None).await
    }

    pub async fn get_channels(&self) -> Result<Vec<Channel>> {
        self.call("getChannels", None).await
    }

    pub async fn get_channel_status(&self, channel_id: &str) -> Result<ChannelStatus> {
        self.call("getChannelStatus", Some(Params::single(channel_id)))
            .await
    }

    pub async fn get_channel_info(&self, channel_id: &str) -> Result<ChannelInfoResult> {
        self.call("getChannelInfo", Some(Params::single(channel_id)))
            .await
    }

    pub async fn get_channel_connections(&self, channel_id: &str) -> Result<Vec<ChannelConnection>> {
        self.call("getChannelConnections", Some(Params::single(channel_id)))
            .await
    }

    /// Relay tree of a channel; the root is this engine.
    pub async fn get_channel_relay_tree(&self, channel_id: &str) -> Result<Vec<ChannelRelayTree>> {
        self.call("getChannelRelayTree", Some(Params::single(channel_id)))
            .await
    }

    /// Reconnect a channel to its source.
    pub async fn bump_channel(&self, channel_id: &str) -> Result<()> {
        self.call_void("bumpChannel", Some(Params::single(channel_id)))
            .await
    }

    pub async fn stop_channel(&self, channel_id: &str) -> Result<()> {
        self.call_void("stopChannel", Some(Params::single(channel_id)))
            .await
    }

    /// Stop one connection of a channel. Returns whether the engine did.
    pub async fn stop_channel_connection(&self, channel_id: &str, connection_id: i32) -> Result<bool> {
        let params = Params::Array(vec![json!(channel_id), json!(connection_id)]);
        self.call("stopChannelConnection", Some(params)).await
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        self.call("getSettings", None).await
    }

    pub async fn set_settings(&self, settings: &Settings) -> Result<()> {
        let mut params = Map::new();
        params.insert("settings".to_string(), serde_json::to_value(settings)?);
        self.call_void("setSettings", Some(Params::Object(params)))
            .await
    }

    pub async fn get_log_settings(&self) -> Result<LogSettings> {
        self.call("getLogSettings", None).await
    }

    /// The settings object itself is the parameter set.
    pub async fn set_log_settings(&self, settings: &LogSettings) -> Result<()> {
        self.call_void("setLogSettings", Some(Params::named(settings)?))
            .await
    }

    /// Read the engine's log buffer. `None` leaves the bound to the engine.
    pub async fn get_log(&self, from: Option<i32>, max_lines: Option<i32>) -> Result<Vec<Log>> {
        let mut params = Map::new();
        params.insert("from".to_string(), from.map_or(Value::Null, Value::from));
        params.insert(
            "maxLines".to_string(),
            max_lines.map_or(Value::Null, Value::from),
        );
        self.call("getLog", Some(Params::Object(params))).await
    }

    pub async fn clear_log(&self) -> Result<()> {
        self.call_void("clearLog", None).await
    }

    /// Channels listed by the configured yellow pages.
    pub async fn get_yp_channels(&self) -> Result<Vec<YpChannel>> {
        self.call("getYPChannels", None).await
    }

    pub async fn get_yellow_pages(&self) -> Result<Vec<YellowPage>> {
        self.call("getYellowPages", None).await
    }

    pub async fn remove_yellow_page(&self, yellow_page_id: i32) -> Result<()> {
        self.call_void("removeYellowPage", Some(Params::single(yellow_page_id)))
            .await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ControlError, TransportFailure};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every request with a canned response and records requests.
    struct MockRpcBridge {
        response: String,
        requests: Mutex<Vec<Value>>,
    }

    impl MockRpcBridge {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn last_request(&self) -> Value {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Transport for MockRpcBridge {
        async fn execute(&self, request: String) -> Result<String> {
            self.requests
                .lock()
                .unwrap()
                .push(serde_json::from_str(&request).unwrap());
            Ok(self.response.clone())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn execute(&self, _request: String) -> Result<String> {
            Err(ControlError::remote_closed())
        }
    }

    #[tokio::test]
    async fn test_version_info() {
        let bridge = MockRpcBridge::new(
            r#"{"jsonrpc":"2.0","id":6412,"result":{"agentName":"PeerCastStation/2.3.6.0","apiVersion":"1.0.0","jsonrpc":"2.0"}}"#,
        );
        let info = RpcClient::new(bridge.clone()).get_version_info().await.unwrap();

        assert_eq!(info.agent_name, "PeerCastStation/2.3.6.0");
        assert_eq!(info.api_version, "1.0.0");
        assert_eq!(bridge.last_request()["method"], "getVersionInfo");
        assert!(bridge.last_request().get("params").is_none());
    }

    #[tokio::test]
    async fn test_ids_increase_per_client() {
        let bridge = MockRpcBridge::new(r#"{"result":null}"#);
        let client = RpcClient::new(bridge.clone());

        client.clear_log().await.unwrap();
        assert_eq!(bridge.last_request()["id"], 10000);
        client.clear_log().await.unwrap();
        assert_eq!(bridge.last_request()["id"], 10001);
    }

    #[tokio::test]
    async fn test_shared_ids_across_clients() {
        let bridge = MockRpcBridge::new(r#"{"result":null}"#);
        let ids = Arc::new(RequestIds::default());
        let a = RpcClient::with_request_ids(bridge.clone(), Arc::clone(&ids));
        let b = RpcClient::with_request_ids(bridge.clone(), ids);

        a.clear_log().await.unwrap();
        b.clear_log().await.unwrap();
        assert_eq!(bridge.last_request()["id"], 10001);
    }

    #[tokio::test]
    async fn test_stop_channel_connection_params() {
        let bridge = MockRpcBridge::new(r#"{"jsonrpc":"2.0","id":1,"result":true}"#);
        let stopped = RpcClient::new(bridge.clone())
            .stop_channel_connection("AB12", 919361550)
            .await
            .unwrap();

        assert!(stopped);
        assert_eq!(
            bridge.last_request()["params"],
            serde_json::json!(["AB12", 919361550])
        );
    }

    #[tokio::test]
    async fn test_set_settings_wraps_object() {
        let bridge = MockRpcBridge::new(r#"{"result":null}"#);
        let settings = Settings {
            max_relays: 3,
            ..Default::default()
        };
        RpcClient::new(bridge.clone())
            .set_settings(&settings)
            .await
            .unwrap();

        let request = bridge.last_request();
        assert_eq!(request["method"], "setSettings");
        assert_eq!(request["params"]["settings"]["maxRelays"], 3);
    }

    #[tokio::test]
    async fn test_set_log_settings_passes_object_as_params() {
        let bridge = MockRpcBridge::new(r#"{"result":null}"#);
        RpcClient::new(bridge.clone())
            .set_log_settings(&LogSettings { level: 2 })
            .await
            .unwrap();
        assert_eq!(bridge.last_request()["params"], serde_json::json!({"level": 2}));
    }

    #[tokio::test]
    async fn test_get_log_sends_nulls_for_unset_bounds() {
        let bridge = MockRpcBridge::new(r#"{"result":[{"from":0,"lines":1,"log":["boot"]}]}"#);
        let logs = RpcClient::new(bridge.clone())
            .get_log(None, Some(100))
            .await
            .unwrap();

        assert_eq!(logs[0].log, vec!["boot"]);
        assert_eq!(
            bridge.last_request()["params"],
            serde_json::json!({"from": null, "maxLines": 100})
        );
    }

    #[tokio::test]
    async fn test_remove_yellow_page_uses_numeric_param() {
        let bridge = MockRpcBridge::new(r#"{"result":null}"#);
        RpcClient::new(bridge.clone())
            .remove_yellow_page(4)
            .await
            .unwrap();
        assert_eq!(bridge.last_request()["params"], serde_json::json!([4]));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let bridge = MockRpcBridge::new("<html>502</html>");
        let err = RpcClient::new(bridge).get_status().await.unwrap_err();
        assert!(matches!(err, ControlError::ProtocolDecode { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_passes_through() {
        let err = RpcClient::new(Arc::new(FailingTransport))
            .get_channels()
            .await
            .unwrap_err();
        assert_eq!(err.transport_failure(), Some(TransportFailure::RemoteClosed));
    }
}
