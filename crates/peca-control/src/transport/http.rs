//! Transport to an engine on another host over HTTP.

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, warn};
use url::Url;

use super::Transport;
use crate::config::{HttpTransportConfig, NetworkConfig};
use crate::{ControlError, Result};

/// Posts each request to `http://host:port/api/1`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport with default timeouts.
    ///
    /// `host` must be non-empty and `port` at least 1025.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_config(host, port, HttpTransportConfig::default())
    }

    pub fn with_config(host: &str, port: u16, config: HttpTransportConfig) -> Result<Self> {
        let invalid = || ControlError::InvalidEndpoint {
            host: host.to_string(),
            port,
        };

        if host.trim().is_empty() || port < NetworkConfig::MIN_PORT {
            return Err(invalid());
        }

        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let endpoint = Url::parse(&format!("http://{}{}", authority, NetworkConfig::API_PATH))
            .map_err(|_| invalid())?;

        Self::from_url(endpoint, config)
    }

    /// Create a transport for an explicit endpoint URL.
    pub fn from_url(endpoint: Url, config: HttpTransportConfig) -> Result<Self> {
        // The read deadline applies to each read, so a slow but live engine is
        // not cut off mid-response.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(config.user_agent)
            .no_proxy()
            .build()
            .map_err(|e| ControlError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        debug!("HTTP transport for {}", endpoint);
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: String) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .header("X-Requested-With", "XMLHttpRequest")
            .body(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // The body may still hold a JSON-RPC error document.
            warn!("Engine at {} answered HTTP {}", self.endpoint, status);
        }

        Ok(response.text().await?)
    }
}
