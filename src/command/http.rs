//! HTTP command sender for robots on WiFi

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use robot_link_shared::{LinkError, RobotCommand, Transport};
use std::time::Duration;
use tracing::debug;

use super::report::CommandReply;
use super::sender::CommandSender;
use crate::config::WifiConfig;
use crate::wifi::NetworkHandle;

/// Issues `GET http://<target><endpoint>` requests pinned to the robot's network
pub struct HttpCommandSender {
    client: Client,
    base_url: String,
}

impl HttpCommandSender {
    /// Build a sender for `target` (`ip:port`), bound to `network` when it is pinned
    pub fn new(
        target: &str,
        network: Option<&NetworkHandle>,
        config: &WifiConfig,
    ) -> Result<Self, LinkError> {
        let mut builder = Client::builder()
            .connect_timeout(config.http_connect_timeout)
            .read_timeout(config.http_read_timeout)
            .timeout(request_budget(config))
            .no_proxy();
        if let Some(network) = network {
            builder = bind_to_network(builder, network);
        }
        let client = builder
            .build()
            .map_err(|e| LinkError::Unsupported(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("http://{}", target.trim_end_matches('/')),
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

#[async_trait]
impl CommandSender for HttpCommandSender {
    fn transport(&self) -> Transport {
        Transport::Wifi
    }

    fn target(&self, label: &str) -> String {
        self.url(label)
    }

    async fn send(&self, command: &RobotCommand) -> Result<CommandReply, LinkError> {
        let url = self.url(&command.wifi_endpoint()?);
        debug!("[CMD] GET {}", url);

        let response = self.client.get(&url).send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        debug!("[CMD] {} -> HTTP {}", url, status);
        Ok(CommandReply::Http { status, body })
    }
}

fn bind_to_network(builder: ClientBuilder, network: &NetworkHandle) -> ClientBuilder {
    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    if let Some(interface) = &network.interface {
        return builder.interface(interface);
    }
    match network.local_addr {
        Some(addr) => builder.local_address(addr),
        None => builder,
    }
}

fn classify(err: reqwest::Error) -> LinkError {
    if err.is_timeout() || timed_out_io(&err) {
        LinkError::Timeout(err.to_string())
    } else if err.is_connect() {
        LinkError::ConnectFailed(err.to_string())
    } else {
        LinkError::Io(err.to_string())
    }
}

/// Per-read timeouts surface as an io error somewhere in the source chain
fn timed_out_io(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Outer bound for one request: connect plus read
pub fn request_budget(config: &WifiConfig) -> Duration {
    config.http_connect_timeout + config.http_read_timeout
}
