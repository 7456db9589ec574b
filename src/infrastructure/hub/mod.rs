// Real-time hub channel client
mod connection;
mod protocol;

pub use connection::HubConnection;

use crate::application::channel::{ChannelConnection, ChannelConnector, SubTransport};
use crate::application::credentials::CredentialStore;
use crate::application::errors::ChannelError;
use crate::infrastructure::config::{join_url, RealtimeSettings};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub hub_url: String,
    pub connect_timeout: Duration,
    pub invoke_timeout: Duration,
    pub reconnect_delays: Vec<Duration>,
    pub keepalive_interval: Duration,
}

impl HubSettings {
    pub fn from_config(base_url: &str, realtime: &RealtimeSettings) -> Self {
        Self {
            hub_url: join_url(base_url, &realtime.hub_path),
            connect_timeout: Duration::from_secs(realtime.connect_timeout_secs),
            invoke_timeout: Duration::from_secs(realtime.invoke_timeout_secs),
            reconnect_delays: realtime
                .reconnect_delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// Opens hub connections over HTTP sub-transports.
///
/// The client must not carry a total request timeout: the event stream
/// and long polls stay open far longer than a REST call.
pub struct HubConnector {
    client: Client,
    settings: HubSettings,
    credentials: Arc<dyn CredentialStore>,
}

impl HubConnector {
    pub fn new(client: Client, settings: HubSettings, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            settings,
            credentials,
        }
    }
}

#[async_trait]
impl ChannelConnector for HubConnector {
    async fn connect(
        &self,
        transport: SubTransport,
    ) -> Result<Arc<dyn ChannelConnection>, ChannelError> {
        tracing::info!("Connecting to {} via {:?}", self.settings.hub_url, transport);
        let connect = HubConnection::open(
            self.client.clone(),
            self.settings.clone(),
            self.credentials.clone(),
            transport,
        );
        match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(connection)) => Ok(Arc::new(connection)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ChannelError::Connect(format!(
                "no handshake within {:?}",
                self.settings.connect_timeout
            ))),
        }
    }
}
