// Real-time channel traits
use crate::application::errors::ChannelError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Sub-transport requested at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTransport {
    Primary,
    Secondary,
}

/// Connection lifecycle as reported by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Handler for a server-to-client event; receives the event arguments.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[async_trait]
pub trait ChannelConnection: Send + Sync {
    /// Call a hub method and wait for its completion
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ChannelError>;

    /// Register a handler for a server event. Handlers accumulate.
    fn on(&self, event: &str, handler: EventHandler);

    /// Register a lifecycle handler
    fn on_state_change(&self, handler: StateHandler);

    /// Begin dispatching server messages. Messages that arrive earlier are
    /// held back, so handlers registered before this call see all of them.
    /// Invocations only complete after the connection is started.
    fn start(&self);

    /// Close the connection. Safe to call repeatedly.
    async fn stop(&self);
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        transport: SubTransport,
    ) -> Result<Arc<dyn ChannelConnection>, ChannelError>;
}
