// Hub connection over Server-Sent Events or long polling
use super::protocol::{
    self, FrameBuffer, HubMessage, NegotiateResponse, SseParser, LONG_POLLING_TRANSPORT,
    SSE_TRANSPORT,
};
use super::HubSettings;
use crate::application::channel::{
    ChannelConnection, ConnectionState, EventHandler, StateHandler, SubTransport,
};
use crate::application::credentials::CredentialStore;
use crate::application::errors::ChannelError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type Payloads = BoxStream<'static, Result<Bytes, ChannelError>>;
type Reply = oneshot::Sender<Result<Value, ChannelError>>;

struct PendingCall {
    method: String,
    reply: Reply,
}

/// Frames arriving on the receive side of one physical connection
struct FrameReader {
    payloads: Payloads,
    buffer: FrameBuffer,
    ready: VecDeque<String>,
}

impl FrameReader {
    fn new(payloads: Payloads) -> Self {
        Self {
            payloads,
            buffer: FrameBuffer::default(),
            ready: VecDeque::new(),
        }
    }

    /// `None` when the server ended the stream
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(Ok(frame));
            }
            match self.payloads.next().await? {
                Ok(chunk) => {
                    self.buffer.push(&chunk);
                    while let Some(frame) = self.buffer.next_frame() {
                        self.ready.push_back(frame);
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

struct Shared {
    client: Client,
    settings: HubSettings,
    credentials: Arc<dyn CredentialStore>,
    transport: SubTransport,
    /// Connection token of the current physical connection
    token: Mutex<String>,
    pending: Mutex<HashMap<String, PendingCall>>,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    state_handlers: Mutex<Vec<StateHandler>>,
    next_invocation: AtomicU64,
    stopped: AtomicBool,
}

/// A connected hub. The receive loop begins at `start`; until then frames
/// after the handshake stay queued in the reader.
pub struct HubConnection {
    shared: Arc<Shared>,
    reader: Mutex<Option<FrameReader>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

fn connect_error(e: impl std::fmt::Display) -> ChannelError {
    ChannelError::Connect(e.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn user_query(&self) -> String {
        match self.credentials.user_id() {
            Some(user) => format!("&userId={}", urlencoding::encode(user.as_str())),
            None => String::new(),
        }
    }

    fn connection_url(&self, token: &str) -> String {
        format!(
            "{}?id={}{}",
            self.settings.hub_url,
            urlencoding::encode(token),
            self.user_query()
        )
    }

    fn current_url(&self) -> String {
        let token = lock(&self.token).clone();
        self.connection_url(&token)
    }

    fn transport_name(&self) -> &'static str {
        match self.transport {
            SubTransport::Primary => SSE_TRANSPORT,
            SubTransport::Secondary => LONG_POLLING_TRANSPORT,
        }
    }

    async fn negotiate(&self) -> Result<String, ChannelError> {
        let url = format!(
            "{}/negotiate?negotiateVersion=1{}",
            self.settings.hub_url,
            self.user_query()
        );
        let response = self
            .authorized(self.client.post(url))
            .send()
            .await
            .map_err(connect_error)?;
        if !response.status().is_success() {
            return Err(ChannelError::Connect(format!(
                "negotiate returned {}",
                response.status()
            )));
        }
        let negotiated: NegotiateResponse = response.json().await.map_err(connect_error)?;
        if let Some(error) = negotiated.error.as_deref() {
            return Err(ChannelError::Connect(error.to_string()));
        }
        let transport = self.transport_name();
        if !negotiated.supports(transport) {
            return Err(ChannelError::TransportUnavailable(transport));
        }
        negotiated
            .token()
            .map(str::to_string)
            .ok_or_else(|| ChannelError::Protocol("negotiate returned no connection id".to_string()))
    }

    /// Start the receive side for `token`.
    async fn receive(self: &Arc<Self>, token: &str) -> Result<Payloads, ChannelError> {
        let url = self.connection_url(token);
        match self.transport {
            SubTransport::Primary => {
                let response = self
                    .authorized(self.client.get(&url))
                    .header("Accept", "text/event-stream")
                    .send()
                    .await
                    .map_err(connect_error)?;
                if !response.status().is_success() {
                    return Err(ChannelError::Connect(format!(
                        "event stream returned {}",
                        response.status()
                    )));
                }
                let mut body = response.bytes_stream();
                Ok(async_stream::stream! {
                    let mut parser = SseParser::default();
                    while let Some(chunk) = body.next().await {
                        match chunk {
                            Ok(chunk) => {
                                for data in parser.push(&chunk) {
                                    yield Ok(Bytes::from(data));
                                }
                            }
                            Err(e) => {
                                yield Err(ChannelError::Protocol(e.to_string()));
                                break;
                            }
                        }
                    }
                }
                .boxed())
            }
            SubTransport::Secondary => {
                // The first poll only confirms the connection
                self.poll(&url).await?;
                let shared = Arc::clone(self);
                Ok(async_stream::stream! {
                    loop {
                        match shared.poll(&url).await {
                            Ok(Some(body)) => yield Ok(body),
                            Ok(None) => break,
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                }
                .boxed())
            }
        }
    }

    /// One long poll. `None` once the server has closed the connection.
    async fn poll(&self, url: &str) -> Result<Option<Bytes>, ChannelError> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => response
                .bytes()
                .await
                .map(Some)
                .map_err(|e| ChannelError::Protocol(e.to_string())),
            status => Err(ChannelError::Protocol(format!("poll returned {}", status))),
        }
    }

    async fn send(&self, url: &str, payload: String) -> Result<(), ChannelError> {
        let response = self
            .authorized(self.client.post(url))
            .header("Content-Type", "text/plain;charset=UTF-8")
            .body(payload)
            .send()
            .await
            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Protocol(format!("send returned {}", response.status())));
        }
        Ok(())
    }

    /// Negotiate, open the receive side and complete the handshake.
    async fn establish(self: &Arc<Self>) -> Result<FrameReader, ChannelError> {
        let token = self.negotiate().await?;
        let mut reader = FrameReader::new(self.receive(&token).await?);
        self.send(&self.connection_url(&token), protocol::handshake_request())
            .await?;

        match reader.next_frame().await {
            Some(Ok(frame)) => protocol::parse_handshake_response(&frame)
                .map_err(|e| ChannelError::Connect(format!("handshake rejected: {}", e)))?,
            Some(Err(e)) => return Err(e),
            None => return Err(ChannelError::Connect("closed during handshake".to_string())),
        }

        *lock(&self.token) = token;
        Ok(reader)
    }

    fn notify(&self, state: ConnectionState) {
        let handlers = lock(&self.state_handlers).clone();
        for handler in handlers {
            handler(state);
        }
    }

    fn fail_pending(&self, error: ChannelError) {
        let pending: Vec<PendingCall> = lock(&self.pending).drain().map(|(_, call)| call).collect();
        for call in pending {
            let _ = call.reply.send(Err(error.clone()));
        }
    }

    fn dispatch(&self, message: HubMessage) -> Option<bool> {
        match message {
            HubMessage::Invocation { target, arguments, .. } => {
                let handlers = lock(&self.handlers)
                    .get(&target.to_lowercase())
                    .cloned()
                    .unwrap_or_default();
                if handlers.is_empty() {
                    tracing::debug!("No handler for hub event {}", target);
                }
                for handler in handlers {
                    handler(&arguments);
                }
            }
            HubMessage::Completion { invocation_id, result, error } => {
                let Some(call) = lock(&self.pending).remove(&invocation_id) else {
                    tracing::debug!("Completion for unknown invocation {}", invocation_id);
                    return None;
                };
                let outcome = match error {
                    Some(reason) => Err(ChannelError::Invocation {
                        method: call.method,
                        reason,
                    }),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = call.reply.send(outcome);
            }
            HubMessage::Ping => {}
            HubMessage::Close { error, allow_reconnect } => {
                tracing::info!(
                    "Server closed the hub connection: {}",
                    error.as_deref().unwrap_or("no reason")
                );
                return Some(allow_reconnect);
            }
            HubMessage::Other(kind) => tracing::debug!("Ignoring hub message type {}", kind),
        }
        None
    }

    /// Read until the connection is lost. Returns whether a reconnect is allowed.
    async fn pump(&self, reader: &mut FrameReader) -> bool {
        let period = self.settings.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                frame = reader.next_frame() => match frame {
                    Some(Ok(frame)) => match protocol::parse_message(&frame) {
                        Ok(message) => {
                            if let Some(allow_reconnect) = self.dispatch(message) {
                                return allow_reconnect;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping malformed hub frame: {}", e),
                    },
                    Some(Err(e)) => {
                        tracing::warn!("Hub receive failed: {}", e);
                        return true;
                    }
                    None => {
                        tracing::info!("Hub connection ended by server");
                        return true;
                    }
                },
                _ = keepalive.tick() => {
                    if let Err(e) = self.send(&self.current_url(), protocol::ping()).await {
                        tracing::debug!("Keepalive ping failed: {}", e);
                    }
                }
            }
        }
    }

    async fn reconnect(self: &Arc<Self>) -> Option<FrameReader> {
        self.notify(ConnectionState::Reconnecting);
        for (attempt, delay) in self.settings.reconnect_delays.iter().enumerate() {
            tokio::time::sleep(*delay).await;
            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }
            match tokio::time::timeout(self.settings.connect_timeout, self.establish()).await {
                Ok(Ok(reader)) => {
                    tracing::info!("Hub reconnected after {} attempt(s)", attempt + 1);
                    self.notify(ConnectionState::Connected);
                    return Some(reader);
                }
                Ok(Err(e)) => tracing::warn!("Hub reconnect attempt {} failed: {}", attempt + 1, e),
                Err(_) => tracing::warn!("Hub reconnect attempt {} timed out", attempt + 1),
            }
        }
        None
    }

    async fn run(self: Arc<Self>, mut reader: FrameReader) {
        loop {
            let allow_reconnect = self.pump(&mut reader).await;
            self.fail_pending(ChannelError::Closed);
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let next = if allow_reconnect {
                self.reconnect().await
            } else {
                None
            };
            match next {
                Some(next) => reader = next,
                None => {
                    if !self.stopped.load(Ordering::SeqCst) {
                        self.notify(ConnectionState::Disconnected);
                    }
                    return;
                }
            }
        }
    }
}

impl HubConnection {
    pub async fn open(
        client: Client,
        settings: HubSettings,
        credentials: Arc<dyn CredentialStore>,
        transport: SubTransport,
    ) -> Result<Self, ChannelError> {
        let shared = Arc::new(Shared {
            client,
            settings,
            credentials,
            transport,
            token: Mutex::new(String::new()),
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            state_handlers: Mutex::new(Vec::new()),
            next_invocation: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        });
        let reader = shared.establish().await?;
        tracing::info!("Hub connected via {}", shared.transport_name());
        Ok(Self {
            shared,
            reader: Mutex::new(Some(reader)),
            receiver: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ChannelConnection for HubConnection {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ChannelError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let id = self
            .shared
            .next_invocation
            .fetch_add(1, Ordering::SeqCst)
            .to_string();
        let (reply, outcome) = oneshot::channel();
        lock(&self.shared.pending).insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                reply,
            },
        );

        let payload = protocol::invocation(&id, method, &args);
        if let Err(e) = self.shared.send(&self.shared.current_url(), payload).await {
            lock(&self.shared.pending).remove(&id);
            return Err(ChannelError::Invocation {
                method: method.to_string(),
                reason: e.to_string(),
            });
        }

        match tokio::time::timeout(self.shared.settings.invoke_timeout, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                lock(&self.shared.pending).remove(&id);
                Err(ChannelError::Invocation {
                    method: method.to_string(),
                    reason: "timed out waiting for completion".to_string(),
                })
            }
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        lock(&self.shared.handlers)
            .entry(event.to_lowercase())
            .or_default()
            .push(handler);
    }

    fn on_state_change(&self, handler: StateHandler) {
        lock(&self.shared.state_handlers).push(handler);
    }

    fn start(&self) {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return;
        }
        let Some(reader) = lock(&self.reader).take() else {
            return;
        };
        let receiver = tokio::spawn(Arc::clone(&self.shared).run(reader));
        *lock(&self.receiver) = Some(receiver);
    }

    /// Stopping does not fire state handlers.
    async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(receiver) = lock(&self.receiver).take() {
            receiver.abort();
        }
        *lock(&self.reader) = None;
        self.shared.fail_pending(ChannelError::Closed);

        let url = self.shared.current_url();
        match self.shared.authorized(self.shared.client.delete(url)).send().await {
            Ok(response) => tracing::debug!("Hub connection closed ({})", response.status()),
            Err(e) => tracing::debug!("Hub close request failed: {}", e),
        }
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        if let Some(receiver) = lock(&self.receiver).take() {
            receiver.abort();
        }
    }
}
