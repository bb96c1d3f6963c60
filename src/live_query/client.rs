use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::config::{ParseConfig, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RECONNECT_INTERVAL};
use crate::error::{
    connection_failed, internal_error, not_initialized, usage_error, ParseError, ParseErrorCode,
    ParseResult,
};
use crate::logger::Logger;
use crate::platform::runtime::{sleep, spawn_detached};
use crate::util::{reconnect_interval, Deferred, EventEmitter, ListenerRegistration};

use super::object::{CachedObjectDecoder, ObjectDecoder, ObjectPayload};
use super::protocol::{ClientMessage, EventFrame, EventKind, ServerMessage};
use super::query::LiveQuery;
use super::socket::{SocketEvent, WebSocketConnection, WebSocketFactory};
use super::subscription::{Subscription, SubscriptionEvent};

static LIVE_QUERY_LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@parse/live_query"));

const ADDITIONAL_PROPERTIES_ERROR: &str = "Additional properties not allowed";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientState {
    Initialized,
    Connecting,
    Connected,
    Reconnecting,
    /// Gave up reconnecting; only an explicit `open()` connects again.
    Disconnected,
    /// Closed by the application.
    Closed,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Initialized => "initialized",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Reconnecting => "reconnecting",
            ClientState::Disconnected => "disconnected",
            ClientState::Closed => "closed",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Open,
    Close,
    Error(ParseError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveQueryClientOptions {
    pub application_id: String,
    /// `ws://` or `wss://` endpoint of the LiveQuery server.
    pub server_url: String,
    pub javascript_key: Option<String>,
    pub master_key: Option<String>,
    pub session_token: Option<String>,
    pub installation_id: Option<String>,
    pub max_reconnect_attempts: u32,
    pub max_reconnect_interval: Duration,
}

impl LiveQueryClientOptions {
    pub fn new(application_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            server_url: server_url.into(),
            javascript_key: None,
            master_key: None,
            session_token: None,
            installation_id: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            max_reconnect_interval: DEFAULT_MAX_RECONNECT_INTERVAL,
        }
    }

    pub fn from_config(config: &ParseConfig) -> ParseResult<Self> {
        let server_url = config.live_query_url().ok_or_else(missing_server_url)?;
        Ok(Self {
            application_id: config.application_id.clone(),
            server_url,
            javascript_key: config.javascript_key.clone(),
            master_key: config.master_key.clone(),
            session_token: None,
            installation_id: config.installation_id.clone(),
            max_reconnect_attempts: config.live_query_max_reconnect_attempts,
            max_reconnect_interval: config.live_query_max_reconnect_interval,
        })
    }
}

fn missing_server_url() -> ParseError {
    not_initialized("You need to set a proper Parse LiveQuery server url before using LiveQueryClient")
}

/// Multiplexes live query subscriptions over a single websocket.
///
/// The client reconnects with exponential backoff when the socket drops and
/// replays every tracked subscription, in subscription order, once the server
/// acknowledges the new connection.
#[derive(Clone)]
pub struct LiveQueryClient {
    shared: Arc<ClientShared>,
}

pub(crate) struct ClientShared {
    options: LiveQueryClientOptions,
    socket_factory: Option<Arc<dyn WebSocketFactory>>,
    decoder: Arc<dyn ObjectDecoder>,
    emitter: EventEmitter<ClientEvent>,
    core: Mutex<ClientCore>,
    this: Weak<ClientShared>,
}

struct ClientCore {
    state: ClientState,
    client_id: Option<String>,
    next_request_id: u64,
    subscriptions: BTreeMap<u64, Subscription>,
    /// Subscriptions whose `subscribe` frame went out on the current connection.
    sent_subscribes: HashSet<u64>,
    pending_unsubscribes: BTreeSet<u64>,
    socket: Option<Arc<dyn WebSocketConnection>>,
    /// Bumped whenever the socket is replaced; events of older sockets are ignored.
    generation: u64,
    connect: Arc<Deferred<ParseResult<()>>>,
    attempts: u32,
    additional_properties: bool,
}

impl ClientCore {
    fn send(&self, frame: &ClientMessage) {
        let Some(socket) = &self.socket else {
            return;
        };
        if let Err(err) = socket.send(frame.to_json_string()) {
            LIVE_QUERY_LOGGER.warn(format!("failed to send frame: {err}"));
        }
    }

    fn send_subscribe(&mut self, subscription: &Subscription) {
        self.send(&ClientMessage::Subscribe {
            request_id: subscription.id(),
            query: subscription.query().to_frame(),
            session_token: subscription.session_token().map(str::to_string),
        });
        self.sent_subscribes.insert(subscription.id());
    }

    /// Sends everything that waited for the connection: subscriptions not yet
    /// sent on it, in request order, then queued unsubscriptions.
    fn flush_pending(&mut self) {
        let pending: Vec<Subscription> = self
            .subscriptions
            .values()
            .filter(|subscription| !self.sent_subscribes.contains(&subscription.id()))
            .cloned()
            .collect();
        for subscription in &pending {
            self.send_subscribe(subscription);
        }
        for request_id in std::mem::take(&mut self.pending_unsubscribes) {
            if self.subscriptions.contains_key(&request_id) {
                self.send(&ClientMessage::Unsubscribe { request_id });
            }
        }
    }

    fn drop_socket(&mut self) {
        self.generation += 1;
        self.client_id = None;
        self.sent_subscribes.clear();
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }
}

impl LiveQueryClient {
    pub fn new(
        options: LiveQueryClientOptions,
        socket_factory: Option<Arc<dyn WebSocketFactory>>,
        decoder: Arc<dyn ObjectDecoder>,
    ) -> ParseResult<Self> {
        if options.server_url.trim().is_empty() {
            return Err(missing_server_url());
        }
        if options.application_id.trim().is_empty() {
            return Err(not_initialized(
                "You need to set an application id before using LiveQueryClient",
            ));
        }

        let shared = Arc::new_cyclic(|this| ClientShared {
            options,
            socket_factory,
            decoder,
            emitter: EventEmitter::new(),
            core: Mutex::new(ClientCore {
                state: ClientState::Initialized,
                client_id: None,
                next_request_id: 1,
                subscriptions: BTreeMap::new(),
                sent_subscribes: HashSet::new(),
                pending_unsubscribes: BTreeSet::new(),
                socket: None,
                generation: 0,
                connect: Arc::new(Deferred::new()),
                attempts: 0,
                additional_properties: true,
            }),
            this: this.clone(),
        });
        Ok(Self { shared })
    }

    /// Client for the configured LiveQuery endpoint using the platform socket
    /// implementation and a [`CachedObjectDecoder`].
    pub fn from_config(config: &ParseConfig) -> ParseResult<Self> {
        let options = LiveQueryClientOptions::from_config(config)?;
        Self::new(options, default_socket_factory(), Arc::new(CachedObjectDecoder::new()))
    }

    pub fn options(&self) -> &LiveQueryClientOptions {
        &self.shared.options
    }

    pub fn state(&self) -> ClientState {
        self.shared.core.lock().unwrap().state
    }

    /// Client id assigned by the server for the current connection.
    pub fn client_id(&self) -> Option<String> {
        self.shared.core.lock().unwrap().client_id.clone()
    }

    pub fn should_open(&self) -> bool {
        self.state() == ClientState::Initialized
    }

    pub fn on<F>(&self, listener: F) -> ListenerRegistration
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.emitter.on(listener)
    }

    /// Opens the socket unless it is already connecting or connected.
    ///
    /// Without a socket implementation an [`ClientEvent::Error`] is emitted
    /// instead of failing.
    pub fn open(&self) {
        {
            let mut core = self.shared.core.lock().unwrap();
            if core.state == ClientState::Disconnected {
                core.attempts = 0;
            }
        }
        self.shared.connect_socket();
    }

    /// Waits for the server to acknowledge the current connection attempt.
    pub async fn wait_connected(&self) -> ParseResult<()> {
        let connect = self.shared.core.lock().unwrap().connect.clone();
        connect
            .wait()
            .await
            .unwrap_or_else(|| Err(internal_error("connection attempt abandoned")))
    }

    /// Registers `query` and returns its subscription right away; the
    /// `subscribe` frame is sent as soon as the connection is established.
    pub fn subscribe(&self, query: LiveQuery, session_token: Option<String>) -> Subscription {
        let (subscription, should_open) = {
            let mut core = self.shared.core.lock().unwrap();
            let request_id = core.next_request_id;
            core.next_request_id += 1;
            let subscription =
                Subscription::new(request_id, query, session_token, self.shared.this.clone());
            core.subscriptions.insert(request_id, subscription.clone());
            if core.state == ClientState::Connected {
                core.send_subscribe(&subscription);
            }
            (subscription, core.state == ClientState::Initialized)
        };

        if should_open {
            self.open();
        }
        subscription
    }

    /// Asks the server to drop `subscription`; it leaves the table once the
    /// server acknowledges.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.shared.unsubscribe(subscription);
    }

    /// Sends `subscribe` again for every tracked subscription, in request order.
    pub fn resubscribe(&self) {
        let mut core = self.shared.core.lock().unwrap();
        core.sent_subscribes.clear();
        if core.state == ClientState::Connected {
            core.flush_pending();
        }
    }

    /// Tracked subscriptions in request order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared
            .core
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .cloned()
            .collect()
    }

    /// Closes the socket and forgets every subscription. Each subscription and
    /// then the client emit `Close`.
    pub fn close(&self) {
        let subscriptions = {
            let mut core = self.shared.core.lock().unwrap();
            if matches!(core.state, ClientState::Initialized | ClientState::Closed) {
                return;
            }
            core.state = ClientState::Closed;
            core.drop_socket();
            core.attempts = 0;
            core.pending_unsubscribes.clear();
            std::mem::take(&mut core.subscriptions)
        };

        for subscription in subscriptions.values() {
            subscription.mark_closed();
            subscription.emit(SubscriptionEvent::Close);
        }
        self.shared.emitter.emit(&ClientEvent::Close);
    }
}

impl std::fmt::Debug for LiveQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQueryClient")
            .field("server_url", &self.shared.options.server_url)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn default_socket_factory() -> Option<Arc<dyn WebSocketFactory>> {
    Some(Arc::new(super::socket::TungsteniteSocketFactory::new()))
}

#[cfg(target_arch = "wasm32")]
fn default_socket_factory() -> Option<Arc<dyn WebSocketFactory>> {
    None
}

impl ClientShared {
    fn connect_socket(&self) {
        let mut core = self.core.lock().unwrap();
        if matches!(core.state, ClientState::Connecting | ClientState::Connected) {
            return;
        }
        let Some(factory) = self.socket_factory.clone() else {
            drop(core);
            self.emitter.emit(&ClientEvent::Error(usage_error(
                "Can not find WebSocket implementation for LiveQuery",
            )));
            return;
        };

        if core.connect.is_settled() {
            core.connect = Arc::new(Deferred::new());
        }
        core.drop_socket();
        core.state = ClientState::Connecting;
        let generation = core.generation;

        let (events_tx, events_rx) = async_channel::unbounded();
        match factory.open(&self.options.server_url, events_tx) {
            Ok(socket) => {
                core.socket = Some(socket);
                drop(core);
                self.spawn_pump(generation, events_rx);
            }
            Err(err) => {
                drop(core);
                self.handle_socket_failure(generation, err);
            }
        }
    }

    fn spawn_pump(&self, generation: u64, events: async_channel::Receiver<SocketEvent>) {
        let this = self.this.clone();
        spawn_detached(async move {
            while let Ok(event) = events.recv().await {
                let Some(shared) = this.upgrade() else {
                    break;
                };
                if !shared.handle_socket_event(generation, event) {
                    break;
                }
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        let core = self.core.lock().unwrap();
        core.generation == generation && core.state != ClientState::Closed
    }

    /// Returns `false` once the socket that produced the event was superseded.
    fn handle_socket_event(&self, generation: u64, event: SocketEvent) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match event {
            SocketEvent::Open => self.send_connect(),
            SocketEvent::Message(text) => self.handle_message(&text),
            SocketEvent::Close => self.handle_socket_closed(generation),
            SocketEvent::Error(reason) => {
                self.handle_socket_failure(generation, connection_failed(reason))
            }
        }
        true
    }

    fn send_connect(&self) {
        let core = self.core.lock().unwrap();
        let installation_id = if core.additional_properties {
            self.options.installation_id.clone()
        } else {
            None
        };
        core.send(&ClientMessage::Connect {
            application_id: self.options.application_id.clone(),
            javascript_key: self.options.javascript_key.clone(),
            master_key: self.options.master_key.clone(),
            session_token: self.options.session_token.clone(),
            installation_id,
        });
    }

    fn handle_message(&self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                LIVE_QUERY_LOGGER.debug(format!("dropping malformed frame: {err}"));
                return;
            }
        };

        match message {
            ServerMessage::Connected { client_id } => self.handle_connected(client_id),
            ServerMessage::Subscribed { request_id } => self.handle_subscribed(request_id),
            ServerMessage::Unsubscribed { request_id } => self.handle_unsubscribed(request_id),
            ServerMessage::Error {
                code,
                error,
                request_id,
                reconnect,
            } => self.handle_server_error(code, error, request_id, reconnect),
            ServerMessage::Create(frame) => self.handle_object_event(EventKind::Create, frame),
            ServerMessage::Update(frame) => self.handle_object_event(EventKind::Update, frame),
            ServerMessage::Enter(frame) => self.handle_object_event(EventKind::Enter, frame),
            ServerMessage::Leave(frame) => self.handle_object_event(EventKind::Leave, frame),
            ServerMessage::Delete(frame) => self.handle_object_event(EventKind::Delete, frame),
            ServerMessage::Unknown => LIVE_QUERY_LOGGER.debug("dropping frame with unknown op"),
        }
    }

    fn handle_connected(&self, client_id: Option<String>) {
        let connect = {
            let mut core = self.core.lock().unwrap();
            core.state = ClientState::Connected;
            core.client_id = client_id;
            core.attempts = 0;
            core.flush_pending();
            core.connect.clone()
        };
        connect.settle(Ok(()));
        self.emitter.emit(&ClientEvent::Open);
    }

    fn subscription(&self, request_id: u64) -> Option<Subscription> {
        let subscription = self
            .core
            .lock()
            .unwrap()
            .subscriptions
            .get(&request_id)
            .cloned();
        if subscription.is_none() {
            LIVE_QUERY_LOGGER.debug(format!("no subscription for request {request_id}"));
        }
        subscription
    }

    fn handle_subscribed(&self, request_id: u64) {
        let Some(subscription) = self.subscription(request_id) else {
            return;
        };
        subscription.mark_subscribed();
        // Emitted on the next tick so callers can attach listeners first.
        spawn_detached(async move {
            subscription.emit(SubscriptionEvent::Open);
        });
    }

    fn handle_unsubscribed(&self, request_id: u64) {
        let removed = {
            let mut core = self.core.lock().unwrap();
            core.sent_subscribes.remove(&request_id);
            core.subscriptions.remove(&request_id)
        };
        let Some(subscription) = removed else {
            LIVE_QUERY_LOGGER.debug(format!("no subscription for request {request_id}"));
            return;
        };
        subscription.mark_unsubscribed();
        subscription.emit(SubscriptionEvent::Close);
    }

    fn handle_server_error(
        &self,
        code: Option<i64>,
        error: JsonValue,
        request_id: Option<u64>,
        reconnect: bool,
    ) {
        let message = match error {
            JsonValue::String(text) => text,
            JsonValue::Null => "LiveQuery server error".to_string(),
            other => other.to_string(),
        };
        let code = code
            .and_then(|code| i32::try_from(code).ok())
            .map(ParseErrorCode::from_i32)
            .unwrap_or(ParseErrorCode::OtherCause);
        let error = ParseError::new(code, message);

        if reconnect || error.message() == ADDITIONAL_PROPERTIES_ERROR {
            self.core.lock().unwrap().additional_properties = false;
        }

        match request_id {
            Some(request_id) => {
                if let Some(subscription) = self.subscription(request_id) {
                    subscription.reject(error.clone());
                    spawn_detached(async move {
                        subscription.emit(SubscriptionEvent::Error(error));
                    });
                }
            }
            None => {
                let connect = {
                    let mut core = self.core.lock().unwrap();
                    if core.state == ClientState::Connecting && !reconnect {
                        core.state = ClientState::Disconnected;
                        core.drop_socket();
                    }
                    core.connect.clone()
                };
                connect.settle(Err(error.clone()));
                self.emitter.emit(&ClientEvent::Error(error));
            }
        }

        if reconnect {
            self.handle_reconnect();
        }
    }

    fn handle_object_event(&self, kind: EventKind, frame: EventFrame) {
        let Some(subscription) = self.subscription(frame.request_id) else {
            return;
        };
        let query = subscription.query();

        let EventFrame {
            object: mut object_json,
            original,
            ..
        } = frame;
        object_json.remove("__type");
        query.mask(&mut object_json);

        let (object, original) = match original {
            Some(mut original_json) => {
                original_json.remove("__type");
                query.mask(&mut original_json);
                let unset: Vec<String> = original_json
                    .keys()
                    .filter(|field| !object_json.contains_key(*field))
                    .cloned()
                    .collect();
                let object = self.decoder.from_json(
                    ObjectPayload {
                        json: object_json,
                        unset,
                    },
                    false,
                );
                let original = self
                    .decoder
                    .from_json(ObjectPayload::new(original_json), true);
                // The override above replaced the cached state with the original.
                if let JsonValue::Object(merged) = object.to_json() {
                    self.decoder.from_json(ObjectPayload::new(merged), true);
                }
                (object, Some(original))
            }
            None => (
                self.decoder
                    .from_json(ObjectPayload::new(object_json), false),
                None,
            ),
        };

        let event = match kind {
            EventKind::Create => SubscriptionEvent::Create(object),
            EventKind::Update => SubscriptionEvent::Update { object, original },
            EventKind::Enter => SubscriptionEvent::Enter { object, original },
            EventKind::Leave => SubscriptionEvent::Leave { object, original },
            EventKind::Delete => SubscriptionEvent::Delete(object),
        };
        subscription.emit(event);
    }

    fn handle_socket_closed(&self, generation: u64) {
        let subscriptions = {
            let core = self.core.lock().unwrap();
            if core.generation != generation || core.state == ClientState::Closed {
                return;
            }
            core.subscriptions.values().cloned().collect::<Vec<_>>()
        };

        self.emitter.emit(&ClientEvent::Close);
        for subscription in &subscriptions {
            subscription.mark_closed();
            subscription.emit(SubscriptionEvent::Close);
        }
        self.handle_reconnect();
    }

    fn handle_socket_failure(&self, generation: u64, error: ParseError) {
        let subscriptions = {
            let core = self.core.lock().unwrap();
            if core.generation != generation || core.state == ClientState::Closed {
                return;
            }
            core.subscriptions.values().cloned().collect::<Vec<_>>()
        };

        self.emitter.emit(&ClientEvent::Error(error.clone()));
        for subscription in &subscriptions {
            subscription.emit(SubscriptionEvent::Error(error.clone()));
        }
        self.handle_reconnect();
    }

    fn handle_reconnect(&self) {
        let (delay, generation, attempt) = {
            let mut core = self.core.lock().unwrap();
            if matches!(core.state, ClientState::Closed | ClientState::Disconnected) {
                return;
            }
            core.drop_socket();
            if core.attempts >= self.options.max_reconnect_attempts {
                core.state = ClientState::Disconnected;
                LIVE_QUERY_LOGGER.warn(format!(
                    "giving up on {} after {} reconnect attempts",
                    self.options.server_url, core.attempts
                ));
                return;
            }
            core.attempts += 1;
            core.state = ClientState::Reconnecting;
            let delay = reconnect_interval(core.attempts, self.options.max_reconnect_interval);
            (delay, core.generation, core.attempts)
        };

        LIVE_QUERY_LOGGER.info(format!("reconnect attempt {attempt} in {delay:?}"));
        let this = self.this.clone();
        spawn_detached(async move {
            sleep(delay).await;
            let Some(shared) = this.upgrade() else {
                return;
            };
            let still_waiting = {
                let core = shared.core.lock().unwrap();
                core.state == ClientState::Reconnecting && core.generation == generation
            };
            if still_waiting {
                shared.connect_socket();
            }
        });
    }

    pub(crate) fn unsubscribe(&self, subscription: &Subscription) {
        let mut core = self.core.lock().unwrap();
        let tracked = core
            .subscriptions
            .get(&subscription.id())
            .is_some_and(|entry| entry.same_as(subscription));
        if !tracked {
            return;
        }
        subscription.request_unsubscribe();
        let request_id = subscription.id();
        if core.state == ClientState::Connected {
            core.send(&ClientMessage::Unsubscribe { request_id });
        } else {
            core.pending_unsubscribes.insert(request_id);
        }
    }
}
