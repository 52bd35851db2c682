//! Game server connection.
//!
//! A [`Connection`] owns the websocket, the sequence counter, the heartbeat
//! and the correlation table. It is driven by its owner through
//! [`Connection::next_event`]; replies that match a callback are handed back
//! as [`ConnectionEvent::Dispatch`] so the owner can invoke them with mutable
//! access to itself.

use crate::correlation::{Callback, CorrelationTable, Handler, Route};
use crate::error::ClientError;
use crate::http::DESKTOP_USER_AGENT;
use crate::stream::{ClientStream, Endpoint};
use crate::tls::create_tls_connector;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use warbot_protocol::{Decoder, Document, Encoder, Message, RequestId, Session, ValueExt};

/// Grace period for the server to acknowledge a close before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<ClientStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `Origin` header sent with the websocket handshake.
    pub origin: String,
    /// Timeout for TCP connect, TLS and websocket handshake together.
    pub connect_timeout: Duration,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// User agent sent in the handshake and in the login arguments.
    pub user_agent: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            origin: "https://warh5.rivergame.net".to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            user_agent: DESKTOP_USER_AGENT.to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Login sent, awaiting the reply.
    Authenticating,
    Active,
    /// Close requested, waiting for the transport to finish.
    Closing,
}

/// Gives callbacks access to the connection stored inside their owner.
pub trait ConnectionOwner: Sized + 'static {
    fn connection(&mut self) -> Option<&mut Connection<Self>>;
}

/// Something the owner has to act on.
pub enum ConnectionEvent<C> {
    /// A reply matched a callback or standing handler.
    Dispatch { route: Route<C>, data: Document },
    /// The login reply arrived and the account is usable.
    Authenticated,
    /// The transport closed and no hand-off is pending.
    Closed { by_server: bool },
}

impl<C> std::fmt::Debug for ConnectionEvent<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionEvent::Dispatch { route, .. } => write!(f, "Dispatch({:?})", route),
            ConnectionEvent::Authenticated => f.write_str("Authenticated"),
            ConnectionEvent::Closed { by_server } => {
                write!(f, "Closed {{ by_server: {} }}", by_server)
            }
        }
    }
}

/// Pending reconnect to another endpoint.
struct Handoff {
    session: Session,
    /// Whether the new session replaces the current one.
    adopt: bool,
}

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

enum Wake {
    Message(Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>),
    Heartbeat,
    CloseTimeout,
}

/// A connection to a game server shard.
pub struct Connection<C> {
    config: ConnectionConfig,
    connector: TlsConnector,
    version: String,
    session: Session,
    state: ConnectionState,
    writer: Option<mpsc::UnboundedSender<Outgoing>>,
    reader: Option<SplitStream<WsStream>>,
    decoder: Decoder,
    table: CorrelationTable<C>,
    ready: VecDeque<ConnectionEvent<C>>,
    next_sequence: i32,
    heartbeat: Interval,
    close_deadline: Option<Instant>,
    last_request: Instant,
    last_server_time_ms: i64,
    user_info: Document,
    army_buildings: BTreeMap<String, String>,
    handoff: Option<Handoff>,
    closed_by_server: bool,
}

impl<C> Connection<C> {
    /// Opens the websocket for `session` and sends the login request.
    pub async fn connect(
        config: ConnectionConfig,
        version: impl Into<String>,
        session: Session,
    ) -> Result<Self, ClientError> {
        let period = config.heartbeat_interval;
        let mut conn = Self {
            config,
            connector: create_tls_connector(),
            version: version.into(),
            session: session.clone(),
            state: ConnectionState::Disconnected,
            writer: None,
            reader: None,
            decoder: Decoder::new(),
            table: CorrelationTable::new(),
            ready: VecDeque::new(),
            next_sequence: 0,
            heartbeat: interval_at(Instant::now() + period, period),
            close_deadline: None,
            last_request: Instant::now(),
            last_server_time_ms: 0,
            user_info: Document::new(),
            army_buildings: BTreeMap::new(),
            handoff: None,
            closed_by_server: false,
        };
        conn.open(&session).await?;
        Ok(conn)
    }

    async fn open(&mut self, target: &Session) -> Result<(), ClientError> {
        self.state = ConnectionState::Connecting;
        self.next_sequence = 0;
        self.decoder.clear();
        self.table.clear_pending();
        self.ready.clear();
        self.close_deadline = None;
        self.closed_by_server = false;

        let url = target.endpoint();
        tracing::info!("Connecting to S{} at {}", target.server_id, target.server_url);

        let handshake = handshake(&self.config, &self.connector, &url);
        let ws = match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(ClientError::Timeout);
            }
        };

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(sink, rx));
        self.writer = Some(tx);
        self.reader = Some(stream);
        self.state = ConnectionState::Authenticating;

        let period = self.config.heartbeat_interval;
        self.heartbeat = interval_at(Instant::now() + period, period);
        self.heartbeat
            .set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.send_login();
        Ok(())
    }

    fn send_login(&mut self) {
        let server_id = if self.user_info.get("isCross").int() == 1 {
            self.user_info.get("sid").int()
        } else {
            i64::from(self.session.server_id)
        };
        let args = json!({
            "token": self.session.auth_token,
            "platformVer": self.version,
            "appVersion": self.version,
            "pbClientVer": self.version,
            "serverId": server_id,
            "serverInfoToken": self.session.auth_token,
            "temp_id": self.session.device_temp_id,
            "ua": self.config.user_agent,
            "country": "CN",
            "lang": "zh_cn",
            "nationalFlag": 48,
            "ip": "0",
            "pf": "web_pc",
            "platform": "webgame",
            "channel": "webgame_webgameCn",
            "containerType": "web",
            "gaid": "",
            "share_uid": "",
            "itemId": "",
            "rvflag": 0,
            "launchPrams": r#"{"query":{"channel":"webgame_webgameCn"}}"#,
        });
        if let Err(e) = self.send(RequestId::LOGIN, Document::from(args)) {
            tracing::warn!("Failed to send login: {}", e);
        }
    }

    /// Sends a request whose reply is handed to `callback`.
    ///
    /// Returns the assigned sequence number. A reply with an error status
    /// never reaches the callback.
    pub fn request<F>(
        &mut self,
        request_id: RequestId,
        data: Document,
        callback: F,
    ) -> Result<i32, ClientError>
    where
        F: FnOnce(&mut C, &Document) + 'static,
    {
        self.send_request(request_id, data, Some(Box::new(callback)))
    }

    /// Sends a request without waiting for its reply.
    pub fn send(&mut self, request_id: RequestId, data: Document) -> Result<i32, ClientError> {
        self.send_request(request_id, data, None)
    }

    /// Registers a standing handler for replies and pushes with `request_id`.
    pub fn register<F>(&mut self, request_id: RequestId, handler: F)
    where
        F: Fn(&mut C, &Document) + 'static,
    {
        let handler: Handler<C> = Rc::new(handler);
        self.table.register(request_id, handler);
    }

    fn send_request(
        &mut self,
        request_id: RequestId,
        data: Document,
        callback: Option<Callback<C>>,
    ) -> Result<i32, ClientError> {
        let writer = match &self.writer {
            Some(writer) if self.is_open() => writer,
            _ => return Err(ClientError::NotConnected),
        };

        let sequence = self.next_sequence.wrapping_add(1);
        let encoded = Encoder::encode_message(&Message::new(request_id, sequence, data))?;
        writer
            .send(Outgoing::Frame(encoded.to_vec()))
            .map_err(|_| ClientError::ConnectionClosed)?;

        self.next_sequence = sequence;
        if let Some(callback) = callback {
            self.table.insert_pending(sequence, callback);
        }
        if request_id != RequestId::NO_QUEUE_HEART {
            self.last_request = Instant::now();
        }
        tracing::debug!("Sent {} seq={}", request_id, sequence);
        Ok(sequence)
    }

    /// Asks the transport to close and drops any pending hand-off. A
    /// [`ConnectionEvent::Closed`] follows.
    pub fn close(&mut self) {
        self.handoff = None;
        match &self.writer {
            Some(writer) => {
                let _ = writer.send(Outgoing::Close);
                self.state = ConnectionState::Closing;
                self.close_deadline = Some(Instant::now() + CLOSE_TIMEOUT);
            }
            None => self.state = ConnectionState::Disconnected,
        }
    }

    /// Closes and reconnects to `session`'s endpoint, adopting the session.
    pub fn begin_handoff(&mut self, session: Session) {
        tracing::info!(
            "{} switching to S{} at {}",
            self.describe(),
            session.server_id,
            session.server_url
        );
        self.close();
        self.handoff = Some(Handoff {
            session,
            adopt: true,
        });
    }

    /// Waits for the next event.
    ///
    /// Heartbeats and hand-off reconnects are handled internally. Returns
    /// `Closed` immediately once the transport is gone. Cancel safe: a
    /// hand-off interrupted mid-handshake is retried by the next call.
    pub async fn next_event(&mut self) -> ConnectionEvent<C> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return event;
            }
            if self.reader.is_none() {
                match self.resume_handoff().await {
                    Some(event) => return event,
                    None => continue,
                }
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            let heartbeat_enabled = self.state != ConnectionState::Closing;
            let close_deadline = self.close_deadline;
            let wake = tokio::select! {
                message = reader.next() => Wake::Message(message),
                _ = self.heartbeat.tick(), if heartbeat_enabled => Wake::Heartbeat,
                _ = sleep_until_opt(close_deadline) => Wake::CloseTimeout,
            };

            match wake {
                Wake::Heartbeat => {
                    if let Err(e) = self.send(RequestId::NO_QUEUE_HEART, Document::new()) {
                        tracing::debug!("Heartbeat not sent: {}", e);
                    }
                }
                Wake::Message(Some(Ok(WsMessage::Binary(data)))) => self.receive(&data),
                Wake::Message(Some(Ok(WsMessage::Close(frame)))) => {
                    tracing::debug!("Websocket close frame: {:?}", frame);
                    self.finish_close();
                }
                Wake::Message(Some(Ok(_))) => {}
                Wake::Message(Some(Err(e))) => {
                    tracing::debug!("Websocket error: {}", e);
                    self.finish_close();
                }
                Wake::Message(None) | Wake::CloseTimeout => self.finish_close(),
            }
        }
    }

    fn finish_close(&mut self) {
        self.reader = None;
        self.writer = None;
        self.table.clear_pending();
        self.decoder.clear();
        self.close_deadline = None;
        self.state = ConnectionState::Disconnected;

        if self.closed_by_server {
            tracing::info!("{} connection closed by server", self.describe());
        } else if self.warzone() != 0 {
            tracing::info!("{} disconnected", self.describe());
        }
    }

    /// Opens the pending hand-off target, or reports the close when there is
    /// none. The hand-off is only cleared once the handshake has finished.
    async fn resume_handoff(&mut self) -> Option<ConnectionEvent<C>> {
        let Some(handoff) = self.handoff.as_ref() else {
            return Some(ConnectionEvent::Closed {
                by_server: self.closed_by_server,
            });
        };
        let target = handoff.session.clone();
        if handoff.adopt {
            self.session = target.clone();
        }

        let result = self.open(&target).await;
        self.handoff = None;
        match result {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Hand-off to {} failed: {}", target.server_url, e);
                Some(ConnectionEvent::Closed { by_server: false })
            }
        }
    }

    fn receive(&mut self, data: &[u8]) {
        self.decoder.extend(data);
        loop {
            match self.decoder.decode_message() {
                Ok(Some(message)) => self.process(message),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Dropping malformed frame: {}", e);
                    self.decoder.clear();
                    break;
                }
            }
        }
    }

    fn process(&mut self, message: Message) {
        let sequence = message.sequence;
        let kind = message.kind();
        let Some(reply) = message.into_reply() else {
            tracing::warn!("Dropping {} seq={}: unsupported payload format", kind, sequence);
            return;
        };
        if let Some(t) = reply.server_time_ms {
            self.last_server_time_ms = t;
        }
        if reply.is_error() {
            self.table.discard(sequence);
            tracing::debug!(
                "Error reply for {} seq={} status={}: {}",
                kind,
                sequence,
                reply.status,
                String::from_utf8_lossy(&reply.data.to_vec())
            );
            return;
        }

        let route = self.table.route(sequence, reply.request_id);
        if !matches!(route, Route::Pending(_)) {
            match kind {
                RequestId::LOGIN => {
                    self.on_login(reply.data);
                    return;
                }
                RequestId::USER_DISCONNECT => {
                    self.closed_by_server = true;
                    self.close();
                    return;
                }
                RequestId::PUSH_RESOURCE => {
                    self.user_info.set("resource", reply.data.clone().into_value());
                }
                RequestId::BUILDING_INFO_LIST => self.update_buildings(&reply.data),
                _ => {}
            }
        }

        if route.is_unmatched() {
            tracing::debug!("Unhandled {} seq={}", kind, sequence);
            return;
        }
        self.ready.push_back(ConnectionEvent::Dispatch {
            route,
            data: reply.data,
        });
    }

    fn on_login(&mut self, data: Document) {
        self.user_info = data;
        if self.user_info.get("isCross").int() == 1 {
            let session = Session {
                server_id: self.user_info.get("sid").int() as i32,
                server_url: self.user_info.get("wsurl").text().to_string(),
                ..self.session.clone()
            };
            tracing::info!("Cross-server login, continuing at {}", session.server_url);
            self.close();
            self.handoff = Some(Handoff {
                session,
                adopt: false,
            });
            return;
        }

        self.state = ConnectionState::Active;
        tracing::info!("{} connected", self.describe());
        self.ready.push_back(ConnectionEvent::Authenticated);
    }

    fn update_buildings(&mut self, data: &Document) {
        for build in data.get("updateBuilds").items() {
            let build_id = id_string(&build["id"]);
            for army in build["productIds"].items() {
                self.army_buildings.insert(id_string(army), build_id.clone());
            }
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns whether requests can be sent.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
            && matches!(
                self.state,
                ConnectionState::Authenticating | ConnectionState::Active
            )
    }

    pub fn closed_by_server(&self) -> bool {
        self.closed_by_server
    }

    /// Login reply document, kept current by resource pushes.
    pub fn user_info(&self) -> &Document {
        &self.user_info
    }

    pub fn user_info_mut(&mut self) -> &mut Document {
        &mut self.user_info
    }

    pub fn warzone(&self) -> i32 {
        self.user_info.get("k").int() as i32
    }

    pub fn username(&self) -> &str {
        self.user_info.get("username").text()
    }

    /// Alliance id, or 0 outside an alliance.
    pub fn alliance_id(&self) -> i64 {
        self.user_info.get("allianceInfo")["aid"].int()
    }

    /// Server clock from the most recent reply, in milliseconds.
    pub fn last_server_time_ms(&self) -> i64 {
        self.last_server_time_ms
    }

    /// Time of the last non-heartbeat request.
    pub fn last_request(&self) -> Instant {
        self.last_request
    }

    /// Account descriptor used as a log prefix.
    pub fn describe(&self) -> String {
        format!("[S{}/{}]", self.warzone(), self.username())
    }

    /// Army id to producing building id, from building pushes.
    pub fn army_buildings(&self) -> &BTreeMap<String, String> {
        &self.army_buildings
    }

    pub fn clear_army_buildings(&mut self) {
        self.army_buildings.clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.table.pending_count()
    }
}

impl<C: ConnectionOwner> Connection<C> {
    /// Moves the account to warzone `wanted`.
    ///
    /// Looks up the account on the wanted shard, requests a server change and
    /// hands off to the new endpoint. Without an account there the request is
    /// logged and dropped.
    pub fn change_server(&mut self, wanted: i32) {
        let args = json!({
            "channel": "webgame",
            "devPlatform": "webgame",
            "lineAddress": "",
        });
        let sent = self.request(
            RequestId::GET_USER_SERVERLIST,
            Document::from(args),
            move |owner: &mut C, resp| {
                if let Some(conn) = owner.connection() {
                    conn.on_server_list(wanted, resp);
                }
            },
        );
        if let Err(e) = sent {
            tracing::warn!("{} cannot change to S{}: {}", self.describe(), wanted, e);
        }
    }

    fn on_server_list(&mut self, wanted: i32, resp: &Document) {
        let wanted_id = i64::from(wanted);
        let uid = resp
            .get("serverList")
            .items()
            .iter()
            .find(|s| s["serverId"].int() == wanted_id)
            .map(|s| s["uid"].int())
            .unwrap_or(0);
        if uid == 0 {
            tracing::info!("{} has no account on S{}", self.describe(), wanted);
            return;
        }

        let server_url = resp.get("showServerList")["serverList"]
            .items()
            .iter()
            .find(|s| s["id"].int() == wanted_id)
            .map(|s| s["url"].text().to_string())
            .unwrap_or_default();
        let target = Session {
            server_id: wanted,
            server_url,
            auth_token: String::new(),
            device_temp_id: self.session.device_temp_id.clone(),
        };

        let args = json!({
            "deviceType": "wxMiniProgram",
            "isUnion": 1,
            "serverId": wanted,
            "serverInfoToken": self.session.auth_token,
            "uid": uid.to_string(),
        });
        let sent = self.request(
            RequestId::CHANGE_SERVER,
            Document::from(args),
            move |owner: &mut C, resp| {
                let Some(conn) = owner.connection() else {
                    return;
                };
                let session = Session {
                    auth_token: resp.get("serverInfoToken").text().to_string(),
                    ..target
                };
                conn.begin_handoff(session);
            },
        );
        if let Err(e) = sent {
            tracing::warn!("{} cannot change to S{}: {}", self.describe(), wanted, e);
        }
    }
}

async fn handshake(
    config: &ConnectionConfig,
    connector: &TlsConnector,
    url: &str,
) -> Result<WsStream, ClientError> {
    let (_, endpoint) = Endpoint::parse(url)?;
    let stream = ClientStream::connect(&endpoint, connector).await?;

    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    if let Ok(origin) = HeaderValue::from_str(&config.origin) {
        headers.insert(header::ORIGIN, origin);
    }
    if let Ok(user_agent) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(header::USER_AGENT, user_agent);
    }

    let (ws, _response) = tokio_tungstenite::client_async(request, stream).await?;
    Ok(ws)
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = rx.recv().await {
        let result = match outgoing {
            Outgoing::Frame(bytes) => sink.send(WsMessage::Binary(bytes)).await,
            Outgoing::Close => {
                if let Err(e) = sink.close().await {
                    tracing::debug!("Websocket close failed: {}", e);
                }
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!("Websocket write failed: {}", e);
            break;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Ids arrive as strings or numbers; both are keyed as text.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tokio::net::{TcpListener, TcpStream};
    use warbot_protocol::Frame;

    type ServerWs = WebSocketStream<TcpStream>;

    struct Owner {
        conn: Option<Connection<Owner>>,
        replies: Vec<i64>,
        pushes: usize,
    }

    impl ConnectionOwner for Owner {
        fn connection(&mut self) -> Option<&mut Connection<Self>> {
            self.conn.as_mut()
        }
    }

    impl Owner {
        async fn connect(url: String, heartbeat: Duration) -> Self {
            let session = Session {
                server_id: 3,
                server_url: url,
                auth_token: "tok".to_string(),
                device_temp_id: "tid".to_string(),
            };
            let config = ConnectionConfig::new().with_heartbeat_interval(heartbeat);
            let conn = Connection::connect(config, "1.0.0", session).await.unwrap();
            Self {
                conn: Some(conn),
                replies: Vec::new(),
                pushes: 0,
            }
        }

        fn conn(&mut self) -> &mut Connection<Owner> {
            self.conn.as_mut().unwrap()
        }

        /// Runs dispatches until a lifecycle event arrives.
        async fn next_lifecycle(&mut self) -> ConnectionEvent<Owner> {
            loop {
                let event = self.conn().next_event().await;
                match event {
                    ConnectionEvent::Dispatch { route, data } => route.invoke(self, &data),
                    other => return other,
                }
            }
        }
    }

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerWs {
        let (socket, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(socket).await.unwrap()
    }

    /// Reads the next client message, skipping heartbeats unless asked for.
    async fn recv(ws: &mut ServerWs, keep_heartbeats: bool) -> Message {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    let mut buf = BytesMut::from(&data[..]);
                    let message = Message::from_frame(Frame::decode(&mut buf).unwrap().unwrap());
                    if keep_heartbeats || message.kind() != RequestId::NO_QUEUE_HEART {
                        return message;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("unexpected client message: {:?}", other),
            }
        }
    }

    fn body(message: &Message) -> Document {
        match &message.body {
            warbot_protocol::Body::Document(doc) => doc.clone(),
            _ => Document::new(),
        }
    }

    fn reply(request_id: RequestId, sequence: i32, status: i64, inner: Value) -> WsMessage {
        let envelope = json!({"t": 1_700_000_000_000i64, "s": status, "d": inner.to_string()});
        let frame = Message::new(request_id, sequence, Document::from(envelope)).to_frame();
        WsMessage::Binary(frame.encode().unwrap().to_vec())
    }

    async fn drain(ws: &mut ServerWs) {
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    }

    #[test]
    fn test_config_builder() {
        let config = ConnectionConfig::new()
            .with_origin("https://example.net")
            .with_connect_timeout(Duration::from_secs(3))
            .with_heartbeat_interval(Duration::from_secs(7))
            .with_user_agent("ua");
        assert_eq!(config.origin, "https://example.net");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(7));
        assert_eq!(config.user_agent, "ua");
    }

    #[test]
    fn test_id_string() {
        assert_eq!(id_string(&json!("abc")), "abc");
        assert_eq!(id_string(&json!(12)), "12");
        assert_eq!(id_string(&Value::Null), "");
    }

    #[tokio::test]
    async fn test_login_and_dispatch() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;

            let login = recv(&mut ws, false).await;
            assert_eq!(login.kind(), RequestId::LOGIN);
            assert_eq!(login.sequence, 1);
            let args = body(&login);
            assert_eq!(args.get("serverId").int(), 3);
            assert_eq!(args.get("token").text(), "tok");
            assert_eq!(args.get("temp_id").text(), "tid");
            assert_eq!(args.get("appVersion").text(), "1.0.0");
            ws.send(reply(
                RequestId::LOGIN,
                login.sequence,
                0,
                json!({"k": 5, "username": "bob", "allianceInfo": {"aid": "77"}}),
            ))
            .await
            .unwrap();

            let activity = recv(&mut ws, false).await;
            let science = recv(&mut ws, false).await;
            assert_eq!(activity.kind(), RequestId::GET_ACTIVITY_DATA);
            assert_eq!(science.kind(), RequestId::ALLIANCE_GET_SCIENCE);
            assert_eq!(science.sequence, activity.sequence + 1);

            // Out of order: the error reply first, then the success.
            ws.send(reply(RequestId::ALLIANCE_GET_SCIENCE, science.sequence, 3, json!({})))
                .await
                .unwrap();
            ws.send(reply(RequestId::GET_ACTIVITY_DATA, activity.sequence, 0, json!({"v": 9})))
                .await
                .unwrap();
            ws.send(reply(RequestId::PUSH_RESOURCE, 0, 0, json!({"coin": 12})))
                .await
                .unwrap();
            ws.send(reply(RequestId(424242), 0, 0, json!({"ignored": true})))
                .await
                .unwrap();
            ws.close(None).await.ok();
        });

        let mut owner = Owner::connect(url, Duration::from_secs(60)).await;
        assert_eq!(owner.conn().state(), ConnectionState::Authenticating);

        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Authenticated
        ));
        let conn = owner.conn();
        assert_eq!(conn.state(), ConnectionState::Active);
        assert_eq!(conn.warzone(), 5);
        assert_eq!(conn.username(), "bob");
        assert_eq!(conn.alliance_id(), 77);
        assert_eq!(conn.describe(), "[S5/bob]");

        let blob = "x".repeat(warbot_protocol::MAX_PAYLOAD_SIZE);
        let oversized = Document::from(json!({ "blob": blob }));
        assert!(matches!(
            conn.send(RequestId::GET_ORDER, oversized),
            Err(ClientError::Protocol(_))
        ));

        conn.request(RequestId::GET_ACTIVITY_DATA, Document::new(), |o: &mut Owner, d| {
            o.replies.push(d.get("v").int())
        })
        .unwrap();
        conn.request(RequestId::ALLIANCE_GET_SCIENCE, Document::new(), |o: &mut Owner, _| {
            o.replies.push(-1)
        })
        .unwrap();
        conn.register(RequestId::PUSH_RESOURCE, |o: &mut Owner, _| o.pushes += 1);
        assert_eq!(conn.pending_requests(), 2);

        let event = owner.next_lifecycle().await;
        assert!(matches!(event, ConnectionEvent::Closed { by_server: false }));
        assert_eq!(owner.replies, vec![9]);
        assert_eq!(owner.pushes, 1);

        let conn = owner.conn();
        assert_eq!(conn.user_info().get("resource")["coin"].int(), 12);
        assert_eq!(conn.last_server_time_ms(), 1_700_000_000_000);
        assert_eq!(conn.pending_requests(), 0);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_open());
        assert!(matches!(
            conn.send(RequestId::GET_ORDER, Document::new()),
            Err(ClientError::NotConnected)
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_disconnect_push() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let login = recv(&mut ws, false).await;
            ws.send(reply(RequestId::LOGIN, login.sequence, 0, json!({"k": 1, "username": "a"})))
                .await
                .unwrap();
            ws.send(reply(RequestId::USER_DISCONNECT, 0, 0, json!({})))
                .await
                .unwrap();
            drain(&mut ws).await;
        });

        let mut owner = Owner::connect(url, Duration::from_secs(60)).await;
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Authenticated
        ));
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Closed { by_server: true }
        ));
        assert!(owner.conn().closed_by_server());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_cross_server_handoff() {
        let (first, first_url) = listen().await;
        let (second, second_url) = listen().await;

        let first_server = tokio::spawn(async move {
            let mut ws = accept(&first).await;
            let login = recv(&mut ws, false).await;
            assert_eq!(body(&login).get("serverId").int(), 3);
            ws.send(reply(
                RequestId::LOGIN,
                login.sequence,
                0,
                json!({"isCross": 1, "sid": 77, "wsurl": second_url}),
            ))
            .await
            .unwrap();
            drain(&mut ws).await;
        });
        let second_server = tokio::spawn(async move {
            let mut ws = accept(&second).await;
            let login = recv(&mut ws, false).await;
            assert_eq!(login.sequence, 1);
            let args = body(&login);
            assert_eq!(args.get("serverId").int(), 77);
            assert_eq!(args.get("token").text(), "tok");
            ws.send(reply(
                RequestId::LOGIN,
                login.sequence,
                0,
                json!({"k": 77, "username": "bob", "isCross": 0}),
            ))
            .await
            .unwrap();
            drain(&mut ws).await;
        });

        let mut owner = Owner::connect(first_url, Duration::from_secs(60)).await;
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Authenticated
        ));
        let conn = owner.conn();
        assert_eq!(conn.warzone(), 77);
        // A cross-server login keeps the original session.
        assert_eq!(conn.session().server_id, 3);

        first_server.await.unwrap();
        owner.conn = None;
        second_server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handoff_survives_cancelled_poll() {
        let (first, first_url) = listen().await;
        let (second, second_url) = listen().await;
        let (stalled_tx, stalled_rx) = tokio::sync::oneshot::channel::<()>();

        let first_server = tokio::spawn(async move {
            let mut ws = accept(&first).await;
            let login = recv(&mut ws, false).await;
            ws.send(reply(
                RequestId::LOGIN,
                login.sequence,
                0,
                json!({"isCross": 1, "sid": 77, "wsurl": second_url}),
            ))
            .await
            .unwrap();
            drain(&mut ws).await;
        });
        let second_server = tokio::spawn(async move {
            // The first attempt never gets a handshake response.
            let (stalled, _) = second.accept().await.unwrap();
            let _ = stalled_tx.send(());
            let mut ws = accept(&second).await;
            drop(stalled);
            let login = recv(&mut ws, false).await;
            assert_eq!(body(&login).get("serverId").int(), 77);
            ws.send(reply(
                RequestId::LOGIN,
                login.sequence,
                0,
                json!({"k": 77, "username": "bob"}),
            ))
            .await
            .unwrap();
            drain(&mut ws).await;
        });

        let mut owner = Owner::connect(first_url, Duration::from_secs(60)).await;
        tokio::select! {
            event = owner.next_lifecycle() => panic!("hand-off finished early: {:?}", event),
            _ = stalled_rx => {}
        }
        assert_eq!(owner.conn().state(), ConnectionState::Connecting);

        let event = owner.next_lifecycle().await;
        assert!(matches!(event, ConnectionEvent::Authenticated), "{:?}", event);
        assert_eq!(owner.conn().warzone(), 77);
        assert_eq!(owner.conn().session().server_id, 3);

        first_server.await.unwrap();
        owner.conn = None;
        second_server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drops_pending_handoff() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            recv(&mut ws, false).await;
            drain(&mut ws).await;
        });

        let mut owner = Owner::connect(url, Duration::from_secs(60)).await;
        let target = Session {
            server_id: 9,
            server_url: "ws://127.0.0.1:1/".to_string(),
            ..Default::default()
        };
        owner.conn().begin_handoff(target);
        owner.conn().close();
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Closed { by_server: false }
        ));
        assert_eq!(owner.conn().session().server_id, 3);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_change_server() {
        let (first, first_url) = listen().await;
        let (second, second_url) = listen().await;

        let first_server = tokio::spawn(async move {
            let mut ws = accept(&first).await;
            let login = recv(&mut ws, false).await;
            ws.send(reply(RequestId::LOGIN, login.sequence, 0, json!({"k": 3, "username": "bob"})))
                .await
                .unwrap();

            let list = recv(&mut ws, false).await;
            assert_eq!(list.kind(), RequestId::GET_USER_SERVERLIST);
            ws.send(reply(
                RequestId::GET_USER_SERVERLIST,
                list.sequence,
                0,
                json!({
                    "serverList": [{"serverId": 3, "uid": "1"}, {"serverId": 9, "uid": "123"}],
                    "showServerList": {"serverList": [{"id": 9, "url": second_url}]},
                }),
            ))
            .await
            .unwrap();

            let change = recv(&mut ws, false).await;
            assert_eq!(change.kind(), RequestId::CHANGE_SERVER);
            let args = body(&change);
            assert_eq!(args.get("uid").text(), "123");
            assert_eq!(args.get("serverId").int(), 9);
            assert_eq!(args.get("serverInfoToken").text(), "tok");
            ws.send(reply(
                RequestId::CHANGE_SERVER,
                change.sequence,
                0,
                json!({"serverInfoToken": "new-tok"}),
            ))
            .await
            .unwrap();
            drain(&mut ws).await;
        });
        let second_server = tokio::spawn(async move {
            let mut ws = accept(&second).await;
            let login = recv(&mut ws, false).await;
            let args = body(&login);
            assert_eq!(args.get("serverId").int(), 9);
            assert_eq!(args.get("token").text(), "new-tok");
            assert_eq!(args.get("temp_id").text(), "tid");
            ws.send(reply(RequestId::LOGIN, login.sequence, 0, json!({"k": 9, "username": "bob"})))
                .await
                .unwrap();
            drain(&mut ws).await;
        });

        let mut owner = Owner::connect(first_url, Duration::from_secs(60)).await;
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Authenticated
        ));
        owner.conn().change_server(9);

        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Authenticated
        ));
        let conn = owner.conn();
        assert_eq!(conn.warzone(), 9);
        assert_eq!(conn.session().server_id, 9);
        assert_eq!(conn.session().auth_token, "new-tok");
        assert_eq!(conn.session().device_temp_id, "tid");

        first_server.await.unwrap();
        owner.conn = None;
        second_server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_skipped() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let login = recv(&mut ws, false).await;
            let mut garbage = vec![0u8; 12];
            garbage[8..12].copy_from_slice(&(-5i32).to_be_bytes());
            ws.send(WsMessage::Binary(garbage)).await.unwrap();
            ws.send(reply(RequestId::LOGIN, login.sequence, 0, json!({"k": 2, "username": "c"})))
                .await
                .unwrap();
            drain(&mut ws).await;
        });

        let mut owner = Owner::connect(url, Duration::from_secs(60)).await;
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Authenticated
        ));
        assert_eq!(owner.conn().warzone(), 2);
        owner.conn = None;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_does_not_touch_last_request() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let login = recv(&mut ws, false).await;
            ws.send(reply(RequestId::LOGIN, login.sequence, 0, json!({"k": 1, "username": "h"})))
                .await
                .unwrap();
            let heartbeat = recv(&mut ws, true).await;
            assert_eq!(heartbeat.kind(), RequestId::NO_QUEUE_HEART);
            assert_eq!(heartbeat.sequence, 2);
            ws.close(None).await.ok();
        });

        let mut owner = Owner::connect(url, Duration::from_millis(50)).await;
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Authenticated
        ));
        let before = owner.conn().last_request();
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Closed { .. }
        ));
        assert_eq!(owner.conn().last_request(), before);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            recv(&mut ws, false).await;
            drain(&mut ws).await;
        });

        let mut owner = Owner::connect(url, Duration::from_secs(60)).await;
        owner.conn().close();
        assert_eq!(owner.conn().state(), ConnectionState::Closing);
        assert!(!owner.conn().is_open());
        assert!(matches!(
            owner.next_lifecycle().await,
            ConnectionEvent::Closed { by_server: false }
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, url) = listen().await;
        drop(listener);
        let session = Session {
            server_url: url,
            ..Default::default()
        };
        let result =
            Connection::<Owner>::connect(ConnectionConfig::new(), "1.0.0", session).await;
        let err = result.err().unwrap();
        assert!(err.is_retryable());
    }
}
