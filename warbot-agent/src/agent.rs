//! The automation agent.
//!
//! An [`Agent`] owns the game connection, the task scheduler and the
//! bootstrap calls, and drives all of them from one event loop. It is not
//! `Send`: callbacks hold `&mut Agent`, so it runs on a current-thread
//! runtime.
//!
//! Connection lifecycle:
//!
//! - while connected, a single alarm either drains due tasks or, when nothing
//!   is due within the horizon, counts down the keep-alive before closing;
//! - after a close, the next login is placed ahead of the earliest keyed task
//!   (or one run interval out when there is none).

use crate::actions::ActionState;
use crate::catalog::DAILY_TASK_ID;
use crate::config::Config;
use crate::error::AgentError;
use crate::events::AgentEvent;
use crate::scheduler::{Scheduler, Task, Timings};
use serde_json::Value;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use warbot_client::{
    Bootstrap, CancelHandle, Chain, Connection, ConnectionEvent, ConnectionOwner, RequestError,
};
use warbot_protocol::{Document, RequestId, Session};
use warbot_storage::SessionStore;

/// Delay before re-requesting a game version that timed out.
const VERSION_RETRY_DELAY: Duration = Duration::from_secs(5);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result of a background bootstrap call.
enum BootstrapResult {
    Version(Result<String, RequestError>),
    Session(Result<Session, RequestError>),
}

/// The single wake timer of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alarm {
    None,
    /// Drain due tasks.
    RunTasks(Instant),
    /// Close the connection unless a request went out recently.
    IdleClose(Instant),
}

impl Alarm {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Alarm::None => None,
            Alarm::RunTasks(at) | Alarm::IdleClose(at) => Some(*at),
        }
    }
}

enum Step {
    Shutdown,
    Bootstrap(BootstrapResult),
    Connection(ConnectionEvent<Agent>),
    Alarm,
    Login,
}

/// Runs the in-game routines of one account.
pub struct Agent {
    config: Config,
    store: SessionStore,
    bootstrap: Bootstrap,
    scheduler: Scheduler<Agent>,
    pub(crate) conn: Option<Connection<Agent>>,
    pub(crate) actions: ActionState,
    version: Option<String>,
    version_request: CancelHandle,
    session_request: CancelHandle,
    /// Login waiting for the game version.
    pending_token: Option<String>,
    pending_session: Option<Session>,
    bootstrap_tx: mpsc::UnboundedSender<BootstrapResult>,
    bootstrap_rx: mpsc::UnboundedReceiver<BootstrapResult>,
    alarm: Alarm,
    login_at: Option<Instant>,
    events: broadcast::Sender<AgentEvent>,
}

impl ConnectionOwner for Agent {
    fn connection(&mut self) -> Option<&mut Connection<Self>> {
        self.conn.as_mut()
    }
}

impl Agent {
    pub fn new(config: Config) -> Result<Self, AgentError> {
        config.validate()?;
        let store = SessionStore::open(&config.storage.data_dir)?;
        let bootstrap = Bootstrap::new(
            config.network.http_config(),
            config.network.web_origin.clone(),
            config.network.server_list_url.clone(),
        );
        let scheduler = Scheduler::new(Timings::from(&config.schedule));
        let (bootstrap_tx, bootstrap_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            store,
            bootstrap,
            scheduler,
            conn: None,
            actions: ActionState::default(),
            version: None,
            version_request: CancelHandle::default(),
            session_request: CancelHandle::default(),
            pending_token: None,
            pending_session: None,
            bootstrap_tx,
            bootstrap_rx,
            alarm: Alarm::None,
            login_at: None,
            events,
        })
    }

    /// Subscribes to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    /// Game version in use, once known.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| conn.is_open())
    }

    /// Number of queued one-shot and keyed tasks.
    pub fn pending_tasks(&self) -> (usize, usize) {
        (self.scheduler.one_shot_len(), self.scheduler.keyed_len())
    }

    /// Logs in with `token` when given, otherwise from the saved session.
    pub async fn start(&mut self, token: Option<String>) {
        match token {
            Some(token) => self.login_by_token(token),
            None => {
                let session = self.load_session();
                self.login_by_session(session).await;
            }
        }
    }

    /// Drives the agent until `shutdown` completes.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let alarm_at = self.alarm.deadline();
            let login_at = self.login_at;
            let step = tokio::select! {
                _ = &mut shutdown => Step::Shutdown,
                Some(result) = self.bootstrap_rx.recv() => Step::Bootstrap(result),
                event = next_connection_event(&mut self.conn) => Step::Connection(event),
                _ = sleep_until_opt(alarm_at) => Step::Alarm,
                _ = sleep_until_opt(login_at) => Step::Login,
            };

            match step {
                Step::Shutdown => {
                    self.shutdown().await;
                    return;
                }
                Step::Bootstrap(result) => self.on_bootstrap(result).await,
                Step::Connection(ConnectionEvent::Dispatch { route, data }) => {
                    route.invoke(self, &data)
                }
                Step::Connection(ConnectionEvent::Authenticated) => self.on_authenticated(),
                Step::Connection(ConnectionEvent::Closed { by_server }) => {
                    self.on_closed(by_server)
                }
                Step::Alarm => match self.alarm {
                    Alarm::RunTasks(_) => self.run_tasks(),
                    Alarm::IdleClose(_) => self.logout_if_idle(),
                    Alarm::None => {}
                },
                Step::Login => self.on_login_timer().await,
            }
        }
    }

    async fn shutdown(&mut self) {
        self.version_request.cancel();
        self.session_request.cancel();
        self.alarm = Alarm::None;
        self.login_at = None;
        if let Some(mut conn) = self.conn.take() {
            conn.close();
            loop {
                let event = conn.next_event().await;
                if let ConnectionEvent::Closed { .. } = event {
                    break;
                }
            }
        }
        tracing::info!("Agent stopped");
    }

    /// Exchanges a login token for a session, then logs in.
    pub fn login_by_token(&mut self, token: impl Into<String>) {
        let token = token.into();
        let Some(version) = self.version.clone() else {
            self.pending_token = Some(token);
            self.request_version(Duration::ZERO);
            return;
        };

        tracing::info!("Requesting session for game version {}", version);
        let on_success = self.bootstrap_tx.clone();
        let on_failure = self.bootstrap_tx.clone();
        self.session_request = self.bootstrap.request_session(&version, &token).when_finished(
            move |session| {
                let _ = on_success.send(BootstrapResult::Session(Ok(session)));
            },
            move |err| {
                let _ = on_failure.send(BootstrapResult::Session(Err(err)));
            },
        );
    }

    /// Connects with `session`.
    ///
    /// A login one run interval out is armed first, so a failed attempt is
    /// retried later.
    pub async fn login_by_session(&mut self, session: Option<Session>) {
        self.login_at = Some(Instant::now() + self.config.schedule.run_interval());

        let Some(session) = session else {
            self.progress("no saved session, log in with a token first");
            return;
        };
        let Some(version) = self.version.clone() else {
            self.pending_session = Some(session);
            self.request_version(Duration::ZERO);
            return;
        };

        match self.open_connection(version, session).await {
            Ok(()) => {}
            // Only the run-interval login armed above remains.
            Err(AgentError::Client(e)) if !e.is_retryable() => {
                self.progress(format!("connection failed: {}", e));
            }
            Err(e) => {
                self.progress(format!("connection failed: {}", e));
                self.schedule_relogin();
            }
        }
    }

    async fn open_connection(
        &mut self,
        version: String,
        session: Session,
    ) -> Result<(), AgentError> {
        self.conn = None;
        self.alarm = Alarm::None;
        tracing::info!("Connecting to S{} at {}", session.server_id, session.server_url);
        let mut conn =
            Connection::connect(self.config.network.connection_config(), version, session).await?;
        conn.register(RequestId::BUILDING_INFO_LIST, |agent: &mut Agent, data| {
            agent.on_building_update(data)
        });
        self.conn = Some(conn);
        Ok(())
    }

    fn request_version(&mut self, delay: Duration) {
        if self.version_request.is_in_flight() {
            return;
        }
        let bootstrap = self.bootstrap.clone();
        let chain = if delay.is_zero() {
            bootstrap.request_game_version()
        } else {
            Chain::new(async move {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .then_request(move |_| bootstrap.request_game_version())
        };

        let on_success = self.bootstrap_tx.clone();
        let on_failure = self.bootstrap_tx.clone();
        self.version_request = chain.when_finished(
            move |version| {
                let _ = on_success.send(BootstrapResult::Version(Ok(version)));
            },
            move |err| {
                let _ = on_failure.send(BootstrapResult::Version(Err(err)));
            },
        );
    }

    async fn on_bootstrap(&mut self, result: BootstrapResult) {
        match result {
            BootstrapResult::Version(Ok(version)) => {
                tracing::info!("Game version {}", version);
                self.version = Some(version);
                if let Some(token) = self.pending_token.take() {
                    self.login_by_token(token);
                }
                if let Some(session) = self.pending_session.take() {
                    self.login_by_session(Some(session)).await;
                }
            }
            BootstrapResult::Version(Err(e)) if e.is_timeout() => {
                tracing::warn!("Game version request timed out, retrying");
                self.request_version(VERSION_RETRY_DELAY);
            }
            BootstrapResult::Version(Err(e)) => {
                tracing::error!("Failed to get game version: {}", e);
                self.progress(format!("failed to get game version: {}", e));
            }
            BootstrapResult::Session(Ok(session)) => {
                self.progress(format!("got session for S{}", session.server_id));
                self.login_by_session(Some(session)).await;
            }
            BootstrapResult::Session(Err(e)) => {
                tracing::error!("Failed to get session: {}", e);
                self.progress(format!("failed to get session: {}", e));
            }
        }
    }

    fn on_authenticated(&mut self) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let warzone = conn.warzone();
        let username = conn.username().to_string();
        let session = conn.session().clone();
        self.actions = ActionState::from_login(conn.user_info());
        let _ = self.events.send(AgentEvent::Authenticated { warzone, username });

        if warzone == 0 {
            self.progress("login failed");
            return;
        }
        self.progress("connected");

        if let Err(e) = self.store.save(&session) {
            tracing::warn!("Failed to save session: {}", e);
        }

        let wanted = self.config.preferences.warzone;
        if wanted != 0 && wanted != warzone {
            self.progress(format!("changing warzone to S{}", wanted));
            if let Some(conn) = self.conn.as_mut() {
                conn.change_server(wanted);
            }
            return;
        }

        self.login_at = None;
        self.scheduler.discard_one_shot();
        if !self.scheduler.has_keyed(DAILY_TASK_ID) {
            self.do_daily_tasks();
        }
        if !matches!(self.alarm, Alarm::RunTasks(_)) {
            self.run_tasks();
        }
    }

    fn on_closed(&mut self, by_server: bool) {
        if by_server {
            self.progress("disconnected by the server");
        } else {
            self.progress("disconnected");
        }
        self.conn = None;
        self.alarm = Alarm::None;
        self.actions.coin_consumption = None;
        self.scheduler.discard_one_shot();
        self.schedule_relogin();
        let _ = self.events.send(AgentEvent::ConnectionClosed);
    }

    async fn on_login_timer(&mut self) {
        self.login_at = None;
        // A connection mid hand-off is still ours.
        if self.conn.is_some() {
            self.alarm = Alarm::RunTasks(Instant::now());
            return;
        }
        let session = self.load_session();
        self.login_by_session(session).await;
    }

    fn load_session(&self) -> Option<Session> {
        match self.store.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Failed to load session: {}", e);
                None
            }
        }
    }

    /// Drains due tasks and re-arms the alarm.
    fn run_tasks(&mut self) {
        self.alarm = Alarm::None;
        if !self.is_connected() {
            self.logout_if_idle();
            return;
        }

        for task in self.scheduler.take_due(Instant::now()) {
            task(self);
        }

        let now = Instant::now();
        self.alarm = match self.scheduler.next_wake(now) {
            Some(at) => Alarm::RunTasks(at),
            None => Alarm::IdleClose(now + self.scheduler.timings().keep_alive),
        };
    }

    /// Closes the connection unless a request went out within the keep-alive.
    fn logout_if_idle(&mut self) {
        self.alarm = Alarm::None;
        let keep_alive = self.scheduler.timings().keep_alive;
        let Some(conn) = self.conn.as_mut() else {
            self.schedule_relogin();
            return;
        };
        if !conn.is_open() {
            return;
        }
        if Instant::now() < conn.last_request() + keep_alive {
            self.run_tasks();
            return;
        }

        // Fetch a fresh version on the next login.
        self.version = None;
        tracing::info!("{} idle, closing connection", conn.describe());
        conn.close();
    }

    fn schedule_relogin(&mut self) {
        let now = Instant::now();
        let at = now + self.scheduler.relogin_delay(now);
        let at = self.login_at.map_or(at, |current| current.min(at));
        self.login_at = Some(at);
        tracing::info!("Next login in {}s", at.saturating_duration_since(now).as_secs());
    }

    /// Reacts to a newly queued task due in `delay`.
    ///
    /// A live connection pulls its alarm forward; otherwise the login is
    /// moved ahead of the task.
    fn task_added(&mut self, delay: Duration) {
        let now = Instant::now();
        let timings = *self.scheduler.timings();
        if self.is_connected() && delay < timings.horizon {
            let at = now + delay;
            self.alarm = match self.alarm {
                Alarm::RunTasks(current) if current <= at => Alarm::RunTasks(current),
                _ => Alarm::RunTasks(at),
            };
        } else {
            let at = now + delay.saturating_sub(timings.reserved_login);
            self.login_at = Some(self.login_at.map_or(at, |current| current.min(at)));
        }
    }

    /// Queues a one-shot task for the current login.
    pub fn add_task<F>(&mut self, delay: Duration, task: F)
    where
        F: FnOnce(&mut Agent) + 'static,
    {
        let task: Task<Agent> = Box::new(task);
        self.scheduler.add_task(Instant::now() + delay, task);
        self.task_added(delay);
    }

    /// Schedules the keyed task `id`, replacing any pending one.
    pub fn add_keyed_task<F>(&mut self, id: i32, delay: Duration, task: F)
    where
        F: FnOnce(&mut Agent) + 'static,
    {
        let task: Task<Agent> = Box::new(task);
        if self.scheduler.add_keyed(id, Instant::now() + delay, task) {
            tracing::debug!("Replaced keyed task {}", id);
        }
        self.task_added(delay);
    }

    pub(crate) fn request<F>(&mut self, request_id: RequestId, data: Document, callback: F)
    where
        F: FnOnce(&mut Agent, &Document) + 'static,
    {
        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = conn.request(request_id, data, callback) {
                tracing::debug!("{} not sent: {}", request_id, e);
            }
        }
    }

    pub(crate) fn send(&mut self, request_id: RequestId, data: Document) {
        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = conn.send(request_id, data) {
                tracing::debug!("{} not sent: {}", request_id, e);
            }
        }
    }

    /// Publishes a progress line prefixed with the account descriptor.
    pub(crate) fn progress(&self, message: impl Into<String>) {
        let line = format!("{} {}", self.describe(), message.into());
        tracing::info!("{}", line);
        let _ = self.events.send(AgentEvent::Progress(line));
    }

    fn describe(&self) -> String {
        match &self.conn {
            Some(conn) => conn.describe(),
            None => "[-]".to_string(),
        }
    }

    pub(crate) fn user_info(&self) -> &Document {
        static EMPTY: OnceLock<Document> = OnceLock::new();
        match &self.conn {
            Some(conn) => conn.user_info(),
            None => EMPTY.get_or_init(Document::new),
        }
    }

    pub(crate) fn set_user_info(&mut self, key: &str, value: Value) {
        if let Some(conn) = self.conn.as_mut() {
            conn.user_info_mut().set(key, value);
        }
    }

    pub(crate) fn alliance_id(&self) -> i64 {
        self.conn.as_ref().map_or(0, |conn| conn.alliance_id())
    }

    pub(crate) fn server_id(&self) -> i32 {
        self.conn.as_ref().map_or(0, |conn| conn.session().server_id)
    }

    pub(crate) fn last_server_time_ms(&self) -> i64 {
        self.conn.as_ref().map_or(0, |conn| conn.last_server_time_ms())
    }

    pub(crate) fn army_buildings(&self) -> Vec<(String, String)> {
        self.conn.as_ref().map_or_else(Vec::new, |conn| {
            conn.army_buildings()
                .iter()
                .map(|(army, building)| (army.clone(), building.clone()))
                .collect()
        })
    }
}

async fn next_connection_event(conn: &mut Option<Connection<Agent>>) -> ConnectionEvent<Agent> {
    match conn {
        Some(conn) => conn.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
