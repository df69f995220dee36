//! Connection manager with a single active robot link and automatic reconnection

use futures::StreamExt;
use parking_lot::Mutex;
use robot_link_shared::{
    ConnectionState, ConnectionStateMachine, LineFramer, LinkError, LinkEvent, ProtocolError,
    ReceiveBuffer, ReconnectPhase, RobotCommand, RobotEndpoint, TransitionResult, Transport,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::reconnect::{ReconnectOutcome, ReconnectPolicy};
use crate::command::{self, CommandReport, CommandSender, HttpCommandSender, StreamCommandSender};
use crate::config::LinkConfig;
use crate::store::{record_connection, RobotStore};
use crate::transport::{ChunkStream, TransportSession};
use crate::wifi::{AccessPoint, BinderEvent, WifiError, WifiNetworkBinder, WifiPlatform};

/// Events emitted by the connection manager, delivered in order on one channel
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Session established, either by `connect` or by the reconnect supervisor
    Connected {
        transport: Transport,
        endpoint: String,
        reconnected: bool,
    },
    /// Session ended, by request or unexpectedly
    Disconnected { reason: String },
    /// A reconnect attempt is starting
    Reconnecting { attempt: u32, max_attempts: u32 },
    /// Connect failed, or reconnect gave up
    ConnectionFailed { reason: String },
    /// One trimmed telemetry line from the robot
    DataReceived(String),
    /// Progress of a command
    Command(CommandReport),
}

/// Manages the link to one robot at a time.
///
/// Connects and commands run on background tasks; their outcomes arrive
/// through [`ConnectionManager::recv`]. Must be created inside a Tokio runtime.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

struct Inner {
    config: LinkConfig,
    store: Arc<dyn RobotStore>,
    binder: WifiNetworkBinder,
    reconnect: ReconnectPolicy,
    fsm: Mutex<ConnectionStateMachine>,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
    connect_task: Mutex<Option<JoinHandle<()>>>,
    auto_reconnect: AtomicBool,
    received: Mutex<ReceiveBuffer>,
    workers: TaskTracker,
    dispatched: AtomicUsize,
    event_tx: mpsc::Sender<ConnectionEvent>,
}

struct ActiveSession {
    id: u64,
    endpoint: RobotEndpoint,
    transport: TransportSession,
    sender: Arc<dyn CommandSender>,
    /// Checked by the read loop before every read
    stop: CancellationToken,
    read_task: Option<JoinHandle<()>>,
}

struct OpenedSession {
    transport: TransportSession,
    sender: Arc<dyn CommandSender>,
}

impl ConnectionManager {
    /// Create a manager; nothing is connected until [`connect`](Self::connect)
    pub fn new(
        config: LinkConfig,
        store: Arc<dyn RobotStore>,
        platform: Arc<dyn WifiPlatform>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(config.event_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (binder, binder_events) = WifiNetworkBinder::new(
            platform,
            config.wifi.monitor_interval,
            config.wifi.rebind_timeout,
        );

        let inner = Arc::new(Inner {
            store,
            binder,
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
            fsm: Mutex::new(ConnectionStateMachine::new()),
            state_tx,
            session: Mutex::new(None),
            next_session_id: AtomicU64::new(0),
            connect_task: Mutex::new(None),
            auto_reconnect: AtomicBool::new(config.reconnect.enabled),
            received: Mutex::new(ReceiveBuffer::new(config.receive_history)),
            workers: TaskTracker::new(),
            dispatched: AtomicUsize::new(0),
            event_tx,
            config,
        });

        spawn_binder_watch(Arc::downgrade(&inner), binder_events);

        Self { inner, event_rx }
    }

    /// Start connecting to `endpoint` in the background.
    ///
    /// Does nothing while a session is connecting, connected or reconnecting.
    pub fn connect(&self, endpoint: RobotEndpoint) {
        match self.inner.transition(LinkEvent::ConnectRequested) {
            TransitionResult::Success(_) => {}
            other => {
                debug!("[LINK] Connect to {} ignored: {:?}", endpoint, other);
                return;
            }
        }

        info!("[LINK] Connecting to {}", endpoint);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.connect_worker(endpoint).await });
        if let Some(previous) = self.inner.connect_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Parse and send a raw command string (`"a"`, `"p1:90;"`, `"/forward"`, ...)
    pub fn send_command(&self, text: &str) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.send(RobotCommand::parse(text)?)
    }

    /// Send a command on a background worker; progress arrives as
    /// [`ConnectionEvent::Command`] reports.
    pub fn send(&self, command: RobotCommand) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let (session_id, sender) = {
            let session = self.inner.session.lock();
            match session.as_ref() {
                Some(active) => (active.id, active.sender.clone()),
                None => return Err(LinkError::NotConnected),
            }
        };

        let transport = sender.transport();
        let label = command.label(transport).map_err(|e| match e {
            ProtocolError::NoEncoding { .. } => LinkError::Unsupported(e.to_string()),
            other => LinkError::InvalidCommand(other),
        })?;

        self.inner.dispatched.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        self.inner.workers.spawn(async move {
            let result = command::dispatch(sender.as_ref(), command, label, &inner.event_tx).await;
            if let Err(e) = result {
                if transport == Transport::Bluetooth && e.is_session_loss() {
                    inner.handle_loss(session_id, e.to_string()).await;
                }
            }
        });
        Ok(())
    }

    /// Tear the link down and stop any reconnect. Safe to call in any state.
    ///
    /// Never waits on the event consumer, so it completes even when nobody
    /// is draining events.
    pub async fn disconnect(&self) {
        let previous = self.state();
        self.inner.transition(LinkEvent::DisconnectRequested);
        // An in-flight rebind holds the binder until its attempt is dropped
        self.inner.reconnect.cancel();

        if let Some(task) = self.inner.connect_task.lock().take() {
            task.abort();
        }

        let session = self.inner.session.lock().take();
        let endpoint = match session {
            Some(session) => {
                info!("[LINK] Disconnecting from {}", session.endpoint);
                session.stop.cancel();
                if let Some(task) = &session.read_task {
                    task.abort();
                }
                session.transport.close(&self.inner.binder).await;
                Some(session.endpoint)
            }
            None => None,
        };

        self.inner.binder.unbind().await;
        self.inner.reconnect.cancel();

        if previous != ConnectionState::Disconnected {
            if let Some(endpoint) = &endpoint {
                record_connection(self.inner.store.as_ref(), endpoint.robot_id(), false);
            }
            self.inner.emit_detached(ConnectionEvent::Disconnected {
                reason: "Disconnected by user".into(),
            });
        }
    }

    /// Robot WiFi access points in range, strongest first
    pub async fn scan_wifi(&self) -> Result<Vec<AccessPoint>, WifiError> {
        self.inner.binder.scan_robot_aps().await
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Enable or disable reconnect after unexpected loss
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.auto_reconnect.load(Ordering::SeqCst)
    }

    pub fn reconnect_phase(&self) -> ReconnectPhase {
        self.inner.reconnect.phase()
    }

    /// Endpoint of the live session
    pub fn endpoint(&self) -> Option<RobotEndpoint> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.endpoint.clone())
    }

    /// Most recent telemetry lines, oldest first
    pub fn recent_lines(&self) -> Vec<String> {
        self.inner.received.lock().lines()
    }

    /// Recent telemetry as shown in the receive log
    pub fn render_received(&self) -> String {
        self.inner.received.lock().render()
    }

    /// Command workers still running
    pub fn active_workers(&self) -> usize {
        self.inner.workers.len()
    }

    /// Commands handed to a worker since creation
    pub fn commands_dispatched(&self) -> usize {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.reconnect.cancel();
        if let Some(task) = self.inner.connect_task.lock().take() {
            task.abort();
        }
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.stop.cancel();
            if let Some(task) = &session.read_task {
                task.abort();
            }
        }
    }
}

impl Inner {
    fn transition(&self, event: LinkEvent) -> TransitionResult {
        let mut fsm = self.fsm.lock();
        let result = fsm.process_event(event);
        match &result {
            TransitionResult::Success(state) => {
                debug!("[LINK] {:?} -> {}", event, state);
                self.state_tx.send_replace(*state);
            }
            TransitionResult::Ignored(state) => debug!("[LINK] {:?} ignored in {}", event, state),
            TransitionResult::Invalid { from, event } => {
                debug!("[LINK] {:?} not valid in {}", event, from)
            }
        }
        result
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    async fn emit(&self, event: ConnectionEvent) {
        let _ = self.event_tx.send(event).await;
    }

    /// Queue `event` without waiting for room in the channel
    fn emit_detached(&self, event: ConnectionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("[LINK] Event channel full, delivering {:?} later", event);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let _ = event_tx.send(event).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn connect_worker(self: Arc<Self>, endpoint: RobotEndpoint) {
        match self.open_session(&endpoint, true).await {
            Ok(opened) => {
                if !self.install_session(endpoint.clone(), opened, LinkEvent::Opened).await {
                    return;
                }
                info!("[LINK] Connected to {}", endpoint);
                record_connection(self.store.as_ref(), endpoint.robot_id(), true);
                self.emit(ConnectionEvent::Connected {
                    transport: endpoint.transport(),
                    endpoint: endpoint.to_string(),
                    reconnected: false,
                })
                .await;
            }
            Err(e) => {
                error!("[LINK] Connect to {} failed: {}", endpoint, e);
                if matches!(
                    self.transition(LinkEvent::OpenFailed),
                    TransitionResult::Success(_)
                ) {
                    self.emit(ConnectionEvent::ConnectionFailed {
                        reason: e.to_string(),
                    })
                    .await;
                }
            }
        }
    }

    async fn open_session(
        &self,
        endpoint: &RobotEndpoint,
        fresh: bool,
    ) -> Result<OpenedSession, LinkError> {
        let transport = TransportSession::open(endpoint, &self.config, &self.binder, fresh).await?;
        let sender: Arc<dyn CommandSender> = match &transport {
            TransportSession::Stream(stream) => {
                Arc::new(StreamCommandSender::new(stream.writer(), stream.peer()))
            }
            TransportSession::Network(network) => {
                match HttpCommandSender::new(&network.target, Some(&network.handle), &self.config.wifi) {
                    Ok(sender) => Arc::new(sender),
                    Err(e) => {
                        transport.close(&self.binder).await;
                        return Err(e);
                    }
                }
            }
        };
        Ok(OpenedSession { transport, sender })
    }

    /// Make `opened` the active session if `event` is still a valid transition.
    /// Otherwise the session is closed and discarded.
    async fn install_session(
        self: &Arc<Self>,
        endpoint: RobotEndpoint,
        opened: OpenedSession,
        event: LinkEvent,
    ) -> bool {
        let OpenedSession {
            mut transport,
            sender,
        } = opened;
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stop = CancellationToken::new();
        let reader = transport.take_reader();

        let rejected = {
            let mut slot = self.session.lock();
            if matches!(self.transition(event), TransitionResult::Success(_)) {
                let read_task =
                    reader.map(|chunks| spawn_read_loop(self.clone(), id, chunks, stop.clone()));
                let stale = slot.replace(ActiveSession {
                    id,
                    endpoint,
                    transport,
                    sender,
                    stop,
                    read_task,
                });
                if let Some(stale) = stale {
                    stale.stop.cancel();
                    if let Some(task) = &stale.read_task {
                        task.abort();
                    }
                }
                None
            } else {
                Some(transport)
            }
        };

        match rejected {
            Some(transport) => {
                warn!("[LINK] State changed while opening, discarding session");
                transport.close(&self.binder).await;
                false
            }
            None => true,
        }
    }

    /// Tear down session `session_id` after an unexpected failure
    async fn handle_loss(self: &Arc<Self>, session_id: u64, reason: String) {
        let session = {
            let mut slot = self.session.lock();
            let current = slot.as_ref().is_some_and(|active| active.id == session_id);
            if current {
                slot.take()
            } else {
                None
            }
        };
        let Some(session) = session else {
            debug!("[LINK] Ignoring loss of stale session {}", session_id);
            return;
        };

        let auto_reconnect = self.auto_reconnect.load(Ordering::SeqCst);
        let lost = matches!(
            self.transition(LinkEvent::SessionLost { auto_reconnect }),
            TransitionResult::Success(_)
        );
        // Armed before any await so a concurrent disconnect cancels this run
        let reconnect = (lost && auto_reconnect).then(|| self.reconnect.arm());

        session.stop.cancel();
        session.transport.close(&self.binder).await;
        if !lost {
            return;
        }

        warn!("[LINK] Lost {}: {}", session.endpoint, reason);
        record_connection(self.store.as_ref(), session.endpoint.robot_id(), false);
        self.emit(ConnectionEvent::Disconnected { reason }).await;

        if let Some(token) = reconnect {
            spawn_reconnect(self.clone(), session.endpoint, token);
        }
    }

    async fn supervise(self: Arc<Self>, endpoint: RobotEndpoint, token: CancellationToken) {
        let max_attempts = self.reconnect.max_attempts();
        let outcome = self
            .reconnect
            .run(token, |attempt| {
                let inner = self.clone();
                let endpoint = endpoint.clone();
                async move { inner.reconnect_attempt(endpoint, attempt, max_attempts).await }
            })
            .await;

        match outcome {
            ReconnectOutcome::Reconnected { attempts } => {
                info!("[RECONNECT] {} back after {} attempt(s)", endpoint, attempts);
                record_connection(self.store.as_ref(), endpoint.robot_id(), true);
                self.emit(ConnectionEvent::Connected {
                    transport: endpoint.transport(),
                    endpoint: endpoint.to_string(),
                    reconnected: true,
                })
                .await;
            }
            ReconnectOutcome::GivenUp { attempts } => {
                if matches!(
                    self.transition(LinkEvent::ReconnectGivenUp),
                    TransitionResult::Success(_)
                ) {
                    error!("[RECONNECT] Gave up on {}", endpoint);
                    self.emit(ConnectionEvent::ConnectionFailed {
                        reason: format!("Reconnect failed after {} attempts", attempts),
                    })
                    .await;
                }
            }
            ReconnectOutcome::Cancelled => debug!("[RECONNECT] Supervision of {} cancelled", endpoint),
        }
    }

    async fn reconnect_attempt(
        self: Arc<Self>,
        endpoint: RobotEndpoint,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<(), LinkError> {
        if self.state() != ConnectionState::Reconnecting {
            self.reconnect.cancel();
            return Err(LinkError::NotConnected);
        }
        self.emit(ConnectionEvent::Reconnecting {
            attempt,
            max_attempts,
        })
        .await;
        let opened = self.open_session(&endpoint, false).await?;
        if self.install_session(endpoint, opened, LinkEvent::Reconnected).await {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    async fn deliver_line(&self, line: String) {
        debug!("[LINK] Received: {}", line);
        self.received.lock().push(line.clone());
        self.emit(ConnectionEvent::DataReceived(line)).await;
    }
}

fn spawn_reconnect(
    inner: Arc<Inner>,
    endpoint: RobotEndpoint,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(inner.supervise(endpoint, token))
}

fn spawn_read_loop(
    inner: Arc<Inner>,
    session_id: u64,
    chunks: ChunkStream,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(read_loop(inner, session_id, chunks, stop))
}

/// Read telemetry until the stream ends or the session is stopped
async fn read_loop(
    inner: Arc<Inner>,
    session_id: u64,
    mut chunks: ChunkStream,
    stop: CancellationToken,
) {
    let mut framer = LineFramer::new();

    let reason = loop {
        let chunk = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            chunk = chunks.next() => chunk,
        };

        match chunk {
            Some(Ok(data)) => {
                framer.extend(&data);
                let lines: Vec<String> = framer.lines().collect();
                for line in lines {
                    inner.deliver_line(line).await;
                }
            }
            Some(Err(e)) => break format!("Read error: {}", e),
            None => break "Robot closed the connection".to_string(),
        }
    };

    if let Some(line) = framer.finish() {
        inner.deliver_line(line).await;
    }
    if !stop.is_cancelled() {
        inner.handle_loss(session_id, reason).await;
    }
}

/// Forward WiFi network loss into session loss handling
fn spawn_binder_watch(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<BinderEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match event {
                BinderEvent::NetworkLost { ssid } => {
                    let session_id = inner
                        .session
                        .lock()
                        .as_ref()
                        .filter(|s| {
                            s.endpoint.transport() == Transport::Wifi && s.endpoint.address() == ssid
                        })
                        .map(|s| s.id);
                    if let Some(id) = session_id {
                        inner
                            .handle_loss(id, format!("WiFi network {} lost", ssid))
                            .await;
                    }
                }
            }
        }
    })
}
