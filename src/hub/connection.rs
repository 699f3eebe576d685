//! Connection lifecycle
//!
//! One supervisor task per `connect()` drives the session loop:
//! open the socket, log in, subscribe, serve traffic until the socket
//! closes, then back off and start over. Only one transport is ever live;
//! the next is opened after the previous one has been dropped.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{AuthFailurePolicy, ConnectionSettings, Endpoint};
use crate::error::{Error, Result};
use crate::protocol::{Command, CommandFrame, Incoming};

use super::auth::{Handshake, HandshakeStep};
use super::correlator::Correlator;
use super::dispatcher::{ConnectionStatus, Dispatcher};
use super::reconnect::ReconnectBackoff;
use super::transport::{Transport, TransportEvent};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    ShuttingDown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct SessionState {
    phase: ConnectionState,
    ha_version: Option<String>,
    reconnect_attempts: u32,
}

/// State shared between the facade and the supervisor task
pub(crate) struct Shared {
    pub settings: ConnectionSettings,
    pub correlator: Arc<Correlator>,
    pub dispatcher: Arc<Dispatcher>,
    state: RwLock<SessionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            correlator: Arc::new(Correlator::new(settings.request_timeout())),
            dispatcher: Arc::new(Dispatcher::new()),
            state: RwLock::new(SessionState {
                phase: ConnectionState::Disconnected,
                ha_version: None,
                reconnect_attempts: 0,
            }),
            outbound: Mutex::new(None),
            settings,
        }
    }

    pub fn phase(&self) -> ConnectionState {
        self.state.read().phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == ConnectionState::Connected
    }

    pub fn ha_version(&self) -> Option<String> {
        self.state.read().ha_version.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.read().reconnect_attempts
    }

    fn set_phase(&self, phase: ConnectionState) {
        let mut state = self.state.write();
        if state.phase != phase {
            trace!(from = %state.phase, to = %phase, "Connection state change");
            state.phase = phase;
        }
    }

    /// Issue one command and wait for its result
    pub async fn request(&self, command: Command) -> Result<Value> {
        if !self.is_authenticated() {
            return Err(Error::NotConnected);
        }

        // Register before sending so a fast reply always finds its entry
        let pending = self.correlator.register();
        let frame = CommandFrame::new(pending.id(), &command).to_json()?;
        debug!(id = pending.id(), command = command.type_name(), "Sending command");

        {
            let outbound = self.outbound.lock();
            let tx = outbound.as_ref().ok_or(Error::NotConnected)?;
            tx.send(frame)
                .map_err(|_| Error::connection_lost("session closed before send"))?;
        }

        pending.wait().await
    }

    fn route(&self, message: Incoming) {
        match message {
            Incoming::Result(result) => {
                let id = result.id;
                self.correlator.resolve(id, result.into_outcome());
            }
            Incoming::Pong(pong) => {
                self.correlator.resolve(pong.id, Ok(Value::Null));
            }
            Incoming::Event(event) => {
                self.dispatcher.handle_event(&event.event);
            }
            Incoming::Unknown => trace!("Ignoring message of unknown type"),
            other => debug!(message_type = other.type_name(), "Ignoring handshake message after login"),
        }
    }
}

/// How a session ended
#[derive(Debug)]
enum SessionEnd {
    /// Socket failed to open, failed to log in, or closed later
    Lost(String),

    /// Hub answered `auth_invalid`
    Rejected(String),

    /// Error that another attempt cannot fix
    Fatal(String),

    /// Shutdown requested
    Shutdown,
}

/// Supervisor task body
pub(crate) async fn run_supervisor(
    shared: Arc<Shared>,
    endpoint: Endpoint,
    ready: oneshot::Sender<Result<()>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let settings = &shared.settings;
    let mut ready = Some(ready);
    let mut backoff =
        ReconnectBackoff::new(settings.reconnect_base_delay(), settings.max_reconnect_attempts);

    info!(url = %endpoint.url, "Starting hub connection");

    loop {
        let end = run_session(&shared, &endpoint, &mut ready, &mut shutdown, &mut backoff).await;

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Rejected(message) if settings.auth_failure == AuthFailurePolicy::Terminal => {
                error!(message = %message, "Hub rejected access token, not reconnecting");
                shared.dispatcher.notify_status(ConnectionStatus::AuthRejected { message });
                break;
            }
            SessionEnd::Fatal(message) => {
                error!(message = %message, "Unrecoverable connection error, not reconnecting");
                shared.dispatcher.notify_status(ConnectionStatus::Stopped { message });
                break;
            }
            SessionEnd::Rejected(message) | SessionEnd::Lost(message) => {
                debug!(reason = %message, "Session ended");
            }
        }

        let Some(delay) = backoff.next_backoff() else {
            let attempts = backoff.attempts();
            warn!(attempts, "Reconnect attempts exhausted, giving up");
            shared
                .dispatcher
                .notify_status(ConnectionStatus::ReconnectExhausted { attempts });
            break;
        };

        {
            let mut state = shared.state.write();
            state.phase = ConnectionState::Reconnecting;
            state.reconnect_attempts = backoff.attempts();
        }
        info!(
            attempt = backoff.attempts(),
            max_attempts = backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to hub"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    settle(&mut ready, Err(Error::connection_lost("client disconnected")));
    shared.set_phase(ConnectionState::Disconnected);
    debug!("Connection supervisor stopped");
}

/// One transport lifetime
async fn run_session(
    shared: &Shared,
    endpoint: &Endpoint,
    ready: &mut Option<oneshot::Sender<Result<()>>>,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut ReconnectBackoff,
) -> SessionEnd {
    let settings = &shared.settings;
    shared.set_phase(ConnectionState::Connecting);

    let mut handshake = match Handshake::new(endpoint.token.as_deref()) {
        Ok(handshake) => handshake,
        Err(e) => return fail_before_login(shared, ready, e),
    };

    let opened = tokio::select! {
        opened = Transport::open(&endpoint.url, settings.connect_timeout()) => opened,
        _ = shutdown.changed() => return SessionEnd::Shutdown,
    };
    let mut transport = match opened {
        Ok(transport) => transport,
        Err(e) => {
            warn!(error = %e, "Failed to open hub socket");
            return fail_before_login(shared, ready, e);
        }
    };

    shared.set_phase(ConnectionState::Authenticating);
    let login = tokio::select! {
        login = tokio::time::timeout(settings.auth_timeout(), authenticate(&mut transport, &mut handshake)) => {
            login.unwrap_or(Err(Error::AuthenticationTimeout {
                timeout_ms: settings.auth_timeout_ms,
            }))
        }
        _ = shutdown.changed() => {
            transport.close().await;
            return SessionEnd::Shutdown;
        }
    };

    let ha_version = match login {
        Ok(ha_version) => ha_version,
        Err(e) => {
            transport.close().await;
            return fail_before_login(shared, ready, e);
        }
    };

    // Logged in: the standing subscription goes out before anything else
    backoff.reset();
    let subscription = shared.correlator.register();
    let subscribe = Command::subscribe_state_changed();
    let frame = match CommandFrame::new(subscription.id(), &subscribe).to_json() {
        Ok(frame) => frame,
        Err(e) => {
            transport.close().await;
            return fail_before_login(shared, ready, e.into());
        }
    };
    if let Err(e) = transport.send_text(frame).await {
        transport.close().await;
        return fail_before_login(shared, ready, e);
    }
    let subscription_id = subscription.id();
    tokio::spawn(async move {
        match subscription.wait().await {
            Ok(_) => debug!(id = subscription_id, "Subscribed to state changes"),
            Err(e) => warn!(id = subscription_id, error = %e, "State change subscription failed"),
        }
    });

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    *shared.outbound.lock() = Some(outbound_tx);
    {
        let mut state = shared.state.write();
        state.phase = ConnectionState::Connected;
        state.ha_version = ha_version.clone();
        state.reconnect_attempts = 0;
    }
    info!(ha_version = ?ha_version, "Authenticated with hub");
    shared.dispatcher.notify_status(ConnectionStatus::Connected);
    settle(ready, Ok(()));

    let (dead_tx, mut dead_rx) = mpsc::unbounded_channel::<u64>();
    let mut heartbeat = heartbeat_timer(settings.heartbeat_interval());
    let mut socket_error: Option<String> = None;

    let end = loop {
        tokio::select! {
            event = transport.next_event() => match event {
                Some(TransportEvent::Message(message)) => shared.route(message),
                Some(TransportEvent::Errored(e)) => {
                    warn!(error = %e, "Hub socket error");
                    socket_error = Some(e.to_string());
                }
                Some(TransportEvent::Closed { reason }) => {
                    let reason = reason.or(socket_error.take()).unwrap_or_else(|| "connection closed".to_string());
                    info!(reason = %reason, "Hub closed the connection");
                    break SessionEnd::Lost(reason);
                }
                None => break SessionEnd::Lost("connection closed".to_string()),
            },

            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = transport.send_text(frame).await {
                    warn!(error = %e, "Failed to send frame");
                    transport.close().await;
                    break SessionEnd::Lost(e.to_string());
                }
            }

            _ = tick(&mut heartbeat) => {
                if let Err(e) = send_heartbeat(shared, &mut transport, dead_tx.clone()).await {
                    warn!(error = %e, "Failed to send heartbeat");
                    transport.close().await;
                    break SessionEnd::Lost(e.to_string());
                }
            }

            Some(id) = dead_rx.recv() => {
                warn!(id, "Heartbeat unanswered, closing connection");
                transport.close().await;
                break SessionEnd::Lost("heartbeat timed out".to_string());
            }

            _ = shutdown.changed() => {
                info!("Disconnecting from hub");
                shared.set_phase(ConnectionState::ShuttingDown);
                transport.close().await;
                break SessionEnd::Shutdown;
            }
        }
    };

    drop(transport);
    teardown(shared, &end);
    end
}

/// Drive the handshake to completion on a fresh transport
async fn authenticate(transport: &mut Transport, handshake: &mut Handshake) -> Result<Option<String>> {
    loop {
        match transport.next_event().await {
            Some(TransportEvent::Message(message)) => match handshake.on_message(&message) {
                HandshakeStep::Reply(auth) => {
                    debug!("Sending credentials");
                    transport.send_text(auth.to_json()?).await?;
                }
                HandshakeStep::Authenticated { ha_version } => return Ok(ha_version),
                HandshakeStep::Rejected(message) => return Err(Error::auth_failed(message)),
                HandshakeStep::Ignored => {}
            },
            Some(TransportEvent::Errored(e)) => return Err(e),
            Some(TransportEvent::Closed { reason }) => {
                return Err(Error::connection_lost(
                    reason.unwrap_or_else(|| "closed during authentication".to_string()),
                ))
            }
            None => return Err(Error::connection_lost("closed during authentication")),
        }
    }
}

/// Every pending request fails and every listener hears about it
fn teardown(shared: &Shared, end: &SessionEnd) {
    let reason = match end {
        SessionEnd::Lost(reason) | SessionEnd::Rejected(reason) | SessionEnd::Fatal(reason) => {
            reason.clone()
        }
        SessionEnd::Shutdown => "client disconnected".to_string(),
    };

    // Close the outbound path first so no request can slip in after the drain
    shared.outbound.lock().take();
    {
        let mut state = shared.state.write();
        if state.phase != ConnectionState::ShuttingDown {
            state.phase = ConnectionState::Disconnected;
        }
    }

    let failed = shared
        .correlator
        .fail_all(|| Error::connection_lost(reason.clone()));
    if failed > 0 {
        info!(failed, "Failed pending requests on disconnect");
    }

    shared
        .dispatcher
        .notify_status(ConnectionStatus::Disconnected { reason });
}

fn fail_before_login(
    shared: &Shared,
    ready: &mut Option<oneshot::Sender<Result<()>>>,
    error: Error,
) -> SessionEnd {
    let end = match &error {
        Error::AuthenticationFailed { message } => SessionEnd::Rejected(message.clone()),
        other if other.is_fatal() => SessionEnd::Fatal(other.to_string()),
        other => SessionEnd::Lost(other.to_string()),
    };
    teardown(shared, &end);
    settle(ready, Err(error));
    end
}

/// Resolve the waiting `connect()` call, at most once
fn settle(ready: &mut Option<oneshot::Sender<Result<()>>>, outcome: Result<()>) {
    if let Some(tx) = ready.take() {
        let _ = tx.send(outcome);
    }
}

fn heartbeat_timer(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn send_heartbeat(
    shared: &Shared,
    transport: &mut Transport,
    dead_tx: mpsc::UnboundedSender<u64>,
) -> Result<()> {
    let pending = shared.correlator.register();
    let id = pending.id();
    transport
        .send_text(CommandFrame::new(id, &Command::Ping).to_json()?)
        .await?;
    trace!(id, "Heartbeat sent");

    tokio::spawn(async move {
        if let Err(Error::RequestTimeout { .. }) = pending.wait().await {
            let _ = dead_tx.send(id);
        }
    });
    Ok(())
}
