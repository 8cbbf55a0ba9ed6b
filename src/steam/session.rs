//! Connection/log-on lifecycle for the single Steam session.
//!
//! State changes come from two places: the transition methods below (which move
//! into the "in flight" states and kick off the transport call) and the handlers
//! registered on the [`EventBus`], which complete transitions when the callback
//! arrives. Waiting is done on a `watch` channel, so callers suspend without
//! polling and can be cancelled at any point.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EventBus, EventKind, SteamEvent};
use super::transport::SteamTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    LoggingOn,
    LoggedOn,
    Disconnecting,
    Disconnected,
    LoggedOff,
}

impl SessionState {
    /// The transport link is up, whatever the log-on status.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::LoggingOn
                | SessionState::LoggedOn
                | SessionState::LoggedOff
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::LoggingOn => "logging_on",
            SessionState::LoggedOn => "logged_on",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
            SessionState::LoggedOff => "logged_off",
        };
        f.write_str(s)
    }
}

/// Where an inbound callback moves the session, or `None` if it is stale.
pub fn next_state(current: SessionState, event: &SteamEvent) -> Option<SessionState> {
    use SessionState::*;
    match (event, current) {
        (SteamEvent::Connected, Connecting) => Some(Connected),
        (SteamEvent::Disconnected { .. }, Idle | Disconnected) => None,
        (SteamEvent::Disconnected { .. }, _) => Some(Disconnected),
        (SteamEvent::LoggedOn { success: true, .. }, LoggingOn) => Some(LoggedOn),
        (SteamEvent::LoggedOn { success: false, .. }, LoggingOn) => Some(Connected),
        (SteamEvent::LoggedOff { .. }, LoggingOn | LoggedOn) => Some(LoggedOff),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{op} wait cancelled")]
    Cancelled { op: &'static str },
    #[error("{op} did not complete within {after:?}")]
    TimedOut { op: &'static str, after: Duration },
    #[error("connection attempt failed")]
    ConnectFailed,
    #[error("anonymous log-on rejected")]
    LogOnRejected,
    #[error("session is not connected (state: {0})")]
    NotConnected(SessionState),
    #[error("connection lost during {op}")]
    ConnectionLost { op: &'static str },
    #[error("transport call failed: {0:#}")]
    Transport(anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Upper bound for each transition wait; `None` waits until cancelled.
    pub wait_timeout: Option<Duration>,
}

pub struct SteamSession {
    transport: Arc<dyn SteamTransport>,
    state: Arc<watch::Sender<SessionState>>,
    config: SessionConfig,
}

impl SteamSession {
    pub fn new(transport: Arc<dyn SteamTransport>, config: SessionConfig) -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self {
            transport,
            state: Arc::new(tx),
            config,
        }
    }

    /// Subscribes the session's callback handlers on `bus`.
    pub fn register(&self, bus: &mut EventBus) {
        for kind in [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::LoggedOn,
            EventKind::LoggedOff,
        ] {
            let state = self.state.clone();
            bus.subscribe(kind, move |event| {
                if let SteamEvent::LoggedOn {
                    success: false,
                    detail,
                } = event
                {
                    warn!(detail = ?detail, "steam rejected anonymous log-on");
                }
                state.send_if_modified(|current| match next_state(*current, event) {
                    Some(next) if next != *current => {
                        debug!(from = %current, to = %next, kind = %event.kind(), "session transition");
                        *current = next;
                        true
                    }
                    _ => false,
                });
            });
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_logged_on(&self) -> bool {
        self.state() == SessionState::LoggedOn
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn SteamTransport> {
        &self.transport
    }

    fn set(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "session transition");
        }
    }

    async fn wait_until<F>(
        &self,
        op: &'static str,
        shutdown: &CancellationToken,
        done: F,
    ) -> Result<SessionState, SessionError>
    where
        F: Fn(SessionState) -> bool,
    {
        let mut rx = self.state.subscribe();
        let limit = self.config.wait_timeout;
        let waited = async {
            let reached = rx.wait_for(|s| done(*s)).await.map(|s| *s);
            reached.map_err(|_| SessionError::ConnectionLost { op })
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(SessionError::Cancelled { op }),
            res = async {
                match limit {
                    Some(after) => tokio::time::timeout(after, waited)
                        .await
                        .unwrap_or(Err(SessionError::TimedOut { op, after })),
                    None => waited.await,
                }
            } => res,
        }
    }

    /// Puts `in_flight` back to `fallback` when a wait for its callback was
    /// abandoned, so the next call sends the request again. A callback that
    /// already moved the state on wins.
    fn abandon(&self, in_flight: SessionState, fallback: SessionState) {
        let rolled_back = self.state.send_if_modified(|s| {
            if *s == in_flight {
                *s = fallback;
                true
            } else {
                false
            }
        });
        if rolled_back {
            debug!(from = %in_flight, to = %fallback, "abandoned wait rolled back");
        }
    }

    /// Connects unless already connected. Resets session state at the start of
    /// every fresh attempt; a timed-out or cancelled attempt is rolled back.
    pub async fn connect(&self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        let mut current = self.state();
        if current.is_connected() {
            return Ok(());
        }
        if current == SessionState::Disconnecting {
            current = self
                .wait_until("disconnect", shutdown, |s| s != SessionState::Disconnecting)
                .await?;
            if current.is_connected() {
                return Ok(());
            }
        }
        let started = current != SessionState::Connecting;
        if started {
            self.set(SessionState::Connecting);
            info!("connecting to steam");
            if let Err(e) = self.transport.connect().await {
                self.set(SessionState::Disconnected);
                return Err(SessionError::Transport(e));
            }
        }
        let reached = match self
            .wait_until("connect", shutdown, |s| s != SessionState::Connecting)
            .await
        {
            Ok(reached) => reached,
            Err(e) => {
                if started {
                    self.abandon(SessionState::Connecting, current);
                }
                return Err(e);
            }
        };
        if reached.is_connected() {
            info!("connected to steam");
            Ok(())
        } else {
            Err(SessionError::ConnectFailed)
        }
    }

    /// Anonymous log-on; no-op when already logged on.
    pub async fn log_on(&self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        let started = match self.state() {
            SessionState::LoggedOn => return Ok(()),
            SessionState::LoggingOn => false,
            SessionState::Connected | SessionState::LoggedOff => {
                self.set(SessionState::LoggingOn);
                info!("logging on anonymously");
                if let Err(e) = self.transport.log_on_anonymous().await {
                    self.set(SessionState::Connected);
                    return Err(SessionError::Transport(e));
                }
                true
            }
            other => return Err(SessionError::NotConnected(other)),
        };
        let reached = match self
            .wait_until("log_on", shutdown, |s| s != SessionState::LoggingOn)
            .await
        {
            Ok(reached) => reached,
            Err(e) => {
                if started {
                    self.abandon(SessionState::LoggingOn, SessionState::Connected);
                }
                return Err(e);
            }
        };
        match reached {
            SessionState::LoggedOn => {
                info!("logged on");
                Ok(())
            }
            SessionState::Connected => Err(SessionError::LogOnRejected),
            _ => Err(SessionError::ConnectionLost { op: "log_on" }),
        }
    }

    /// Disconnects from any connected state; no-op otherwise.
    pub async fn disconnect(&self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        let current = self.state();
        if current.is_connected() {
            self.set(SessionState::Disconnecting);
            info!("disconnecting from steam");
            if let Err(e) = self.transport.disconnect().await {
                self.set(current);
                return Err(SessionError::Transport(e));
            }
        } else if current != SessionState::Disconnecting {
            return Ok(());
        }
        self.wait_until("disconnect", shutdown, |s| s != SessionState::Disconnecting)
            .await?;
        info!("disconnected");
        Ok(())
    }

    /// Logs off from `LoggedOn`; no-op otherwise.
    pub async fn log_off(&self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        if self.state() != SessionState::LoggedOn {
            return Ok(());
        }
        info!("logging off");
        self.transport
            .log_off()
            .await
            .map_err(SessionError::Transport)?;
        self.wait_until("log_off", shutdown, |s| s != SessionState::LoggedOn)
            .await?;
        Ok(())
    }
}
