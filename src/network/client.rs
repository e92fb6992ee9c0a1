use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::auth::TokenProvider;
use crate::common::{NetworkCommand, NetworkEvent, UserId};

use super::ConnectionSettings;
use super::publisher;
use super::state::{ConnectionEvent, ConnectionState};
use super::stomp::{self, Frame, Heartbeat, StompError};
use super::subscription::Subscription;
use super::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("stomp protocol error: {0}")]
    Stomp(#[from] StompError),
    #[error("broker rejected connection: {0}")]
    Rejected(String),
    #[error("connection closed before CONNECTED")]
    ClosedDuringHandshake,
    #[error("unexpected {0} frame during handshake")]
    Unexpected(String),
}

struct Session {
    transport: Transport,
    subscription: Subscription,
    heartbeat: Heartbeat,
}

enum SessionEnd {
    Shutdown,
    Lost(ConnectionEvent),
}

/// The network task behind one chat session: connects, subscribes, keeps the
/// link alive and reconnects until the command channel goes away.
pub struct ChatClient {
    settings: ConnectionSettings,
    local_user: UserId,
    tokens: Arc<dyn TokenProvider>,
    http: reqwest::Client,
    event_sender: mpsc::Sender<NetworkEvent>,
    command_receiver: mpsc::Receiver<NetworkCommand>,
    state: ConnectionState,
}

impl ChatClient {
    pub fn new(
        settings: ConnectionSettings,
        local_user: UserId,
        tokens: Arc<dyn TokenProvider>,
        event_sender: mpsc::Sender<NetworkEvent>,
        command_receiver: mpsc::Receiver<NetworkCommand>,
    ) -> Self {
        Self {
            settings,
            local_user,
            tokens,
            http: reqwest::Client::new(),
            event_sender,
            command_receiver,
            state: ConnectionState::default(),
        }
    }

    pub async fn run(mut self) {
        log::info!(
            "Network event loop started for user {} at {}",
            self.local_user,
            self.settings.endpoint
        );
        let mut failures = 0u32;

        loop {
            self.transition(ConnectionEvent::Activate).await;
            let token = self.tokens.bearer_token().await;
            if token.is_none() {
                log::warn!("No bearer token available; connecting without credentials");
            }

            match self.connect(token.as_deref()).await {
                Ok(session) => {
                    failures = 0;
                    self.transition(ConnectionEvent::ConnectSucceeded).await;
                    match self.serve(session).await {
                        SessionEnd::Shutdown => {
                            self.transition(ConnectionEvent::Deactivate).await;
                            break;
                        }
                        SessionEnd::Lost(event) => self.transition(event).await,
                    }
                }
                Err(err) => {
                    log::warn!("Connection to {} failed: {err}", self.settings.endpoint);
                    self.transition(ConnectionEvent::ConnectFailed).await;
                }
            }

            let delay = self.settings.reconnect.next_delay(failures);
            failures = failures.saturating_add(1);
            log::info!("Reconnecting in {delay:?}");
            if !self.wait_before_retry(delay).await {
                break;
            }
        }

        log::info!("Network event loop stopped for user {}", self.local_user);
    }

    async fn transition(&mut self, event: ConnectionEvent) {
        let previous = self.state;
        self.state = previous.apply(event);
        log::debug!("Connection {previous:?} --{event:?}--> {:?}", self.state);

        if previous.is_connected() == self.state.is_connected() {
            return;
        }
        let notice = if self.state.is_connected() {
            NetworkEvent::Connected
        } else {
            log::info!("Disconnected from {}", self.settings.endpoint);
            NetworkEvent::Disconnected
        };
        if let Err(err) = self.event_sender.send(notice).await {
            log::debug!("Session no longer listening: {err}");
        }
    }

    async fn connect(&self, token: Option<&str>) -> Result<Session, ConnectError> {
        let endpoint = &self.settings.endpoint;
        let mut transport = Transport::open(endpoint, &self.http).await?;

        let host = endpoint.host_str().unwrap_or("localhost");
        let offer = self.settings.heartbeat();
        transport
            .send(&stomp::connect_frame(host, token, offer).encode())
            .await?;

        let connected = await_connected(&mut transport).await?;
        let heartbeat = offer.negotiate(connected.get("heart-beat"));
        log::info!(
            "STOMP session established over {} (version {}, heart-beat {:?})",
            transport.kind(),
            connected.get("version").unwrap_or("1.0"),
            heartbeat
        );

        let subscription = Subscription::for_user(self.local_user);
        transport
            .send(&subscription.subscribe_frame().encode())
            .await?;
        log::info!("Subscribed to {}", subscription.destination());

        Ok(Session {
            transport,
            subscription,
            heartbeat,
        })
    }

    async fn serve(&mut self, session: Session) -> SessionEnd {
        let Session {
            mut transport,
            subscription,
            heartbeat,
        } = session;
        let mut outgoing = ticker(heartbeat.outgoing);
        let mut watchdog = ticker(heartbeat.incoming);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => match command {
                    Some(NetworkCommand::Publish(message)) => {
                        let frame = match publisher::send_frame(&message) {
                            Ok(frame) => frame,
                            Err(err) => {
                                log::warn!("Failed to serialize message: {err}");
                                continue;
                            }
                        };
                        if let Err(err) = transport.send(&frame.encode()).await {
                            log::warn!("Publish error: {err}");
                            transport.close().await;
                            return SessionEnd::Lost(ConnectionEvent::TransportClosed);
                        }
                    }
                    Some(NetworkCommand::Disconnect) | None => {
                        if let Err(err) = transport.send(&stomp::disconnect_frame().encode()).await {
                            log::debug!("DISCONNECT not delivered: {err}");
                        }
                        transport.close().await;
                        return SessionEnd::Shutdown;
                    }
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(payloads)) => {
                        last_seen = Instant::now();
                        for payload in payloads {
                            if let Some(end) = self.dispatch(&subscription, &payload).await {
                                transport.close().await;
                                return end;
                            }
                        }
                    }
                    Ok(None) => {
                        log::warn!("Transport closed by peer");
                        return SessionEnd::Lost(ConnectionEvent::TransportClosed);
                    }
                    Err(err) => {
                        log::error!("Transport error: {err}");
                        transport.close().await;
                        return SessionEnd::Lost(ConnectionEvent::TransportClosed);
                    }
                },
                _ = tick(&mut outgoing) => {
                    if let Err(err) = transport.send(stomp::HEARTBEAT).await {
                        log::warn!("Heart-beat send failed: {err}");
                        transport.close().await;
                        return SessionEnd::Lost(ConnectionEvent::TransportClosed);
                    }
                }
                _ = tick(&mut watchdog) => {
                    let silence = last_seen.elapsed();
                    if silence > heartbeat.incoming * 2 {
                        log::warn!("No data from broker for {silence:?}; heart-beat timeout");
                        transport.close().await;
                        return SessionEnd::Lost(ConnectionEvent::HeartbeatTimeout);
                    }
                }
            }
        }
    }

    /// Handles one transport payload; `Some` ends the session.
    async fn dispatch(&self, subscription: &Subscription, payload: &str) -> Option<SessionEnd> {
        let frames = match stomp::decode_frames(payload) {
            Ok(frames) => frames,
            Err(err) => {
                log::error!("Dropping undecodable frame: {err}");
                return None;
            }
        };

        for frame in frames {
            match frame.command.as_str() {
                "MESSAGE" => {
                    let Some(message) = subscription.route(&frame) else {
                        continue;
                    };
                    if let Err(err) = self
                        .event_sender
                        .send(NetworkEvent::MessageReceived(message))
                        .await
                    {
                        log::debug!("Session no longer listening: {err}");
                    }
                }
                "ERROR" => {
                    log::error!("STOMP error: {}", describe_error(&frame));
                    return Some(SessionEnd::Lost(ConnectionEvent::TransportClosed));
                }
                other => log::debug!("Ignoring {other} frame"),
            }
        }
        None
    }

    /// Waits out the reconnect delay. `false` means shut down instead.
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.command_receiver.recv() => match command {
                    Some(NetworkCommand::Publish(message)) => {
                        log::warn!(
                            "Dropping message to {} while disconnected",
                            message.recipient_id
                        );
                    }
                    Some(NetworkCommand::Disconnect) | None => return false,
                },
            }
        }
    }
}

async fn await_connected(transport: &mut Transport) -> Result<Frame, ConnectError> {
    loop {
        let Some(payloads) = transport.recv().await? else {
            return Err(ConnectError::ClosedDuringHandshake);
        };
        for payload in payloads {
            for frame in stomp::decode_frames(&payload)? {
                match frame.command.as_str() {
                    "CONNECTED" => return Ok(frame),
                    "ERROR" => return Err(ConnectError::Rejected(describe_error(&frame))),
                    other => return Err(ConnectError::Unexpected(other.to_string())),
                }
            }
        }
    }
}

fn describe_error(frame: &Frame) -> String {
    match (frame.get("message"), frame.body.trim()) {
        (Some(message), "") => message.to_string(),
        (Some(message), body) => format!("{message}: {body}"),
        (None, body) => body.to_string(),
    }
}

fn ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
