use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::auth::TokenProvider;
use crate::common::{ChatMessage, NetworkCommand, NetworkEvent, UserId};
use crate::network::publisher::{self, SendError};
use crate::network::{ChatClient, ConnectionSettings};

const CHANNEL_CAPACITY: usize = 100;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Chat state owned by one view, keyed by (local user, endpoint).
///
/// Owns the network task, the connectivity flag and the live buffer. The
/// buffer is never edited in place: every append swaps in a new snapshot, so
/// a snapshot obtained from [`ChatSession::messages`] stays stable.
pub struct ChatSession {
    local_user: Option<UserId>,
    endpoint: Url,
    tokens: Option<Arc<dyn TokenProvider>>,
    connected: bool,
    live: Arc<Vec<ChatMessage>>,
    command_sender: Option<mpsc::Sender<NetworkCommand>>,
    event_receiver: Option<mpsc::Receiver<NetworkEvent>>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Spawns the network task. Without a local user nothing is spawned and
    /// the session stays disconnected. Must be called within a tokio runtime.
    pub fn open(
        settings: ConnectionSettings,
        local_user: Option<UserId>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let mut session = Self::idle(local_user, settings.endpoint.clone());
        session.tokens = Some(tokens.clone());

        let Some(user) = local_user else {
            log::info!("No local user; chat connection disabled");
            return session;
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let client = ChatClient::new(settings, user, tokens, event_tx, cmd_rx);
        session.task = Some(tokio::spawn(client.run()));
        session.command_sender = Some(cmd_tx);
        session.event_receiver = Some(event_rx);
        session
    }

    /// Attaches to a network task driven elsewhere.
    pub fn with_channels(
        local_user: Option<UserId>,
        endpoint: Url,
        command_sender: mpsc::Sender<NetworkCommand>,
        event_receiver: mpsc::Receiver<NetworkEvent>,
    ) -> Self {
        let mut session = Self::idle(local_user, endpoint);
        session.command_sender = Some(command_sender);
        session.event_receiver = Some(event_receiver);
        session
    }

    fn idle(local_user: Option<UserId>, endpoint: Url) -> Self {
        Self {
            local_user,
            endpoint,
            tokens: None,
            connected: false,
            live: Arc::new(Vec::new()),
            command_sender: None,
            event_receiver: None,
            task: None,
        }
    }

    pub fn local_user(&self) -> Option<UserId> {
        self.local_user
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Current live buffer snapshot.
    pub fn messages(&self) -> Arc<Vec<ChatMessage>> {
        Arc::clone(&self.live)
    }

    /// Applies every event already queued, without waiting. Returns how many
    /// were applied.
    pub fn handle_network_events(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(receiver) = self.event_receiver.as_mut() {
            while let Ok(event) = receiver.try_recv() {
                pending.push(event);
            }
        }
        let applied = pending.len();
        for event in pending {
            self.apply(event);
        }
        applied
    }

    /// Waits for the next event, applies it and hands it back. `None` once
    /// the session is closed or the network task has ended.
    pub async fn next_event(&mut self) -> Option<NetworkEvent> {
        let event = self.event_receiver.as_mut()?.recv().await?;
        self.apply(event.clone());
        Some(event)
    }

    fn apply(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected => {
                log::info!("Chat connected as user {:?}", self.local_user);
                self.connected = true;
            }
            NetworkEvent::Disconnected => {
                log::info!("Chat disconnected");
                self.connected = false;
            }
            NetworkEvent::MessageReceived(message) => self.append(message),
        }
    }

    fn append(&mut self, message: ChatMessage) {
        let mut next = Vec::with_capacity(self.live.len() + 1);
        next.extend_from_slice(&self.live);
        next.push(message);
        self.live = Arc::new(next);
    }

    /// Publishes `content` to `recipient` and echoes it into the live buffer.
    ///
    /// Fire-and-forget: there is no acknowledgement and nothing is resent
    /// after a reconnect. On any error the buffer is left untouched.
    pub fn send(&mut self, recipient: UserId, content: &str) -> Result<ChatMessage, SendError> {
        let result = self.try_send(recipient, content);
        if let Err(err) = &result {
            log::error!("Cannot send message: {err}");
        }
        result
    }

    fn try_send(&mut self, recipient: UserId, content: &str) -> Result<ChatMessage, SendError> {
        let message =
            publisher::prepare_outgoing(self.local_user, self.connected, recipient, content, Utc::now())?;
        let sender = self.command_sender.as_ref().ok_or(SendError::Closed)?;
        sender
            .try_send(NetworkCommand::Publish(message.clone()))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SendError::Busy,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })?;
        self.append(message.clone());
        Ok(message)
    }

    /// Drops the live buffer, e.g. when the view switches to another peer.
    pub fn clear_messages(&mut self) {
        self.live = Arc::new(Vec::new());
    }

    /// Points the session at another identity or endpoint.
    ///
    /// When either changed, the old connection and buffer are torn down and
    /// a fresh session is opened; otherwise nothing happens. Returns whether
    /// a rebuild took place.
    pub fn rebind(&mut self, settings: ConnectionSettings, local_user: Option<UserId>) -> bool {
        if self.local_user == local_user && self.endpoint == settings.endpoint {
            return false;
        }
        let Some(tokens) = self.tokens.clone() else {
            log::warn!("Session has no token provider; cannot rebind");
            return false;
        };
        log::info!(
            "Rebinding chat session to user {:?} at {}",
            local_user,
            settings.endpoint
        );
        self.close();
        *self = Self::open(settings, local_user, tokens);
        true
    }

    /// Tears the connection down immediately. Safe to call any number of
    /// times, including on a session that never connected.
    ///
    /// The task is aborted before it can say DISCONNECT; use
    /// [`ChatSession::shutdown`] for a polite goodbye.
    pub fn close(&mut self) {
        self.command_sender = None;
        self.event_receiver = None;
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Network task aborted");
        }
        self.connected = false;
    }

    /// Like [`ChatSession::close`] but lets the network task say DISCONNECT
    /// to the broker first.
    pub async fn shutdown(&mut self) {
        if let Some(sender) = self.command_sender.take() {
            if sender.send(NetworkCommand::Disconnect).await.is_err() {
                log::debug!("Network task already gone");
            }
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                log::warn!("Network task did not stop in time; aborting");
                task.abort();
            }
        }
        self.close();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}
