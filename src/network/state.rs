/// Lifecycle of the broker connection. Callers only ever see
/// [`ConnectionState::is_connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Activate,
    ConnectSucceeded,
    ConnectFailed,
    HeartbeatTimeout,
    TransportClosed,
    Deactivate,
}

impl ConnectionState {
    pub fn apply(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (_, ConnectFailed | HeartbeatTimeout | TransportClosed | Deactivate) => Disconnected,
            (Disconnected, Activate) => Connecting,
            (Connecting, ConnectSucceeded) => Connected,
            // Out of order events leave the state alone.
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}
