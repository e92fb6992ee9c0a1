pub mod client;
pub mod publisher;
pub mod reconnect;
pub mod sockjs;
pub mod state;
pub mod stomp;
pub mod subscription;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

pub use client::ChatClient;
pub use publisher::{SEND_DESTINATION, SendError};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectPolicy};
pub use state::ConnectionState;
pub use subscription::private_queue_for;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(4);

/// Everything the network task needs to reach the broker.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub endpoint: Url,
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub reconnect: Arc<dyn ReconnectPolicy>,
}

impl ConnectionSettings {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            heartbeat_outgoing: DEFAULT_HEARTBEAT,
            heartbeat_incoming: DEFAULT_HEARTBEAT,
            reconnect: Arc::new(FixedDelay::default()),
        }
    }

    pub fn with_heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing = outgoing;
        self.heartbeat_incoming = incoming;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.reconnect = Arc::new(policy);
        self
    }

    pub fn heartbeat(&self) -> stomp::Heartbeat {
        stomp::Heartbeat {
            outgoing: self.heartbeat_outgoing,
            incoming: self.heartbeat_incoming,
        }
    }
}
