use crate::application::action_bus::DEFAULT_BUFFER_LIMIT;
use crate::domain::{Backoff, IceServer};
use instant::Duration;

/// How the signaling client retries a lost relay connection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// `None` retries until the session is left
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_delay, self.max_delay, self.multiplier)
    }
}

/// Configuration for a peer session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay WebSocket URL
    pub signaling_url: String,

    pub ice_servers: Vec<IceServer>,

    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,

    pub reconnect: ReconnectPolicy,

    /// Unhandled envelopes kept per sender
    pub buffer_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:3030/ws".to_string(),
            ice_servers: IceServer::default_stun_servers(),
            poll_interval_ms: 50,
            reconnect: ReconnectPolicy::default(),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }
}

impl SessionConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Add a TURN relay next to the configured STUN servers
    pub fn with_turn_server(
        mut self,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.ice_servers
            .push(IceServer::turn(url, username, credential));
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }
}
