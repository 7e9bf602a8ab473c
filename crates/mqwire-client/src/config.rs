//! Client configuration types.

use std::time::Duration;

use mqwire_core::packet::Will;

/// Client configuration.
///
/// The broker address is not part of the config: the transport handed
/// to [`Client::new`](crate::Client::new) already knows where it points.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client identifier. Empty means the broker assigns one (requires
    /// a clean session).
    pub client_id: String,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<Vec<u8>>,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    /// Clean session flag.
    pub clean_session: bool,
    /// Will message the broker publishes on an ungraceful disconnect.
    pub will: Option<Will>,
    /// How long to wait for CONNACK after sending CONNECT.
    pub connect_timeout: Duration,
    /// How long an unacknowledged QoS 1/2 packet waits before retransmit.
    pub retry_interval: Duration,
    /// Retransmissions allowed per publish before it fails.
    pub max_retries: u32,
    /// How long a cancelled or failed packet ID stays reserved before
    /// it can be allocated again.
    pub id_quarantine: Duration,
    /// Largest inbound packet accepted (0 = protocol maximum).
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            will: None,
            connect_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
            max_retries: 3,
            id_quarantine: Duration::from_secs(30),
            max_packet_size: 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given client ID.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Set username and password.
    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep-alive interval in seconds (0 disables keep-alive).
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the will message.
    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    /// Set how long to wait for CONNACK.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the retransmission interval for unacknowledged publishes.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set how many retransmissions a publish gets before failing.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set how long cancelled packet IDs stay reserved.
    pub fn id_quarantine(mut self, quarantine: Duration) -> Self {
        self.id_quarantine = quarantine;
        self
    }

    /// Set the largest inbound packet accepted (0 = protocol maximum).
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }
}
