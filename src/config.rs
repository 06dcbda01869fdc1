/// Recovery service configuration
///
/// Passed to the facade on construction. At least one server endpoint is
/// required for retransmission to function; with both configured the
/// supervisor alternates between them across reconnect attempts.

use std::time::Duration;

/// One retransmission server endpoint with its login credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryServerConfig {
    pub ip: String,
    pub port: u16,
    /// Session id assigned by the exchange.
    pub session_id: u16,
    /// Numeric session password; feeds the login check code.
    pub password: u32,
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub primary: Option<RecoveryServerConfig>,
    pub backup: Option<RecoveryServerConfig>,
    /// Socket receive timeout; bounds how long shutdown can go unnoticed.
    pub recv_timeout: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            primary: None,
            backup: None,
            recv_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl RecoveryConfig {
    /// Convenience constructor for the common single-server setup.
    pub fn with_primary(server: RecoveryServerConfig) -> Self {
        RecoveryConfig {
            primary: Some(server),
            ..Default::default()
        }
    }

    pub fn has_endpoint(&self) -> bool {
        self.primary.is_some() || self.backup.is_some()
    }
}
