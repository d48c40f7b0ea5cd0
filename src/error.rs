//! Error taxonomy shared by the cloud client and the synchronization core.
//!
//! Each variant maps to one recovery policy in the orchestrator:
//! `Auth` forces a token renewal, `Network` and `Parse` skip the iteration,
//! `Resolution` keeps the prior device config, `Write` leaves the indicator
//! state untouched but still exports the cycle.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Bad credentials, rejected or expired token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Timeout, connection failure, unexpected status or undecodable body.
    #[error("network error: {0}")]
    Network(String),

    /// No device or parameters could be discovered.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// Non-success or unconfirmed parameter write.
    #[error("write failed: {0}")]
    Write(String),

    /// Synchronization value is not numeric.
    #[error("unparseable synchronization value: {0}")]
    Parse(String),
}

impl SyncError {
    /// True for errors that mean the token should be renewed.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Network(format!("request timed out: {}", e))
        } else if e.is_decode() {
            SyncError::Network(format!("malformed response body: {}", e))
        } else {
            SyncError::Network(e.to_string())
        }
    }
}
