//! Custodian tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long an issued credential stays valid.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Attempts made to advance a wallet's address index before giving up.
pub const DEFAULT_MAX_INDEX_RETRIES: usize = 8;

/// Configuration of a [`Custodian`](crate::Custodian).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianConfig {
    #[serde(default = "default_credential_ttl")]
    credential_ttl: Duration,
    #[serde(default = "default_max_index_retries")]
    max_index_retries: usize,
}

const fn default_credential_ttl() -> Duration {
    DEFAULT_CREDENTIAL_TTL
}

const fn default_max_index_retries() -> usize {
    DEFAULT_MAX_INDEX_RETRIES
}

impl Default for CustodianConfig {
    fn default() -> Self {
        Self {
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
            max_index_retries: DEFAULT_MAX_INDEX_RETRIES,
        }
    }
}

impl CustodianConfig {
    /// Sets the lifetime of issued credentials.
    pub fn with_credential_ttl(self, ttl: Duration) -> Self {
        Self {
            credential_ttl: ttl,
            ..self
        }
    }

    /// Sets how many times an address index update is attempted.
    ///
    /// At least one attempt is always made.
    pub fn with_max_index_retries(self, retries: usize) -> Self {
        Self {
            max_index_retries: retries.max(1),
            ..self
        }
    }

    /// Lifetime of issued credentials.
    pub const fn credential_ttl(&self) -> Duration {
        self.credential_ttl
    }

    /// Attempts made to advance an address index.
    pub const fn max_index_retries(&self) -> usize {
        self.max_index_retries
    }
}
