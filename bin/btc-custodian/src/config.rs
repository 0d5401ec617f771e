use std::path::PathBuf;

use btc_custodian::CustodianConfig;
use btc_custodian_db::DbConfig;
use serde::{Deserialize, Serialize};

/// The configuration values that dictate the behavior of the custodian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Config {
    /// The SQLite database file. Created on first use.
    pub database_path: PathBuf,

    /// The configuration for the sqlite3 database.
    #[serde(default)]
    pub db: DbConfig,

    /// Credential lifetime and address index tuning.
    #[serde(default)]
    pub custodian: CustodianConfig,
}

impl Config {
    /// Connection URL of [`Self::database_path`].
    pub(crate) fn database_url(&self) -> String {
        format!("sqlite://{}", self.database_path.display())
    }
}
