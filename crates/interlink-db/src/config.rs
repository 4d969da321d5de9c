//! Database configuration.
//!
//! Provides [`DbConfig`] with a default data directory and the on-disk
//! layout of the per-chain derivation files.

use std::path::PathBuf;

use interlink_core::ChainId;

/// File name of the local-safe derivation links of a chain.
pub const LOCAL_SAFE_FILE: &str = "local_safe.db";
/// File name of the cross-safe derivation links of a chain.
pub const CROSS_SAFE_FILE: &str = "cross_safe.db";

/// Configuration of the supervisor databases.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "interlink_db=trace").
    pub log_level: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("interlink");

        Self {
            data_dir,
            log_level: "info".to_string(),
        }
    }
}

impl DbConfig {
    /// Directory holding all databases of `chain`.
    pub fn chain_dir(&self, chain: ChainId) -> PathBuf {
        self.data_dir.join(format!("chain-{chain}"))
    }

    pub fn local_safe_path(&self, chain: ChainId) -> PathBuf {
        self.chain_dir(chain).join(LOCAL_SAFE_FILE)
    }

    pub fn cross_safe_path(&self, chain: ChainId) -> PathBuf {
        self.chain_dir(chain).join(CROSS_SAFE_FILE)
    }
}
