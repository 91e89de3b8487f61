//! Configuration for the Traction Rec import.
//!
//! Fixed parameters live in the unit structs below; everything an operator can
//! tune without a redeploy lives in [`Settings`], which is loaded from a JSON
//! file once per process and injected into the components.

use crate::atomic::{read_json, write_json};
use crate::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Import pipeline constants.
pub struct ImportConfig;

impl ImportConfig {
    pub const DEFAULT_MIGRATE_GROUP: &'static str = "tr_import";
    pub const DEFAULT_BACKUP_LIMIT: usize = 15;
    pub const DEFAULT_MIGRATE_COMMAND: &'static str = "drush";
    /// Environment variable carrying the snapshot directory to the migration command.
    pub const JSON_DIR_ENV: &'static str = "TRACTION_REC_JSON_DIR";
    /// `chrono` format of snapshot directory names.
    pub const SNAPSHOT_DIR_FORMAT: &'static str = "%Y%m%d_%H%M%S";
    /// Node bundle removed by the session flush.
    pub const SESSION_BUNDLE: &'static str = "session";
    pub const ORPHAN_BATCH_SIZE: usize = 50;
    pub const DEFAULT_ORPHAN_LIMIT: usize = 5000;
    pub const QUEUE_NAME: &'static str = "openy_traction_rec_import";
    pub const QUEUE_LEASE: Duration = Duration::from_secs(3600);
}

/// State database (lock and queue) parameters.
pub struct StateDbConfig;

impl StateDbConfig {
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
    pub const DIR_NAME: &'static str = "traction-rec";
    pub const STATE_DB_FILENAME: &'static str = "state.db";
    pub const CONTENT_DB_FILENAME: &'static str = "content.db";
    pub const SETTINGS_FILENAME: &'static str = "settings.json";
}

/// Remote API parameters.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_API_VERSION: &'static str = "v49.0";
    pub const USER_AGENT: &'static str = concat!("traction-rec-import/", env!("CARGO_PKG_VERSION"));
    /// Upper bound on `nextRecordsUrl` hops for one query.
    pub const MAX_QUERY_PAGES: usize = 500;
    pub const ACCESS_TOKEN_ENV: &'static str = "TRACTION_REC_ACCESS_TOKEN";
}

/// Operator-tunable settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub import_enabled: bool,
    pub fetcher_enabled: bool,
    pub backup_enabled: bool,
    /// Number of most recent backups kept by the retention sweep.
    pub backup_limit: usize,
    pub migrate_group: String,
    /// Program invoked for migration status/import/rollback.
    pub migrate_command: String,
    /// Extra leading arguments for `migrate_command` (e.g. `--root=/var/www`).
    pub migrate_command_args: Vec<String>,
    /// Where the fetcher writes new snapshot directories.
    pub json_directory: PathBuf,
    /// Where imported snapshots are archived and pruned.
    pub backup_directory: PathBuf,
    pub state_db_path: PathBuf,
    pub content_db_path: PathBuf,

    // Remote service credentials. The fetcher reads `services_base_url`,
    // `access_token` and `api_version`; the JWT login fields are optional and
    // only round-trip through the settings file.
    pub consumer_key: String,
    pub consumer_secret: String,
    pub login_user: String,
    pub login_url: String,
    pub services_base_url: String,
    pub community_url: String,
    pub private_key: String,
    pub access_token: Option<String>,
    pub api_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            import_enabled: false,
            fetcher_enabled: false,
            backup_enabled: true,
            backup_limit: ImportConfig::DEFAULT_BACKUP_LIMIT,
            migrate_group: ImportConfig::DEFAULT_MIGRATE_GROUP.to_string(),
            migrate_command: ImportConfig::DEFAULT_MIGRATE_COMMAND.to_string(),
            migrate_command_args: Vec::new(),
            json_directory: data_dir.join("json"),
            backup_directory: data_dir.join("backup"),
            state_db_path: data_dir.join(StateDbConfig::STATE_DB_FILENAME),
            content_db_path: data_dir.join(StateDbConfig::CONTENT_DB_FILENAME),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            login_user: String::new(),
            login_url: String::new(),
            services_base_url: String::new(),
            community_url: String::new(),
            private_key: String::new(),
            access_token: None,
            api_version: NetworkConfig::DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = read_json::<Settings>(path)?.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    /// Persist settings atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        write_json(path, self)
    }

    /// Check invariants the components rely on.
    pub fn validate(&self) -> Result<()> {
        if self.backup_limit == 0 {
            return Err(ImportError::Config {
                message: "backup_limit must be a positive integer".to_string(),
            });
        }
        if self.migrate_group.trim().is_empty() {
            return Err(ImportError::MissingSetting("migrate_group"));
        }

        if self.fetcher_enabled {
            if self.services_base_url.trim().is_empty() {
                return Err(ImportError::MissingSetting("services_base_url"));
            }
            if self.resolved_access_token().is_none() {
                return Err(ImportError::MissingSetting("access_token"));
            }
        }

        Ok(())
    }

    /// Bearer token for the remote API: `access_token`, else the
    /// `TRACTION_REC_ACCESS_TOKEN` environment variable.
    pub fn resolved_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(NetworkConfig::ACCESS_TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

/// Default settings file location (`<config dir>/traction-rec/settings.json`).
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(StateDbConfig::DIR_NAME)
        .join(StateDbConfig::SETTINGS_FILENAME)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(StateDbConfig::DIR_NAME)
}
