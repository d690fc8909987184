use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::append::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMESTAMP_COLUMN};
use crate::error::IngestError;
use crate::normalize::{default_rules, validate_rules, NormalizeRule};
use crate::reconcile::CommitMode;
use crate::routing::{default_multi_sheet, EntityRouter, UnknownSheetPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "rawsync.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sftp: SftpConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub append: AppendConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Replaces the built-in rule set when present.
    #[serde(default = "default_rules")]
    pub normalize: Vec<NormalizeRule>,
    #[serde(default)]
    pub sites: SitesConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sftp: SftpConfig::default(),
            paths: PathsConfig::default(),
            database: DatabaseConfig::default(),
            append: AppendConfig::default(),
            routing: RoutingConfig::default(),
            normalize: default_rules(),
            sites: SitesConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// SFTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SftpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_known_hosts")]
    pub known_hosts: String,
    #[serde(default)]
    pub trust_on_first_use: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: None,
            private_key: None,
            passphrase: None,
            known_hosts: default_known_hosts(),
            trust_on_first_use: false,
            connect_timeout_secs: default_connect_timeout(),
            io_timeout_secs: default_io_timeout(),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_known_hosts() -> String {
    "~/.ssh/known_hosts".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_io_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Paths + database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            remote_dir: default_remote_dir(),
            staging_dir: default_staging_dir(),
            lock_file: default_lock_file(),
        }
    }
}

fn default_remote_dir() -> String {
    "upload/".to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("var/files/")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("var/rawsync.lock")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database")]
    pub path: PathBuf,
    #[serde(default)]
    pub commit_mode: CommitMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database(),
            commit_mode: CommitMode::default(),
        }
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("var/rawsync.db")
}

// ---------------------------------------------------------------------------
// Append + routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppendConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            timestamp_column: default_timestamp_column(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_timestamp_column() -> String {
    DEFAULT_TIMESTAMP_COLUMN.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// `{ file stem: { sheet name: entity } }`
    #[serde(default = "default_multi_sheet")]
    pub multi_sheet: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub unknown_sheets: UnknownSheetPolicy,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            multi_sheet: default_multi_sheet(),
            unknown_sheets: UnknownSheetPolicy::default(),
        }
    }
}

impl RoutingConfig {
    pub fn router(&self) -> EntityRouter {
        EntityRouter::new(self.multi_sheet.clone(), self.unknown_sheets)
    }
}

// ---------------------------------------------------------------------------
// Sites API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SitesConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_fullname")]
    pub fullname: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sites_timeout")]
    pub timeout_secs: u64,
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            fullname: default_fullname(),
            email: String::new(),
            password: None,
            batch_size: default_batch_size(),
            timeout_secs: default_sites_timeout(),
        }
    }
}

fn default_fullname() -> String {
    "rawsync".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_sites_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, IngestError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`. A missing file is only an error when `required`;
    /// otherwise the built-in defaults apply.
    pub fn load(path: &Path, required: bool) -> Result<Self, IngestError> {
        match std::fs::read_to_string(path) {
            Ok(input) => Self::from_toml(&input)
                .map_err(|e| IngestError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                log::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(IngestError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.append.chunk_size == 0 {
            return Err(IngestError::Config("append.chunk_size must be > 0".into()));
        }
        if self.append.timestamp_column.trim().is_empty() {
            return Err(IngestError::Config(
                "append.timestamp_column must not be empty".into(),
            ));
        }
        if self.sites.batch_size == 0 {
            return Err(IngestError::Config("sites.batch_size must be > 0".into()));
        }
        if self.sftp.port == 0 {
            return Err(IngestError::Config("sftp.port must be > 0".into()));
        }

        for (file, sheets) in &self.routing.multi_sheet {
            if sheets.is_empty() {
                return Err(IngestError::Config(format!(
                    "routing.multi_sheet.{file}: at least one sheet is required"
                )));
            }
            for (sheet, entity) in sheets {
                if entity.trim().is_empty() {
                    return Err(IngestError::Config(format!(
                        "routing.multi_sheet.{file}: sheet '{sheet}' has no entity"
                    )));
                }
            }
        }

        validate_rules(&self.normalize)?;
        Ok(())
    }

    /// Overlay environment variables (the process environment wins over the
    /// file).
    pub fn apply_env(&mut self) -> Result<(), IngestError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), IngestError> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(host) = get("SFTP_API_HOST") {
            self.sftp.host = host;
        }
        if let Some(username) = get("SFTP_API_USERNAME") {
            self.sftp.username = username;
        }
        if let Some(password) = get("SFTP_API_PASSWORD") {
            self.sftp.password = Some(password);
        }
        if let Some(port) = get("SFTP_API_PORT") {
            self.sftp.port = port
                .parse()
                .map_err(|_| IngestError::Config(format!("SFTP_API_PORT: invalid port {port:?}")))?;
        }
        if let Some(url) = get("SITES_API_URL") {
            self.sites.base_url = url;
        }
        if let Some(password) = get("SITES_API_PASSWORD") {
            self.sites.password = Some(password);
        }
        if let Some(path) = get("RAWSYNC_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
