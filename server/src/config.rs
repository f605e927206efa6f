//! Runtime configuration, read from a TOML file.
//!
//! Every field has a default, an empty file is a valid configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::handler::HandlerKind;
use crate::pool::PoolSettings;

/// Largest milter frame accepted unless configured otherwise
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2_usize.pow(16);

/// The configuration could not be used
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed
    #[error("could not read config file {path}")]
    Io {
        /// The file we tried
        path: PathBuf,
        /// Why
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not match the expected layout
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    /// The values do not make sense together
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The whole configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Default tracing filter, `RUST_LOG` takes precedence
    pub log_level: String,
    /// Where messages are buffered while they are received and scanned
    pub spool_dir: PathBuf,
    /// Upper bound for every single read from a client
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,
    /// Sockets to accept connections on
    pub listeners: Vec<ListenerConfig>,
    /// The worker pool, the only section applied on reload
    pub pool: PoolSettings,
    /// Milter specifics
    pub milter: MilterSettings,
    /// SMTP specifics
    pub smtp: SmtpSettings,
    /// Where accepted SMTP messages are delivered to
    pub reinject: ReinjectSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            spool_dir: PathBuf::from("/var/spool/mailgate"),
            session_timeout: Duration::from_secs(300),
            listeners: vec![ListenerConfig {
                protocol: HandlerKind::Milter,
                address: SocketAddr::from(([127, 0, 0, 1], 10028)),
            }],
            pool: PoolSettings::default(),
            milter: MilterSettings::default(),
            smtp: SmtpSettings::default(),
            reinject: ReinjectSettings::default(),
        }
    }
}

impl Config {
    /// Read and validate the configuration at `path`
    ///
    /// # Errors
    /// If the file can not be read, parsed or fails [`Config::validate`]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate a configuration
    ///
    /// # Errors
    /// If `raw` is not a valid configuration
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that parse but can not work
    ///
    /// # Errors
    /// Describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid("pool.workers must be at least 1".into()));
        }
        if self.pool.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "pool.queue_size must be at least 1".into(),
            ));
        }
        if self.listeners.is_empty() {
            return Err(ConfigError::Invalid("no listeners configured".into()));
        }
        if self.milter.max_frame_size < 2 {
            return Err(ConfigError::Invalid(
                "milter.max_frame_size is too small".into(),
            ));
        }
        Ok(())
    }
}

/// One listening socket
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// What the clients connecting here speak
    pub protocol: HandlerKind,
    /// Address and port to bind
    pub address: SocketAddr,
}

/// `[milter]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MilterSettings {
    /// Largest frame accepted from or sent to the MTA
    pub max_frame_size: usize,
}

impl Default for MilterSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// `[smtp]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmtpSettings {
    /// Name used in the greeting and HELO replies
    pub hostname: String,
    /// Text after the hostname in the greeting
    pub banner: String,
    /// Offer SMTPUTF8 in the EHLO reply
    pub advertise_smtputf8: bool,
    /// Offer 8BITMIME in the EHLO reply
    pub advertise_8bitmime: bool,
    /// Largest accepted message in bytes, 0 for no limit
    pub max_message_size: u64,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            banner: "mailgate ESMTP".to_string(),
            advertise_smtputf8: true,
            advertise_8bitmime: true,
            max_message_size: 0,
        }
    }
}

/// `[reinject]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReinjectSettings {
    /// Host of the downstream SMTP server
    pub host: String,
    /// Its port
    pub port: u16,
    /// Timeout for the whole delivery
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ReinjectSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 10026,
            timeout: Duration::from_secs(60),
        }
    }
}

/// What a protocol session needs to know, shared by all sessions of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Spool directory
    pub spool_dir: PathBuf,
    /// Read timeout
    pub timeout: Duration,
    /// Milter specifics
    pub milter: MilterSettings,
    /// SMTP specifics
    pub smtp: SmtpSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            spool_dir: config.spool_dir.clone(),
            timeout: config.session_timeout,
            milter: config.milter.clone(),
            smtp: config.smtp.clone(),
        }
    }
}
