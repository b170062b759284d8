use std::path::PathBuf;

use serde::Deserialize;
use tdship_api::ClientConfig;

use crate::compress::CompressionStrategy;
use crate::encoder::{DEFAULT_KEY_NUM_LIMIT, DEFAULT_RECORD_SIZE_LIMIT, OversizePolicy};
use crate::error::ShipError;
use crate::resolve::Destination;

/// Output configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// API key, endpoints, TLS, proxy and timeouts.
    #[serde(flatten)]
    pub client: ClientConfig,

    /// Static destination. When unset, the destination comes from the tag.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub table: Option<String>,

    /// Create missing databases/tables on upload.
    #[serde(default = "default_auto_create_table")]
    pub auto_create_table: bool,

    #[serde(default)]
    pub compression: CompressionStrategy,

    /// Utility used by `compression = "external"`.
    #[serde(default = "default_gzip_command")]
    pub gzip_command: String,

    /// Directory for compressed chunks. Defaults to the system temp dir.
    #[serde(default)]
    pub tmpdir: Option<PathBuf>,

    #[serde(default = "default_key_num_limit")]
    pub key_num_limit: usize,

    /// Bytes.
    #[serde(default = "default_record_size_limit")]
    pub record_size_limit: usize,

    #[serde(default)]
    pub oversize_policy: OversizePolicy,
}

fn default_auto_create_table() -> bool {
    true
}
fn default_gzip_command() -> String {
    "gzip".into()
}
fn default_key_num_limit() -> usize {
    DEFAULT_KEY_NUM_LIMIT
}
fn default_record_size_limit() -> usize {
    DEFAULT_RECORD_SIZE_LIMIT
}

impl OutputConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ShipError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ShipError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, ShipError> {
        toml::from_str(toml_str).map_err(|e| ShipError::Config(e.to_string()))
    }

    /// Check required settings and the static destination.
    ///
    /// External utility availability is checked when the compressor is built.
    pub fn validate(&self) -> Result<(), ShipError> {
        match self.client.apikey.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(ShipError::Config("'apikey' parameter is required".into())),
        }
        if self.key_num_limit == 0 {
            return Err(ShipError::Config("'key_num_limit' must be positive".into()));
        }
        self.static_destination()?;
        Ok(())
    }

    /// The configured destination, if both `database` and `table` are set.
    pub fn static_destination(&self) -> Result<Option<Destination>, ShipError> {
        match (&self.database, &self.table) {
            (Some(database), Some(table)) => Destination::new(database, table)
                .map(Some)
                .map_err(|e| ShipError::Config(e.to_string())),
            (None, None) => Ok(None),
            _ => Err(ShipError::Config(
                "'database' and 'table' parameters must be set together".into(),
            )),
        }
    }

    pub fn tmpdir(&self) -> PathBuf {
        self.tmpdir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tdship"))
    }
}
