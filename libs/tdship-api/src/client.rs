use std::fs::File;
use std::future::Future;
use std::io::Read;
use std::pin::Pin;

/// Format tag of every payload this crate produces: MessagePack records,
/// gzip-compressed.
pub const MSGPACK_GZ: &str = "msgpack.gz";

pub const DEFAULT_ENDPOINT: &str = "api.treasuredata.com";
pub const DEFAULT_IMPORT_ENDPOINT: &str = "api-import.treasuredata.com";

// ════════════════════════════════════════════════════════════════
//  Errors
// ════════════════════════════════════════════════════════════════

/// Outcome of a failed remote call, classified by what the caller can do
/// about it.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Database or table does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create call raced with another creator.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("network: {0}")]
    Network(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ════════════════════════════════════════════════════════════════
//  Requests
// ════════════════════════════════════════════════════════════════

/// Payload of an import call.
#[derive(Debug)]
pub enum ImportBody {
    /// Small in-memory payload (existence probes).
    Bytes(Vec<u8>),
    /// File handle positioned at offset 0, `size` bytes long.
    File { file: File, size: u64 },
}

impl ImportBody {
    pub fn size(&self) -> u64 {
        match self {
            ImportBody::Bytes(b) => b.len() as u64,
            ImportBody::File { size, .. } => *size,
        }
    }

    /// Read the whole payload into memory (blocking).
    pub fn read_to_vec(self) -> std::io::Result<Vec<u8>> {
        match self {
            ImportBody::Bytes(b) => Ok(b),
            ImportBody::File { mut file, size } => {
                let mut out = Vec::with_capacity(size as usize);
                file.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// One import call: payload for `(database, table)` in `format`.
///
/// `unique_id` is the idempotency token. The service deduplicates imports
/// carrying the same token, so a retried or re-delivered batch is stored once.
/// Probes send no token.
#[derive(Debug)]
pub struct ImportRequest<'a> {
    pub database: &'a str,
    pub table: &'a str,
    pub format: &'a str,
    pub unique_id: Option<&'a str>,
    pub body: ImportBody,
}

pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Capability to talk to the remote ingestion service.
///
/// The uploader only knows this trait; transport, auth and TLS live in the
/// implementation.
pub trait ImportClient: Send + Sync {
    /// Import a payload into an existing table.
    fn import<'a>(&'a self, request: ImportRequest<'a>) -> ClientFuture<'a, ()>;

    /// Create a database. `AlreadyExists` when it is already there.
    fn create_database<'a>(&'a self, database: &'a str) -> ClientFuture<'a, ()>;

    /// Create a log table. `NotFound` when the database is missing,
    /// `AlreadyExists` when the table is already there.
    fn create_table<'a>(&'a self, database: &'a str, table: &'a str) -> ClientFuture<'a, ()>;
}

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

/// Connection settings shared by client implementations.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientConfig {
    /// API key, sent as `Authorization: TD1 <apikey>`.
    #[serde(default)]
    pub apikey: Option<String>,
    /// API host for create calls. May carry a scheme (`http://host:port`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API host for import calls.
    #[serde(default = "default_import_endpoint")]
    pub import_endpoint: String,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
    #[serde(default)]
    pub http_proxy: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub connect_timeout: Option<u64>,
    /// Seconds.
    #[serde(default)]
    pub read_timeout: Option<u64>,
    /// Seconds, whole request.
    #[serde(default)]
    pub send_timeout: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}
fn default_import_endpoint() -> String {
    DEFAULT_IMPORT_ENDPOINT.into()
}
fn default_use_ssl() -> bool {
    true
}
fn default_user_agent() -> String {
    format!("tdship/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            apikey: None,
            endpoint: default_endpoint(),
            import_endpoint: default_import_endpoint(),
            use_ssl: default_use_ssl(),
            http_proxy: None,
            connect_timeout: None,
            read_timeout: None,
            send_timeout: None,
            user_agent: default_user_agent(),
        }
    }
}
