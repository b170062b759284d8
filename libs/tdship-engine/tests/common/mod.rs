#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tdship_api::{ClientError, ClientFuture, ImportClient, ImportRequest};
use tdship_engine::{Output, OutputConfig};

/// One call seen by [`RecordingClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Import {
        database: String,
        table: String,
        unique_id: Option<String>,
        body: Vec<u8>,
    },
    CreateDatabase(String),
    CreateTable(String, String),
}

impl Call {
    pub fn is_probe(&self) -> bool {
        matches!(self, Call::Import { unique_id: None, .. })
    }
}

/// Scripted answer of the fake service.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Ok,
    NotFound,
    AlreadyExists,
    RateLimited,
    Server(u16),
    Network,
}

impl Reply {
    fn into_result(self) -> Result<(), ClientError> {
        match self {
            Reply::Ok => Ok(()),
            Reply::NotFound => Err(ClientError::NotFound("Resource not found".into())),
            Reply::AlreadyExists => Err(ClientError::AlreadyExists("Resource already exists".into())),
            Reply::RateLimited => Err(ClientError::RateLimited("Too many requests".into())),
            Reply::Server(status) => Err(ClientError::Server {
                status,
                message: "internal error".into(),
            }),
            Reply::Network => Err(ClientError::Network("connection reset by peer".into())),
        }
    }
}

/// In-memory service double: records every call and answers from per-call
/// scripts. An exhausted script answers `fallback`.
pub struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    imports: Mutex<VecDeque<Reply>>,
    creates: Mutex<VecDeque<Reply>>,
    fallback: Reply,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Self::with_fallback(Reply::Ok)
    }

    pub fn with_fallback(fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            imports: Mutex::new(VecDeque::new()),
            creates: Mutex::new(VecDeque::new()),
            fallback,
        })
    }

    pub fn script_imports(&self, replies: impl IntoIterator<Item = Reply>) {
        self.imports.lock().unwrap().extend(replies);
    }

    pub fn script_creates(&self, replies: impl IntoIterator<Item = Reply>) {
        self.creates.lock().unwrap().extend(replies);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn imports(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Import { .. }))
            .collect()
    }

    pub fn probes(&self) -> usize {
        self.calls().iter().filter(|c| c.is_probe()).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn next(&self, script: &Mutex<VecDeque<Reply>>) -> Reply {
        script.lock().unwrap().pop_front().unwrap_or(self.fallback)
    }
}

impl ImportClient for RecordingClient {
    fn import<'a>(&'a self, request: ImportRequest<'a>) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::Import {
                database: request.database.to_string(),
                table: request.table.to_string(),
                unique_id: request.unique_id.map(str::to_string),
                body: request.body.read_to_vec()?,
            };
            self.calls.lock().unwrap().push(call);
            self.next(&self.imports).into_result()
        })
    }

    fn create_database<'a>(&'a self, database: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push(Call::CreateDatabase(database.to_string()));
            self.next(&self.creates).into_result()
        })
    }

    fn create_table<'a>(&'a self, database: &'a str, table: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push(Call::CreateTable(database.to_string(), table.to_string()));
            self.next(&self.creates).into_result()
        })
    }
}

/// Config with a test key and chunks under `tmpdir`.
pub fn config(tmpdir: &std::path::Path, extra: &str) -> OutputConfig {
    let toml = format!(
        "apikey = \"testkey\"\ntmpdir = {:?}\n{extra}",
        tmpdir.display().to_string()
    );
    OutputConfig::parse(&toml).unwrap()
}

pub fn output(client: &Arc<RecordingClient>, tmpdir: &std::path::Path, extra: &str) -> Output {
    Output::new(config(tmpdir, extra), client.clone()).unwrap()
}

/// Gunzip an import body.
pub fn gunzip(body: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(body)
        .read_to_end(&mut out)
        .unwrap();
    out
}

/// Decode concatenated MessagePack maps.
pub fn decode_all(mut bytes: &[u8]) -> Vec<rmpv::Value> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        out.push(rmpv::decode::read_value(&mut bytes).unwrap());
    }
    out
}

/// Look up `key` in a decoded map.
pub fn field<'v>(value: &'v rmpv::Value, key: &str) -> Option<&'v rmpv::Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}
