use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use tdship_api::Event;

use crate::encoder::{EncodeError, RecordEncoder, summarize};

/// Unique id of one batch, stable for the batch's whole lifetime including
/// retries. Its hex form is the import idempotency token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId([u8; 20]);

impl BatchId {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// 40 lower-case hex characters.
    pub fn token(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Where the encoded records of a batch live.
#[derive(Debug)]
pub enum BatchBody {
    Memory(Vec<u8>),
    /// Already on disk (e.g. a host file buffer).
    File(PathBuf),
}

/// Concatenated MessagePack records for one routing tag and one flush cycle.
#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    tag: String,
    body: BatchBody,
    records: usize,
}

impl Batch {
    pub fn new(id: BatchId, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into(),
            body: BatchBody::Memory(Vec::new()),
            records: 0,
        }
    }

    /// Wrap an existing file of encoded records.
    pub fn from_file(id: BatchId, tag: impl Into<String>, path: impl Into<PathBuf>, records: usize) -> Self {
        Self {
            id,
            tag: tag.into(),
            body: BatchBody::File(path.into()),
            records,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn body(&self) -> &BatchBody {
        &self.body
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Byte length of the encoded records.
    pub fn len(&self) -> io::Result<u64> {
        match &self.body {
            BatchBody::Memory(buf) => Ok(buf.len() as u64),
            BatchBody::File(path) => Ok(std::fs::metadata(path)?.len()),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append one encoded record.
    pub fn append(&mut self, encoded: &[u8]) -> io::Result<()> {
        match &mut self.body {
            BatchBody::Memory(buf) => buf.extend_from_slice(encoded),
            BatchBody::File(path) => {
                let mut f = OpenOptions::new().append(true).open(path)?;
                f.write_all(encoded)?;
            }
        }
        self.records += 1;
        Ok(())
    }

    /// Reader over the encoded records, from the start.
    pub fn reader(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.body {
            BatchBody::Memory(buf) => Ok(Box::new(buf.as_slice())),
            BatchBody::File(path) => Ok(Box::new(File::open(path)?)),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Error sink
// ════════════════════════════════════════════════════════════════

/// Receives records that could not be encoded. The rest of the batch
/// carries on.
pub trait ErrorSink: Send + Sync {
    fn emit_error(&self, tag: &str, event: &Event, error: &EncodeError);
}

/// Logs rejected records.
#[derive(Debug, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn emit_error(&self, tag: &str, event: &Event, error: &EncodeError) {
        tracing::error!(
            tag,
            time = event.time,
            record = %summarize(&event.record),
            error = %error,
            "dropping record"
        );
    }
}

// ════════════════════════════════════════════════════════════════
//  BatchWriter
// ════════════════════════════════════════════════════════════════

/// Encodes events into a batch, routing per-record failures to the sink.
pub struct BatchWriter<'a> {
    encoder: &'a RecordEncoder,
    errors: &'a dyn ErrorSink,
    scratch: Vec<u8>,
}

impl<'a> BatchWriter<'a> {
    pub fn new(encoder: &'a RecordEncoder, errors: &'a dyn ErrorSink) -> Self {
        Self {
            encoder,
            errors,
            scratch: Vec::new(),
        }
    }

    /// Encode and append one event. Returns `Ok(false)` when the record was
    /// rejected and reported to the error sink.
    pub fn write_event(&mut self, batch: &mut Batch, event: &Event) -> io::Result<bool> {
        self.scratch.clear();
        match self.encoder.encode_into(&event.record, event.time, &mut self.scratch) {
            Ok(_) => {
                batch.append(&self.scratch)?;
                Ok(true)
            }
            Err(e) => {
                self.errors.emit_error(batch.tag(), event, &e);
                Ok(false)
            }
        }
    }

    /// Encode all events in order; returns how many were appended.
    pub fn write_events<'e>(
        &mut self,
        batch: &mut Batch,
        events: impl IntoIterator<Item = &'e Event>,
    ) -> io::Result<usize> {
        let mut appended = 0;
        for event in events {
            if self.write_event(batch, event)? {
                appended += 1;
            }
        }
        Ok(appended)
    }
}
