pub mod batch;
pub mod cache;
pub mod compress;
pub mod config;
pub mod encoder;
pub mod error;
pub mod output;
pub mod resolve;
pub mod upload;

pub use batch::{Batch, BatchBody, BatchId, BatchWriter, ErrorSink, LogErrorSink};
pub use cache::{DestinationCache, DestinationStore, MemoryStore};
pub use compress::{CompressedArtifact, CompressionStrategy, Compressor};
pub use config::OutputConfig;
pub use encoder::{EncodeError, OversizePolicy, RecordEncoder};
pub use error::{ErrorKind, ShipError};
pub use output::Output;
pub use resolve::{Destination, TagResolver};
pub use upload::{UploadState, Uploader};
