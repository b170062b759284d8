use std::sync::Arc;

use tdship_api::{Event, ImportClient};

use crate::batch::{Batch, BatchId, BatchWriter, ErrorSink, LogErrorSink};
use crate::cache::DestinationCache;
use crate::compress::Compressor;
use crate::config::OutputConfig;
use crate::encoder::RecordEncoder;
use crate::error::ShipError;
use crate::resolve::TagResolver;
use crate::upload::Uploader;

/// The output adapter: encodes events into batches on the host's ingest
/// path and ships finished batches on its flush path.
pub struct Output {
    config: OutputConfig,
    client: Arc<dyn ImportClient>,
    encoder: RecordEncoder,
    resolver: TagResolver,
    compressor: Arc<Compressor>,
    cache: Arc<DestinationCache>,
    uploader: Uploader,
    errors: Arc<dyn ErrorSink>,
}

impl Output {
    /// Validate `config` and build an output around `client`.
    pub fn new(config: OutputConfig, client: Arc<dyn ImportClient>) -> Result<Self, ShipError> {
        Self::with_cache(config, client, Arc::new(DestinationCache::new()))
    }

    /// Like [`Output::new`], sharing `cache` with other outputs.
    pub fn with_cache(
        config: OutputConfig,
        client: Arc<dyn ImportClient>,
        cache: Arc<DestinationCache>,
    ) -> Result<Self, ShipError> {
        config.validate()?;

        let resolver = TagResolver::new(config.static_destination()?);
        let compressor =
            Compressor::from_strategy(config.compression, &config.gzip_command, config.tmpdir())?;
        let encoder = RecordEncoder::new(
            config.key_num_limit,
            config.record_size_limit,
            config.oversize_policy,
        );
        let uploader = Uploader::new(client.clone(), cache.clone(), config.auto_create_table);

        Ok(Self {
            config,
            client,
            encoder,
            resolver,
            compressor: Arc::new(compressor),
            cache,
            uploader,
            errors: Arc::new(LogErrorSink),
        })
    }

    /// Replace the sink that receives rejected records.
    pub fn with_error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<DestinationCache> {
        &self.cache
    }

    /// Startup checks. With a static destination, it is created when
    /// auto-creation is on, or probed when it is off.
    pub async fn start(&self) -> Result<(), ShipError> {
        self.compressor.validate()?;

        let Some(destination) = self.resolver.configured() else {
            return Ok(());
        };

        if self.uploader.auto_create() {
            self.uploader.provision(destination).await.map_err(|e| {
                ShipError::Config(format!("failed to create {destination}: {e}"))
            })?;
        } else {
            self.cache
                .ensure_known(self.client.as_ref(), destination)
                .await?;
        }
        tracing::info!(destination = %destination, "output started");
        Ok(())
    }

    /// A writer appending to batches with this output's encoding rules.
    pub fn writer(&self) -> BatchWriter<'_> {
        BatchWriter::new(&self.encoder, self.errors.as_ref())
    }

    /// Encode `events` into a new in-memory batch for `tag`.
    pub fn format<'e>(
        &self,
        tag: &str,
        id: BatchId,
        events: impl IntoIterator<Item = &'e Event>,
    ) -> Result<Batch, ShipError> {
        let mut batch = Batch::new(id, tag);
        self.writer().write_events(&mut batch, events)?;
        Ok(batch)
    }

    /// Ship one batch. Safe to call again with the same batch after a
    /// retryable error: the batch id is the idempotency token.
    pub async fn write(&self, batch: Arc<Batch>) -> Result<(), ShipError> {
        let destination = self.resolver.resolve(batch.tag())?;

        if batch.is_empty()? {
            tracing::debug!(tag = batch.tag(), id = %batch.id(), "skipping empty batch");
            return Ok(());
        }

        let compressor = self.compressor.clone();
        let chunk = batch.clone();
        let artifact = tokio::task::spawn_blocking(move || compressor.compress(&chunk))
            .await
            .map_err(|e| ShipError::Io(std::io::Error::other(e.to_string())))??;

        tracing::debug!(
            tag = batch.tag(),
            id = %batch.id(),
            destination = %destination,
            records = batch.records(),
            size = artifact.size(),
            "flushing batch"
        );

        self.uploader
            .upload(&destination, &artifact, &batch.id().token())
            .await
    }
}
