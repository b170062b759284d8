use std::sync::Arc;
use std::time::Instant;

use tdship_api::{ClientError, ImportBody, ImportClient, ImportRequest, MSGPACK_GZ};

use crate::cache::DestinationCache;
use crate::compress::CompressedArtifact;
use crate::error::ShipError;
use crate::resolve::Destination;

/// Import attempts per upload: the first one plus one retry after provisioning.
pub const MAX_IMPORT_ATTEMPTS: u32 = 2;

/// States of one upload.
///
/// ```text
/// Attempting ─ok──────────────────────────────────────────▶ Success
///     │ not found                                  ok ▲
///     ▼                                                 │
/// NotFound ─▶ Provisioning ─▶ Retrying ─────────────────┤
///     │                                    not found ▶ NotFound ─▶ Failure
///     └─ auto-create off / retry spent / other error ─────────────▶ Failure
/// ```
#[derive(Debug)]
pub enum UploadState {
    Attempting,
    NotFound,
    Provisioning,
    Retrying,
    Success,
    Failure(ShipError),
}

/// Drives the import protocol for one artifact.
pub struct Uploader {
    client: Arc<dyn ImportClient>,
    cache: Arc<DestinationCache>,
    auto_create: bool,
}

impl Uploader {
    pub fn new(client: Arc<dyn ImportClient>, cache: Arc<DestinationCache>, auto_create: bool) -> Self {
        Self {
            client,
            cache,
            auto_create,
        }
    }

    pub fn auto_create(&self) -> bool {
        self.auto_create
    }

    /// Upload `artifact` to `destination` with idempotency `token`.
    pub async fn upload(
        &self,
        destination: &Destination,
        artifact: &CompressedArtifact,
        token: &str,
    ) -> Result<(), ShipError> {
        if !self.auto_create {
            self.cache.ensure_known(self.client.as_ref(), destination).await?;
        }

        let size = artifact.size();
        let start = Instant::now();
        let mut attempts = 0;
        let mut state = UploadState::Attempting;

        tracing::trace!(
            database = destination.database(),
            table = destination.table(),
            size,
            "uploading logs"
        );

        loop {
            state = match state {
                UploadState::Attempting | UploadState::Retrying => {
                    attempts += 1;
                    // Every attempt reads the artifact from offset 0.
                    let request = ImportRequest {
                        database: destination.database(),
                        table: destination.table(),
                        format: MSGPACK_GZ,
                        unique_id: Some(token),
                        body: ImportBody::File {
                            file: artifact.open()?,
                            size,
                        },
                    };
                    match self.client.import(request).await {
                        Ok(()) => UploadState::Success,
                        Err(ClientError::NotFound(_)) => UploadState::NotFound,
                        Err(e) => UploadState::Failure(escalate(destination, e, size, start)),
                    }
                }
                UploadState::NotFound if !self.auto_create => {
                    UploadState::Failure(ShipError::DestinationNotFound {
                        destination: destination.clone(),
                    })
                }
                UploadState::NotFound if attempts >= MAX_IMPORT_ATTEMPTS => {
                    UploadState::Failure(escalate(
                        destination,
                        ClientError::NotFound(format!("{destination} still missing after provisioning")),
                        size,
                        start,
                    ))
                }
                UploadState::NotFound => UploadState::Provisioning,
                UploadState::Provisioning => match self.provision(destination).await {
                    Ok(()) => UploadState::Retrying,
                    Err(e) => UploadState::Failure(escalate(destination, e, size, start)),
                },
                UploadState::Success => {
                    self.cache.mark_known(destination);
                    tracing::debug!(
                        destination = %destination,
                        size,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "upload complete"
                    );
                    return Ok(());
                }
                UploadState::Failure(e) => return Err(e),
            };
        }
    }

    /// Create the database and then the table. Either one already existing
    /// counts as success.
    pub async fn provision(&self, destination: &Destination) -> Result<(), ClientError> {
        tracing::info!(destination = %destination, "creating table");

        match self.client.create_database(destination.database()).await {
            Ok(()) | Err(ClientError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        match self
            .client
            .create_table(destination.database(), destination.table())
            .await
        {
            Ok(()) | Err(ClientError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        self.cache.mark_known(destination);
        Ok(())
    }
}

fn escalate(destination: &Destination, source: ClientError, size: u64, start: Instant) -> ShipError {
    match source {
        ClientError::RateLimited(_) => ShipError::RateLimited {
            destination: destination.clone(),
            source,
        },
        source => ShipError::Transient {
            destination: destination.clone(),
            size,
            elapsed: start.elapsed(),
            source,
        },
    }
}
