use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tdship_api::{ClientError, ImportBody, ImportClient, ImportRequest, MSGPACK_GZ};

use crate::compress::empty_gzip;
use crate::error::ShipError;
use crate::resolve::Destination;

/// Backing storage of the known-destination set.
pub trait DestinationStore: Send + Sync {
    fn contains(&self, destination: &Destination) -> bool;
    fn insert(&self, destination: Destination);
}

/// In-memory store. Entries are never removed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    known: RwLock<HashSet<Destination>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DestinationStore for MemoryStore {
    fn contains(&self, destination: &Destination) -> bool {
        let guard = match self.known.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("destination cache read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.contains(destination)
    }

    fn insert(&self, destination: Destination) {
        let mut guard = match self.known.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("destination cache write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.insert(destination);
    }
}

/// Destinations known to exist on the remote service.
///
/// Unknown destinations are checked with a probe: an import of an empty
/// gzip payload. Only positive answers are cached.
pub struct DestinationCache {
    store: Arc<dyn DestinationStore>,
    probe_payload: Vec<u8>,
}

impl std::fmt::Debug for DestinationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationCache").finish_non_exhaustive()
    }
}

impl Default for DestinationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationCache {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn DestinationStore>) -> Self {
        Self {
            store,
            probe_payload: empty_gzip(),
        }
    }

    pub fn is_known(&self, destination: &Destination) -> bool {
        self.store.contains(destination)
    }

    pub fn mark_known(&self, destination: &Destination) {
        if !self.store.contains(destination) {
            tracing::debug!(destination = %destination, "destination marked as existing");
            self.store.insert(destination.clone());
        }
    }

    /// Make sure `destination` exists before uploading to it.
    ///
    /// - known: no remote call;
    /// - probe succeeds: cached;
    /// - probe says not found: `DestinationNotFound`;
    /// - probe fails otherwise: logged, not cached, `Ok` (checked again next time).
    pub async fn ensure_known(
        &self,
        client: &dyn ImportClient,
        destination: &Destination,
    ) -> Result<(), ShipError> {
        if self.is_known(destination) {
            return Ok(());
        }

        tracing::debug!(destination = %destination, "checking whether table exists");
        let request = ImportRequest {
            database: destination.database(),
            table: destination.table(),
            format: MSGPACK_GZ,
            unique_id: None,
            body: ImportBody::Bytes(self.probe_payload.clone()),
        };

        match client.import(request).await {
            Ok(()) => {
                self.mark_known(destination);
                Ok(())
            }
            Err(ClientError::NotFound(_)) => Err(ShipError::DestinationNotFound {
                destination: destination.clone(),
            }),
            Err(e) => {
                tracing::warn!(
                    destination = %destination,
                    error = %e,
                    "failed to check table existence"
                );
                Ok(())
            }
        }
    }
}
