//! Analysis sessions keyed by repository and reference.
//!
//! Each repository gets one [`SessionSlot`] holding its latest complete
//! [`Ingestion`]. A rebuild runs off to the side and is swapped in whole,
//! so readers see either the previous index or the new one, never a
//! partial one. Builds of the same repository are serialised; builds of
//! different repositories run independently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::ingest::{canonical_root, Ingestion, Ingestor};

/// Cache key: canonical repository root plus reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub repository: String,
    pub reference: String,
}

/// The current ingestion of one repository.
#[derive(Default)]
pub struct SessionSlot {
    current: RwLock<Option<Arc<Ingestion>>>,
    build: tokio::sync::Mutex<()>,
}

impl SessionSlot {
    pub fn current(&self) -> Option<Arc<Ingestion>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in `next`, returning what it replaced.
    pub fn replace(&self, next: Arc<Ingestion>) -> Option<Arc<Ingestion>> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.replace(next)
    }

    pub fn key(&self) -> Option<SessionKey> {
        self.current().map(|i| SessionKey {
            repository: i.snapshot.repository.clone(),
            reference: i.snapshot.reference.clone(),
        })
    }
}

pub struct SessionCache {
    ingestor: Ingestor,
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionCache {
    pub fn new(ingestor: Ingestor) -> Self {
        Self {
            ingestor,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the ingestion of `root` at `reference`, building it if the
    /// cached one is missing or at another reference.
    pub async fn get_or_build(
        &self,
        root: &Path,
        reference: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Ingestion>> {
        let repository = canonical_root(root)?.display().to_string();
        let slot = self.slot_for(&repository);
        let _build = slot.build.lock().await;

        let reference = match reference {
            Some(r) => r.to_string(),
            None => self.ingestor.reference(root).await?,
        };
        let key = SessionKey {
            repository,
            reference,
        };

        if let Some(current) = slot.current() {
            if current.snapshot.reference == key.reference {
                debug!(repository = %key.repository, reference = %key.reference, "session cache hit");
                return Ok(current);
            }
        }

        let ingestion = Arc::new(
            self.ingestor
                .ingest(root, Some(&key.reference), cancel)
                .await?,
        );
        let previous = slot.replace(Arc::clone(&ingestion));
        info!(
            repository = %key.repository,
            reference = %key.reference,
            previous = previous.as_ref().map(|p| p.snapshot.reference.as_str()).unwrap_or("-"),
            entries = ingestion.index.len(),
            "session index swapped"
        );
        Ok(ingestion)
    }

    /// The slot for `root`, if that repository was ever built.
    pub fn slot(&self, root: &Path) -> Option<Arc<SessionSlot>> {
        let repository = canonical_root(root).ok()?.display().to_string();
        self.lock_slots().get(&repository).cloned()
    }

    /// Drop the cached ingestion of `root`.
    pub fn invalidate(&self, root: &Path) -> bool {
        match canonical_root(root) {
            Ok(path) => self
                .lock_slots()
                .remove(&path.display().to_string())
                .is_some(),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_for(&self, repository: &str) -> Arc<SessionSlot> {
        Arc::clone(
            self.lock_slots()
                .entry(repository.to_string())
                .or_default(),
        )
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionSlot>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
