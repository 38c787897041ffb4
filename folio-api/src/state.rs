//! Shared application state for the services.

use std::sync::Arc;

use folio_cache::{CacheClient, CacheConfig, CacheStore, InMemoryCacheStore};
use folio_events::{CacheEventHandler, EventLog, EventPublisher, InMemoryEventLog};

use crate::memory_store::InMemoryStore;
use crate::read_through::ReadThrough;
use crate::store::SourceOfTruth;
use crate::write_through::WriteThrough;

/// Everything a service call needs. The cache store and the event log are
/// injected once here and shared by clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SourceOfTruth>,
    pub reads: ReadThrough,
    pub writes: WriteThrough,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SourceOfTruth>,
        cache_store: Arc<dyn CacheStore>,
        log: Arc<dyn EventLog>,
        cache_config: CacheConfig,
    ) -> Self {
        let cache = CacheClient::new(cache_store, cache_config);
        let reads = ReadThrough::new(store.clone(), cache.clone());
        let writes = WriteThrough::new(CacheEventHandler::new(cache), EventPublisher::new(log));
        Self { store, reads, writes }
    }

    /// Fully in-process state with default cache TTLs.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryEventLog::new()),
            CacheConfig::default(),
        )
    }

    pub fn cache(&self) -> &CacheClient {
        self.reads.cache()
    }

    pub fn publisher(&self) -> &EventPublisher {
        self.writes.publisher()
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        self.writes.publisher().log()
    }
}
