//! In-memory event store for testing and lightweight usage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::EventStoreError;
use crate::traits::EventStore;
use crate::types::DomainEvent;

/// In-memory implementation of [`EventStore`].
///
/// Uses `BTreeMap` for deterministic iteration order (project convention).
pub struct InMemoryEventStore {
    events: Arc<RwLock<BTreeMap<String, DomainEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, event: &DomainEvent) -> Result<(), EventStoreError> {
        self.events
            .write()
            .await
            .insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<DomainEvent>, EventStoreError> {
        Ok(self.events.read().await.get(id).cloned())
    }
}
