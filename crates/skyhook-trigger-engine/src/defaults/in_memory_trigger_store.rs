//! In-memory trigger store for testing and lightweight usage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::TriggerStoreError;
use crate::traits::TriggerStore;
use crate::types::{Trigger, TriggerType};

/// In-memory implementation of [`TriggerStore`].
///
/// Uses `BTreeMap` for deterministic iteration order (project convention).
/// Saves clone the entity, so concurrent writers are last-writer-wins, the
/// same consistency a document store gives the dispatchers.
pub struct InMemoryTriggerStore {
    triggers: Arc<RwLock<BTreeMap<String, Trigger>>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self {
            triggers: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryTriggerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerStore for InMemoryTriggerStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Trigger>, TriggerStoreError> {
        Ok(self.triggers.read().await.get(id).cloned())
    }

    async fn find_by_enabled_and_type(
        &self,
        enabled: bool,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, TriggerStoreError> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.enabled == enabled && t.trigger_type == trigger_type)
            .cloned()
            .collect())
    }

    async fn find_by_project_id(
        &self,
        project_id: &str,
    ) -> Result<Vec<Trigger>, TriggerStoreError> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.project_id.as_deref() == Some(project_id))
            .cloned()
            .collect())
    }

    async fn find_by_project_id_and_name(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Trigger>, TriggerStoreError> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .find(|t| t.project_id.as_deref() == Some(project_id) && t.name == name)
            .cloned())
    }

    async fn find_by_workflow_definition_id(
        &self,
        workflow_definition_id: &str,
    ) -> Result<Vec<Trigger>, TriggerStoreError> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.workflow_definition_id == workflow_definition_id)
            .cloned()
            .collect())
    }

    async fn find_by_type(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, TriggerStoreError> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.trigger_type == trigger_type)
            .cloned()
            .collect())
    }

    async fn find_by_enabled(&self, enabled: bool) -> Result<Vec<Trigger>, TriggerStoreError> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.enabled == enabled)
            .cloned()
            .collect())
    }

    async fn save(&self, trigger: &Trigger) -> Result<(), TriggerStoreError> {
        self.triggers
            .write()
            .await
            .insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), TriggerStoreError> {
        match self.triggers.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(TriggerStoreError::NotFound { id: id.to_string() }),
        }
    }
}
