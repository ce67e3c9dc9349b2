//! Persistence collaborator contract.
//!
//! The session manager never owns document state. It asks a repository for
//! the current snapshot when a guest joins, and hands replicated actions to
//! it when a `dispatch` arrives.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use erd_core::{Action, SchemaState, Store};

use crate::error::CollabError;
use crate::protocol::DocumentId;

pub trait SchemaRepository: Send + Sync {
    /// Current snapshot of a document, if known.
    fn get(&self, document_id: &DocumentId) -> Option<SchemaState>;

    /// Apply actions received from a remote peer.
    fn replication(&self, document_id: &DocumentId, actions: Vec<Action>) -> Result<(), CollabError>;
}

/// Repository backed by live in-memory stores.
#[derive(Default)]
pub struct MemoryRepository {
    stores: RwLock<HashMap<DocumentId, Arc<Store>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document_id: DocumentId, store: Arc<Store>) -> Option<Arc<Store>> {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id, store)
    }

    pub fn remove(&self, document_id: &DocumentId) -> Option<Arc<Store>> {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)
    }

    pub fn store(&self, document_id: &DocumentId) -> Option<Arc<Store>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.stores.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchemaRepository for MemoryRepository {
    fn get(&self, document_id: &DocumentId) -> Option<SchemaState> {
        self.store(document_id).map(|store| store.state())
    }

    fn replication(&self, document_id: &DocumentId, actions: Vec<Action>) -> Result<(), CollabError> {
        let store = self
            .store(document_id)
            .ok_or_else(|| CollabError::DocumentNotFound(document_id.clone()))?;
        store.dispatch_all(actions);
        Ok(())
    }
}
