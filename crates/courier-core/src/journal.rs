use std::collections::HashSet;
use std::sync::Arc;

use courier_api::types::ThreadKind;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::EngineError;
use crate::store::EncryptedStore;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingFanout {
    pub message_id: Uuid,
    pub chat_id: String,
    pub thread: ThreadKind,
    pub recipients: Vec<String>,
    pub created_at_ms: u64,
}

#[derive(Clone)]
pub struct SendJournal {
    store: Arc<Mutex<EncryptedStore>>,
}

impl SendJournal {
    pub fn new(store: Arc<Mutex<EncryptedStore>>) -> Self {
        Self { store }
    }

    pub async fn put(&self, item: PendingFanout) -> Result<(), EngineError> {
        let mut guard = self.store.lock().await;
        let mut index = Self::index(&guard)?;
        index.insert(item.message_id);
        let bytes = serde_json::to_vec(&item).map_err(|_| EngineError::Storage)?;
        guard
            .put(&Self::item_key(&item.message_id), &bytes)
            .map_err(|_| EngineError::Storage)?;
        Self::persist_index(&mut guard, &index)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<PendingFanout>, EngineError> {
        let guard = self.store.lock().await;
        Self::read_item(&guard, id)
    }

    pub async fn remove(&self, id: &Uuid) -> Result<(), EngineError> {
        let mut guard = self.store.lock().await;
        let mut index = Self::index(&guard)?;
        index.remove(id);
        guard
            .delete(&Self::item_key(id))
            .map_err(|_| EngineError::Storage)?;
        Self::persist_index(&mut guard, &index)
    }

    pub async fn set_recipients(&self, id: &Uuid, recipients: Vec<String>) -> Result<(), EngineError> {
        let mut guard = self.store.lock().await;
        let Some(mut item) = Self::read_item(&guard, id)? else {
            return Ok(());
        };
        item.recipients = recipients;
        let bytes = serde_json::to_vec(&item).map_err(|_| EngineError::Storage)?;
        guard
            .put(&Self::item_key(id), &bytes)
            .map_err(|_| EngineError::Storage)
    }

    pub async fn load_all(&self, limit: usize) -> Result<Vec<PendingFanout>, EngineError> {
        let guard = self.store.lock().await;
        let index = Self::index(&guard)?;
        let mut out = Vec::new();
        for id in index.iter() {
            if out.len() >= limit {
                break;
            }
            if let Some(item) = Self::read_item(&guard, id)? {
                out.push(item);
            }
        }
        out.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        Ok(out)
    }

    pub async fn len(&self) -> Result<usize, EngineError> {
        let guard = self.store.lock().await;
        Ok(Self::index(&guard)?.len())
    }

    fn index(store: &EncryptedStore) -> Result<HashSet<Uuid>, EngineError> {
        match store.get("journal:index").map_err(|_| EngineError::Storage)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|_| EngineError::Storage),
            None => Ok(HashSet::new()),
        }
    }

    fn persist_index(store: &mut EncryptedStore, index: &HashSet<Uuid>) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec(index).map_err(|_| EngineError::Storage)?;
        store
            .put("journal:index", &bytes)
            .map_err(|_| EngineError::Storage)
    }

    fn read_item(store: &EncryptedStore, id: &Uuid) -> Result<Option<PendingFanout>, EngineError> {
        match store
            .get(&Self::item_key(id))
            .map_err(|_| EngineError::Storage)?
        {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| EngineError::Storage),
            None => Ok(None),
        }
    }

    fn item_key(id: &Uuid) -> String {
        format!("journal:{}", id)
    }
}
