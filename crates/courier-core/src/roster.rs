use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_api::types::{ChatId, ThreadInfo};
use tokio::sync::Mutex;

use crate::error::EngineError;

#[async_trait]
pub trait ThreadDirectory: Send + Sync {
    async fn thread(&self, chat: &ChatId) -> Result<ThreadInfo, EngineError>;
}

#[derive(Clone, Default)]
pub struct InMemoryThreadDirectory {
    threads: Arc<Mutex<HashMap<String, ThreadInfo>>>,
}

impl InMemoryThreadDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, info: ThreadInfo) {
        let mut guard = self.threads.lock().await;
        guard.insert(info.chat_id.value.clone(), info);
    }
}

#[async_trait]
impl ThreadDirectory for InMemoryThreadDirectory {
    async fn thread(&self, chat: &ChatId) -> Result<ThreadInfo, EngineError> {
        let guard = self.threads.lock().await;
        guard.get(&chat.value).cloned().ok_or(EngineError::NotFound)
    }
}
