use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use courier_api::types::{ChatEvent, ChatId, MessageId};
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::event::EventBus;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, EngineError>;
    async fn get(&self, url: &str) -> Result<Vec<u8>, EngineError>;
}

#[derive(Clone)]
pub struct InMemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_put: Arc<Mutex<u32>>,
    fail_get: Arc<Mutex<u32>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            fail_put: Arc::new(Mutex::new(0)),
            fail_get: Arc::new(Mutex::new(0)),
        }
    }

    pub async fn fail_put_times(&self, times: u32) {
        *self.fail_put.lock().await = times;
    }

    pub async fn fail_get_times(&self, times: u32) {
        *self.fail_get.lock().await = times;
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, EngineError> {
        {
            let mut budget = self.fail_put.lock().await;
            if *budget > 0 {
                *budget -= 1;
                return Err(EngineError::Upload("blob store unavailable".to_string()));
            }
        }
        let url = format!("blob://{}", path);
        let mut guard = self.blobs.lock().await;
        guard.insert(url.clone(), bytes);
        Ok(url)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, EngineError> {
        {
            let mut budget = self.fail_get.lock().await;
            if *budget > 0 {
                *budget -= 1;
                return Err(EngineError::Download("blob store unavailable".to_string()));
            }
        }
        let guard = self.blobs.lock().await;
        guard
            .get(url)
            .cloned()
            .ok_or_else(|| EngineError::Download("missing blob".to_string()))
    }
}

#[derive(Clone)]
pub struct MediaPipeline {
    blobs: Arc<dyn BlobStore>,
    media_dir: PathBuf,
    events: EventBus,
}

impl MediaPipeline {
    pub fn new(blobs: Arc<dyn BlobStore>, media_dir: PathBuf, events: EventBus) -> Self {
        Self {
            blobs,
            media_dir,
            events,
        }
    }

    pub async fn cache_local(
        &self,
        source: &str,
        chat: &ChatId,
        id: &MessageId,
        file_name: &str,
    ) -> Result<String, EngineError> {
        let target = self.local_target(chat, id, file_name).await?;
        tokio::fs::copy(source, &target)
            .await
            .map_err(|_| EngineError::Storage)?;
        Ok(target.to_string_lossy().into_owned())
    }

    pub async fn upload(
        &self,
        path: &str,
        chat: &ChatId,
        id: &MessageId,
        file_name: &str,
        max_bytes: usize,
    ) -> Result<String, EngineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| EngineError::Upload("source unreadable".to_string()))?;
        if bytes.len() > max_bytes {
            return Err(EngineError::Upload("media too large".to_string()));
        }
        let total = bytes.len() as u64;
        self.events.publish(ChatEvent::UploadProgress {
            chat_id: chat.clone(),
            message_id: id.clone(),
            bytes_sent: 0,
            bytes_total: total,
        });
        let remote_path = format!("{}/{}-{}", chat.value, id.value, file_name);
        let url = self.blobs.put(&remote_path, bytes).await?;
        self.events.publish(ChatEvent::UploadProgress {
            chat_id: chat.clone(),
            message_id: id.clone(),
            bytes_sent: total,
            bytes_total: total,
        });
        Ok(url)
    }

    pub async fn download(
        &self,
        url: &str,
        chat: &ChatId,
        id: &MessageId,
        file_name: &str,
    ) -> Result<String, EngineError> {
        let bytes = self.blobs.get(url).await?;
        let target = self.local_target(chat, id, file_name).await?;
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|_| EngineError::Storage)?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn local_target(
        &self,
        chat: &ChatId,
        id: &MessageId,
        file_name: &str,
    ) -> Result<PathBuf, EngineError> {
        let dir = self.media_dir.join(&chat.value);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|_| EngineError::Storage)?;
        Ok(dir.join(format!("{}-{}", id.value, file_name)))
    }
}
