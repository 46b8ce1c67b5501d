use std::collections::BTreeSet;
use std::sync::Arc;

use courier_api::types::{
    ChatId, MediaMetadata, MediaRef, Message, MessageId, MessageStatus, UserId,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::EngineError;
use crate::store::EncryptedStore;

const CHATS_KEY: &str = "chats:index";

#[derive(Clone)]
pub struct MessageStore {
    store: Arc<Mutex<EncryptedStore>>,
}

impl MessageStore {
    pub fn new(store: Arc<Mutex<EncryptedStore>>) -> Self {
        Self { store }
    }

    pub async fn upsert(&self, incoming: Message) -> Result<Message, EngineError> {
        let mut guard = self.store.lock().await;
        let key = Self::message_key(&incoming.chat_id, &incoming.id);
        let merged = match Self::read_message(&guard, &key)? {
            Some(existing) => Self::merge(existing, incoming),
            None => incoming,
        };
        let bytes = serde_json::to_vec(&merged).map_err(|_| EngineError::Storage)?;
        guard.put(&key, &bytes).map_err(|_| EngineError::Storage)?;

        let mut index = Self::read_index(&guard, &merged.chat_id)?;
        if index.insert(merged.id.value) {
            let encoded = serde_json::to_vec(&index).map_err(|_| EngineError::Storage)?;
            guard
                .put(&Self::index_key(&merged.chat_id), &encoded)
                .map_err(|_| EngineError::Storage)?;
        }
        let mut chats = Self::read_chats(&guard)?;
        if chats.insert(merged.chat_id.value.clone()) {
            let encoded = serde_json::to_vec(&chats).map_err(|_| EngineError::Storage)?;
            guard
                .put(CHATS_KEY, &encoded)
                .map_err(|_| EngineError::Storage)?;
        }
        Ok(merged)
    }

    pub async fn get(&self, chat: &ChatId, id: &MessageId) -> Result<Option<Message>, EngineError> {
        let guard = self.store.lock().await;
        Self::read_message(&guard, &Self::message_key(chat, id))
    }

    pub async fn get_all(&self, chat: &ChatId) -> Result<Vec<Message>, EngineError> {
        let guard = self.store.lock().await;
        let index = Self::read_index(&guard, chat)?;
        let mut out = Vec::with_capacity(index.len());
        for id in index.iter() {
            let key = format!("msg:{}:{}", chat.value, id);
            if let Some(message) = Self::read_message(&guard, &key)? {
                out.push(message);
            }
        }
        out.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.value.cmp(&b.id.value))
        });
        Ok(out)
    }

    pub async fn chats(&self) -> Result<Vec<ChatId>, EngineError> {
        let guard = self.store.lock().await;
        let chats = Self::read_chats(&guard)?;
        Ok(chats.into_iter().map(ChatId::new).collect())
    }

    pub async fn update_status(
        &self,
        chat: &ChatId,
        id: &MessageId,
        status: MessageStatus,
        delivered_to: Option<&BTreeSet<String>>,
        read_by: Option<&BTreeSet<String>>,
    ) -> Result<Option<Message>, EngineError> {
        let mut guard = self.store.lock().await;
        let key = Self::message_key(chat, id);
        let Some(mut message) = Self::read_message(&guard, &key)? else {
            return Ok(None);
        };
        let mut changed = false;
        let promoted = message.status.promote(status);
        if promoted != message.status {
            message.status = promoted;
            changed = true;
        }
        if let Some(delivered) = delivered_to {
            for user in delivered {
                changed |= message.delivered_to.insert(user.clone());
            }
        }
        if let Some(read) = read_by {
            for user in read {
                changed |= message.delivered_to.insert(user.clone());
                changed |= message.read_by.insert(user.clone());
            }
        }
        if changed {
            let bytes = serde_json::to_vec(&message).map_err(|_| EngineError::Storage)?;
            guard.put(&key, &bytes).map_err(|_| EngineError::Storage)?;
        }
        Ok(Some(message))
    }

    pub async fn mark_delivered(
        &self,
        chat: &ChatId,
        ids: &[MessageId],
        user: &UserId,
    ) -> Result<(), EngineError> {
        self.mark(chat, ids, user, MessageStatus::Delivered, false)
            .await
    }

    pub async fn mark_read(
        &self,
        chat: &ChatId,
        ids: &[MessageId],
        user: &UserId,
    ) -> Result<(), EngineError> {
        self.mark(chat, ids, user, MessageStatus::Read, true).await
    }

    async fn mark(
        &self,
        chat: &ChatId,
        ids: &[MessageId],
        user: &UserId,
        target: MessageStatus,
        read: bool,
    ) -> Result<(), EngineError> {
        let mut guard = self.store.lock().await;
        for id in ids {
            let key = Self::message_key(chat, id);
            let Some(mut message) = Self::read_message(&guard, &key)? else {
                continue;
            };
            let mut changed = message.delivered_to.insert(user.value.clone());
            if read {
                changed |= message.read_by.insert(user.value.clone());
            }
            let promoted = message.status.promote(target);
            if promoted != message.status {
                message.status = promoted;
                changed = true;
            }
            if changed {
                let bytes = serde_json::to_vec(&message).map_err(|_| EngineError::Storage)?;
                guard.put(&key, &bytes).map_err(|_| EngineError::Storage)?;
            }
        }
        Ok(())
    }

    fn merge(existing: Message, incoming: Message) -> Message {
        let mut merged = existing;
        if incoming.content.is_some() {
            merged.content = incoming.content;
        }
        if incoming.reply_to.is_some() {
            merged.reply_to = incoming.reply_to;
        }
        merged.media = Self::merge_media(merged.media, incoming.media);
        merged.status = merged.status.promote(incoming.status);
        merged.delivered_to.extend(incoming.delivered_to);
        merged.read_by.extend(incoming.read_by);
        merged
    }

    fn merge_media(existing: Option<MediaRef>, incoming: Option<MediaRef>) -> Option<MediaRef> {
        match (existing, incoming) {
            (None, incoming) => incoming,
            (existing, None) => existing,
            (Some(existing), Some(incoming)) => Some(MediaRef {
                local_path: incoming.local_path.or(existing.local_path),
                remote_url: incoming.remote_url.or(existing.remote_url),
                metadata: Self::merge_metadata(existing.metadata, incoming.metadata),
            }),
        }
    }

    fn merge_metadata(existing: MediaMetadata, incoming: MediaMetadata) -> MediaMetadata {
        MediaMetadata {
            file_name: incoming.file_name.or(existing.file_name),
            size: incoming.size.or(existing.size),
            mime_type: incoming.mime_type.or(existing.mime_type),
            width: incoming.width.or(existing.width),
            height: incoming.height.or(existing.height),
            duration_ms: incoming.duration_ms.or(existing.duration_ms),
        }
    }

    fn read_message(store: &EncryptedStore, key: &str) -> Result<Option<Message>, EngineError> {
        match store.get(key).map_err(|_| EngineError::Storage)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| EngineError::Storage),
            None => Ok(None),
        }
    }

    fn read_index(store: &EncryptedStore, chat: &ChatId) -> Result<BTreeSet<Uuid>, EngineError> {
        match store
            .get(&Self::index_key(chat))
            .map_err(|_| EngineError::Storage)?
        {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|_| EngineError::Storage),
            None => Ok(BTreeSet::new()),
        }
    }

    fn read_chats(store: &EncryptedStore) -> Result<BTreeSet<String>, EngineError> {
        match store.get(CHATS_KEY).map_err(|_| EngineError::Storage)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|_| EngineError::Storage),
            None => Ok(BTreeSet::new()),
        }
    }

    fn message_key(chat: &ChatId, id: &MessageId) -> String {
        format!("msg:{}:{}", chat.value, id.value)
    }

    fn index_key(chat: &ChatId) -> String {
        format!("msgidx:{}", chat.value)
    }
}
