use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_api::types::{ChatId, MessageId, ReceiptRecord, UserId};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::error::EngineError;
use crate::time::now_ms;

#[async_trait]
pub trait ReceiptChannel: Send + Sync {
    async fn send_delivered(
        &self,
        chat: &ChatId,
        message: &MessageId,
        recipient: &UserId,
        group: bool,
    ) -> Result<(), EngineError>;
    async fn send_read(
        &self,
        chat: &ChatId,
        message: &MessageId,
        recipient: &UserId,
        group: bool,
    ) -> Result<(), EngineError>;
    async fn send_bulk_read(
        &self,
        chat: &ChatId,
        messages: &[MessageId],
        recipient: &UserId,
        group: bool,
    ) -> Result<(), EngineError>;
    async fn fetch(&self, chat: &ChatId) -> Result<Vec<ReceiptRecord>, EngineError>;
    fn updates(&self) -> broadcast::Receiver<ChatId>;
}

#[derive(Clone)]
pub struct InMemoryReceiptChannel {
    rows: Arc<Mutex<HashMap<String, HashMap<(Uuid, String), ReceiptRecord>>>>,
    notify: broadcast::Sender<ChatId>,
    fail_send: Arc<Mutex<u32>>,
}

impl InMemoryReceiptChannel {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            notify,
            fail_send: Arc::new(Mutex::new(0)),
        }
    }

    pub async fn fail_send_times(&self, times: u32) {
        *self.fail_send.lock().await = times;
    }

    pub async fn rows_len(&self, chat: &ChatId) -> usize {
        let guard = self.rows.lock().await;
        guard.get(&chat.value).map(|rows| rows.len()).unwrap_or(0)
    }

    pub async fn row(
        &self,
        chat: &ChatId,
        message: &MessageId,
        recipient: &UserId,
    ) -> Option<ReceiptRecord> {
        let guard = self.rows.lock().await;
        guard
            .get(&chat.value)
            .and_then(|rows| rows.get(&(message.value, recipient.value.clone())))
            .cloned()
    }

    async fn save(
        &self,
        chat: &ChatId,
        message: &MessageId,
        recipient: &UserId,
        delivered: bool,
        read: bool,
    ) -> Result<(), EngineError> {
        {
            let mut budget = self.fail_send.lock().await;
            if *budget > 0 {
                *budget -= 1;
                return Err(EngineError::Transport("receipt channel unavailable".to_string()));
            }
        }
        let now = now_ms();
        let mut guard = self.rows.lock().await;
        let rows = guard.entry(chat.value.clone()).or_default();
        let row = rows
            .entry((message.value, recipient.value.clone()))
            .or_insert_with(|| ReceiptRecord {
                chat_id: chat.clone(),
                message_id: message.clone(),
                recipient_id: recipient.clone(),
                delivered: false,
                delivered_at: None,
                read: false,
                read_at: None,
            });
        if delivered && !row.delivered {
            row.delivered = true;
            row.delivered_at = Some(now);
        }
        if read && !row.read {
            row.read = true;
            row.read_at = Some(now);
            if !row.delivered {
                row.delivered = true;
                row.delivered_at = Some(now);
            }
        }
        drop(guard);
        let _ = self.notify.send(chat.clone());
        Ok(())
    }
}

impl Default for InMemoryReceiptChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReceiptChannel for InMemoryReceiptChannel {
    async fn send_delivered(
        &self,
        chat: &ChatId,
        message: &MessageId,
        recipient: &UserId,
        _group: bool,
    ) -> Result<(), EngineError> {
        self.save(chat, message, recipient, true, false).await
    }

    async fn send_read(
        &self,
        chat: &ChatId,
        message: &MessageId,
        recipient: &UserId,
        _group: bool,
    ) -> Result<(), EngineError> {
        self.save(chat, message, recipient, true, true).await
    }

    async fn send_bulk_read(
        &self,
        chat: &ChatId,
        messages: &[MessageId],
        recipient: &UserId,
        group: bool,
    ) -> Result<(), EngineError> {
        for message in messages {
            self.send_read(chat, message, recipient, group).await?;
        }
        Ok(())
    }

    async fn fetch(&self, chat: &ChatId) -> Result<Vec<ReceiptRecord>, EngineError> {
        let guard = self.rows.lock().await;
        let mut out: Vec<ReceiptRecord> = guard
            .get(&chat.value)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| {
            a.message_id
                .value
                .cmp(&b.message_id.value)
                .then_with(|| a.recipient_id.value.cmp(&b.recipient_id.value))
        });
        Ok(out)
    }

    fn updates(&self) -> broadcast::Receiver<ChatId> {
        self.notify.subscribe()
    }
}
