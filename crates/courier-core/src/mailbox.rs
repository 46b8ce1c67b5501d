use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_api::types::{MailboxEnvelope, MessageId, UserId};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckSummary {
    pub deleted: u64,
    pub missing: u64,
    pub remaining: u64,
}

#[async_trait]
pub trait MailboxTransport: Send + Sync {
    async fn publish(&self, envelope: MailboxEnvelope) -> Result<(), EngineError>;
    async fn fetch(&self, recipient: &UserId) -> Result<Vec<MailboxEnvelope>, EngineError>;
    async fn ack(&self, recipient: &UserId, ids: &[MessageId]) -> Result<AckSummary, EngineError>;
    fn updates(&self) -> broadcast::Receiver<UserId>;
}

#[derive(Clone)]
pub struct InMemoryMailbox {
    entries: Arc<Mutex<HashMap<String, HashMap<Uuid, MailboxEnvelope>>>>,
    notify: broadcast::Sender<UserId>,
    fail_publish: Arc<Mutex<u32>>,
    fail_fetch: Arc<Mutex<u32>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            notify,
            fail_publish: Arc::new(Mutex::new(0)),
            fail_fetch: Arc::new(Mutex::new(0)),
        }
    }

    pub async fn fail_publish_times(&self, times: u32) {
        *self.fail_publish.lock().await = times;
    }

    pub async fn fail_fetch_times(&self, times: u32) {
        *self.fail_fetch.lock().await = times;
    }

    pub async fn queued_len(&self, recipient: &UserId) -> usize {
        let guard = self.entries.lock().await;
        guard.get(&recipient.value).map(|q| q.len()).unwrap_or(0)
    }

    async fn consume_budget(budget: &Arc<Mutex<u32>>) -> bool {
        let mut guard = budget.lock().await;
        if *guard > 0 {
            *guard -= 1;
            return true;
        }
        false
    }
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailboxTransport for InMemoryMailbox {
    async fn publish(&self, envelope: MailboxEnvelope) -> Result<(), EngineError> {
        if Self::consume_budget(&self.fail_publish).await {
            return Err(EngineError::Transport("mailbox unavailable".to_string()));
        }
        envelope
            .validate()
            .map_err(|field| EngineError::Validation(field.to_string()))?;
        let recipient = envelope.recipient_id.clone();
        let mut guard = self.entries.lock().await;
        guard
            .entry(recipient.value.clone())
            .or_default()
            .insert(envelope.id.value, envelope);
        drop(guard);
        let _ = self.notify.send(recipient);
        Ok(())
    }

    async fn fetch(&self, recipient: &UserId) -> Result<Vec<MailboxEnvelope>, EngineError> {
        if Self::consume_budget(&self.fail_fetch).await {
            return Err(EngineError::Transport("mailbox unavailable".to_string()));
        }
        let guard = self.entries.lock().await;
        let mut items: Vec<MailboxEnvelope> = guard
            .get(&recipient.value)
            .map(|queue| queue.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.value.cmp(&b.id.value))
        });
        Ok(items)
    }

    async fn ack(&self, recipient: &UserId, ids: &[MessageId]) -> Result<AckSummary, EngineError> {
        let mut guard = self.entries.lock().await;
        let mut deleted = 0u64;
        if let Some(queue) = guard.get_mut(&recipient.value) {
            for id in ids {
                if queue.remove(&id.value).is_some() {
                    deleted += 1;
                }
            }
        }
        let remaining = guard
            .get(&recipient.value)
            .map(|queue| queue.len() as u64)
            .unwrap_or(0);
        Ok(AckSummary {
            deleted,
            missing: (ids.len() as u64).saturating_sub(deleted),
            remaining,
        })
    }

    fn updates(&self) -> broadcast::Receiver<UserId> {
        self.notify.subscribe()
    }
}
