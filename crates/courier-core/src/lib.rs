pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod journal;
pub mod mailbox;
pub mod media;
pub mod messages;
pub mod policy;
pub mod receipts;
pub mod roster;
pub mod store;
pub mod sync;
pub mod time;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
#[cfg(test)]
use std::sync::atomic::AtomicBool;
#[cfg(test)]
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use courier_api::{
    validate_send_request, validate_user_id, ChatEvent, ChatId, MailboxEnvelope, MediaMetadata,
    MediaRef, MediaSource, Message, MessageId, MessageStatus, SendRequest, ThreadKind, UserId,
    ValidationLimits,
};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::{EventBus, EventReceiver};
use crate::journal::{PendingFanout, SendJournal};
use crate::mailbox::MailboxTransport;
use crate::media::{BlobStore, MediaPipeline};
use crate::messages::MessageStore;
use crate::policy::{Policy, ReceiptAggregation};
use crate::receipts::ReceiptChannel;
use crate::roster::ThreadDirectory;
use crate::store::{EncryptedStore, KeyProvider};
use crate::sync::{Connectivity, Subscription};
use crate::time::now_ms;

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub user_id: String,
    pub chats: usize,
    pub messages: usize,
    pub pending_sends: usize,
}

#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    policy: Policy,
    user_id: UserId,
    messages: MessageStore,
    journal: SendJournal,
    mailbox: Arc<dyn MailboxTransport>,
    receipts: Arc<dyn ReceiptChannel>,
    threads: Arc<dyn ThreadDirectory>,
    media: MediaPipeline,
    events: EventBus,
    connectivity: Connectivity,
    last_timestamp: Arc<Mutex<u64>>,
    tasks: Arc<StdMutex<Vec<Subscription>>>,
    #[cfg(test)]
    persist_fail: Arc<AtomicBool>,
}

impl Engine {
    pub async fn init(
        config: EngineConfig,
        policy: Policy,
        key_provider: Arc<dyn KeyProvider>,
        mailbox: Arc<dyn MailboxTransport>,
        receipts: Arc<dyn ReceiptChannel>,
        threads: Arc<dyn ThreadDirectory>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, EngineError> {
        let user_id = UserId::new(config.user_id.clone());
        validate_user_id(&user_id).map_err(|e| EngineError::Validation(e.to_string()))?;
        let store = EncryptedStore::open(
            &config.storage_path,
            &config.namespace,
            key_provider.as_ref(),
        )
        .map_err(|_| EngineError::Storage)?;
        let store = Arc::new(Mutex::new(store));
        let events = EventBus::new(policy.event_buffer);
        let media_dir = PathBuf::from(&config.media_dir);
        let engine = Self {
            user_id,
            messages: MessageStore::new(store.clone()),
            journal: SendJournal::new(store),
            mailbox,
            receipts,
            threads,
            media: MediaPipeline::new(blobs, media_dir, events.clone()),
            events,
            connectivity: Connectivity::new(true),
            last_timestamp: Arc::new(Mutex::new(0)),
            tasks: Arc::new(StdMutex::new(Vec::new())),
            config,
            policy,
            #[cfg(test)]
            persist_fail: Arc::new(AtomicBool::new(false)),
        };
        if engine.config.poll_interval_ms > 0 {
            engine.start_mailbox_listener();
            engine.start_receipt_listener();
            engine.start_reconnect_listener();
            engine.start_poller();
        }
        Ok(engine)
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.clone()
    }

    pub async fn messages(&self, chat: &ChatId) -> Result<Vec<Message>, EngineError> {
        self.messages.get_all(chat).await
    }

    pub async fn chats(&self) -> Result<Vec<ChatId>, EngineError> {
        self.messages.chats().await
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let chats = self.messages.chats().await?;
        let mut total = 0;
        for chat in chats.iter() {
            total += self.messages.get_all(chat).await?.len();
        }
        Ok(EngineStats {
            user_id: self.user_id.value.clone(),
            chats: chats.len(),
            messages: total,
            pending_sends: self.journal.len().await?,
        })
    }

    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.tasks.lock() {
            for mut task in guard.drain(..) {
                task.cancel();
            }
        }
    }

    pub async fn send_message(&self, request: SendRequest) -> Result<MessageId, EngineError> {
        let limits = ValidationLimits {
            max_text_bytes: self.policy.max_text_bytes,
            max_caption_bytes: self.policy.max_caption_bytes,
            max_name_len: self.policy.max_file_name_len,
        };
        validate_send_request(&request, &limits)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        if !self.config.allow_media && request.media.is_some() {
            return Err(EngineError::Validation("media disabled".to_string()));
        }
        let thread = self.threads.thread(&request.chat_id).await?;
        let recipients = thread.recipients(&self.user_id);
        if recipients.is_empty() {
            return Err(EngineError::Validation("no recipients".to_string()));
        }
        let message_id = request.client_message_id.clone();
        let timestamp = self.next_timestamp().await;
        let media = request.media.as_ref().map(|source| {
            let mut metadata = source.metadata.clone();
            if metadata.file_name.is_none() {
                metadata.file_name = Some(source.file_name.clone());
            }
            if metadata.mime_type.is_none() {
                metadata.mime_type = Some(source.mime_type.clone());
            }
            MediaRef {
                local_path: None,
                remote_url: None,
                metadata,
            }
        });
        let message = Message {
            id: message_id.clone(),
            chat_id: request.chat_id.clone(),
            sender_id: self.user_id.clone(),
            kind: request.kind.clone(),
            content: request.text.clone(),
            media,
            reply_to: request.reply_to.clone(),
            status: MessageStatus::Sending,
            timestamp,
            delivered_to: BTreeSet::new(),
            read_by: BTreeSet::new(),
        };
        let stored = self.messages.upsert(message).await?;
        self.events.publish(ChatEvent::MessageStored { message: stored });
        match request.media {
            Some(source) => {
                match self
                    .media
                    .cache_local(
                        &source.source_path,
                        &request.chat_id,
                        &message_id,
                        &source.file_name,
                    )
                    .await
                {
                    Ok(path) => {
                        if self
                            .merge_media_fields(&request.chat_id, &message_id, Some(path), None)
                            .await
                            .is_err()
                        {
                            log::debug!("local media path not recorded for {}", message_id.value);
                        }
                    }
                    Err(err) => {
                        log::debug!("local media cache skipped for {}: {}", message_id.value, err)
                    }
                }
                self.spawn_upload(
                    request.chat_id.clone(),
                    message_id.clone(),
                    source,
                    recipients,
                    thread.kind,
                );
            }
            None => {
                self.journal
                    .put(PendingFanout {
                        message_id: message_id.value,
                        chat_id: request.chat_id.value.clone(),
                        thread: thread.kind,
                        recipients: recipients.iter().map(|r| r.value.clone()).collect(),
                        created_at_ms: now_ms(),
                    })
                    .await?;
                if self.connectivity.is_online() {
                    if let Err(err) = self.run_fanout(&request.chat_id, &message_id).await {
                        log::warn!("fan-out deferred for {}: {}", message_id.value, err);
                    }
                }
            }
        }
        Ok(message_id)
    }

    pub async fn mark_chat_read(&self, chat: &ChatId) -> Result<usize, EngineError> {
        let messages = self.messages.get_all(chat).await?;
        let unread: Vec<MessageId> = messages
            .iter()
            .filter(|m| !m.is_from(&self.user_id) && !m.read_by.contains(&self.user_id.value))
            .map(|m| m.id.clone())
            .collect();
        if unread.is_empty() {
            return Ok(0);
        }
        if self.config.enable_read_receipts {
            let group = match self.threads.thread(chat).await {
                Ok(info) => info.is_group(),
                Err(EngineError::NotFound) => false,
                Err(err) => return Err(err),
            };
            self.receipts
                .send_bulk_read(chat, &unread, &self.user_id, group)
                .await?;
        }
        self.messages.mark_read(chat, &unread, &self.user_id).await?;
        for id in unread.iter() {
            self.events.publish(ChatEvent::StatusChanged {
                chat_id: chat.clone(),
                message_id: id.clone(),
                status: MessageStatus::Read,
            });
        }
        Ok(unread.len())
    }

    pub async fn ensure_media(
        &self,
        chat: &ChatId,
        id: &MessageId,
    ) -> Result<Option<String>, EngineError> {
        let message = self
            .messages
            .get(chat, id)
            .await?
            .ok_or(EngineError::NotFound)?;
        let Some(media) = message.media else {
            return Ok(None);
        };
        if let Some(path) = media.local_path {
            return Ok(Some(path));
        }
        if media.remote_url.is_none() {
            return Ok(None);
        }
        self.run_download(chat, id).await?;
        let refreshed = self
            .messages
            .get(chat, id)
            .await?
            .ok_or(EngineError::NotFound)?;
        Ok(refreshed.media.and_then(|m| m.local_path))
    }

    pub async fn poll_once(&self) -> Result<(), EngineError> {
        self.process_mailbox().await?;
        for chat in self.messages.chats().await? {
            self.apply_receipts(&chat).await?;
        }
        Ok(())
    }

    pub async fn flush_pending(&self) -> Result<usize, EngineError> {
        let pending = self.journal.load_all(self.policy.journal_flush_batch).await?;
        let window_ms = self.policy.max_journal_age_secs.saturating_mul(1000);
        let now = now_ms();
        let mut flushed = 0;
        for item in pending {
            let chat = ChatId::new(item.chat_id.clone());
            let id = MessageId {
                value: item.message_id,
            };
            if now.saturating_sub(item.created_at_ms) > window_ms {
                self.journal.remove(&item.message_id).await?;
                self.fail_message(&chat, &id).await;
                continue;
            }
            match self.run_fanout(&chat, &id).await {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(err) => log::warn!("pending flush failed for {}: {}", item.message_id, err),
            }
        }
        Ok(flushed)
    }

    async fn next_timestamp(&self) -> u64 {
        let mut guard = self.last_timestamp.lock().await;
        let mut now = now_ms();
        if now <= *guard {
            now = *guard + 1;
        }
        *guard = now;
        now
    }

    async fn merge_media_fields(
        &self,
        chat: &ChatId,
        id: &MessageId,
        local_path: Option<String>,
        remote_url: Option<String>,
    ) -> Result<Option<Message>, EngineError> {
        let Some(current) = self.messages.get(chat, id).await? else {
            return Ok(None);
        };
        let patch = Message {
            id: current.id.clone(),
            chat_id: current.chat_id.clone(),
            sender_id: current.sender_id.clone(),
            kind: current.kind.clone(),
            content: None,
            media: Some(MediaRef {
                local_path,
                remote_url,
                metadata: MediaMetadata::default(),
            }),
            reply_to: None,
            status: MessageStatus::Sending,
            timestamp: current.timestamp,
            delivered_to: BTreeSet::new(),
            read_by: BTreeSet::new(),
        };
        self.messages.upsert(patch).await.map(Some)
    }

    async fn run_fanout(&self, chat: &ChatId, id: &MessageId) -> Result<bool, EngineError> {
        let Some(pending) = self.journal.get(&id.value).await? else {
            return Ok(true);
        };
        let Some(message) = self.messages.get(chat, id).await? else {
            self.journal.remove(&id.value).await?;
            return Ok(true);
        };
        if message.status == MessageStatus::Failed {
            self.journal.remove(&id.value).await?;
            return Ok(true);
        }
        let mut remaining = Vec::new();
        for recipient in pending.recipients.iter() {
            let target = UserId::new(recipient.clone());
            let envelope = MailboxEnvelope::from_message(&message, &target, pending.thread);
            if let Err(err) = self.mailbox.publish(envelope).await {
                log::debug!("mailbox publish to {} failed: {}", recipient, err);
                remaining.push(recipient.clone());
            }
        }
        if remaining.is_empty() {
            self.journal.remove(&id.value).await?;
            if message.status == MessageStatus::Sending {
                if let Some(updated) = self
                    .messages
                    .update_status(chat, id, MessageStatus::Sent, None, None)
                    .await?
                {
                    if updated.status != message.status {
                        self.events.publish(ChatEvent::StatusChanged {
                            chat_id: chat.clone(),
                            message_id: id.clone(),
                            status: updated.status,
                        });
                    }
                }
            }
            Ok(true)
        } else {
            self.journal.set_recipients(&id.value, remaining).await?;
            Ok(false)
        }
    }

    async fn fail_message(&self, chat: &ChatId, id: &MessageId) {
        match self
            .messages
            .update_status(chat, id, MessageStatus::Failed, None, None)
            .await
        {
            Ok(Some(updated)) if updated.status == MessageStatus::Failed => {
                self.events.publish(ChatEvent::StatusChanged {
                    chat_id: chat.clone(),
                    message_id: id.clone(),
                    status: MessageStatus::Failed,
                });
            }
            Ok(_) => {}
            Err(err) => log::warn!("status update failed for {}: {}", id.value, err),
        }
    }

    fn spawn_upload(
        &self,
        chat: ChatId,
        id: MessageId,
        source: MediaSource,
        recipients: Vec<UserId>,
        thread: ThreadKind,
    ) {
        let cloned = self.clone();
        let handle = tokio::spawn(async move {
            cloned.events.publish(ChatEvent::UploadStarted {
                chat_id: chat.clone(),
                message_id: id.clone(),
            });
            match cloned.run_upload(&chat, &id, &source).await {
                Ok(()) => {
                    let pending = PendingFanout {
                        message_id: id.value,
                        chat_id: chat.value.clone(),
                        thread,
                        recipients: recipients.iter().map(|r| r.value.clone()).collect(),
                        created_at_ms: now_ms(),
                    };
                    if let Err(err) = cloned.journal.put(pending).await {
                        log::warn!("send journal write failed for {}: {}", id.value, err);
                        return;
                    }
                    if cloned.connectivity.is_online() {
                        if let Err(err) = cloned.run_fanout(&chat, &id).await {
                            log::warn!("fan-out deferred for {}: {}", id.value, err);
                        }
                    }
                }
                Err(err) => {
                    log::warn!("media upload failed for {}: {}", id.value, err);
                    cloned.fail_message(&chat, &id).await;
                    cloned.events.publish(ChatEvent::MediaFailed {
                        chat_id: chat,
                        message_id: id,
                    });
                }
            }
        });
        self.track(handle);
    }

    async fn run_upload(
        &self,
        chat: &ChatId,
        id: &MessageId,
        source: &MediaSource,
    ) -> Result<(), EngineError> {
        let message = self
            .messages
            .get(chat, id)
            .await?
            .ok_or(EngineError::NotFound)?;
        let path = message
            .media
            .as_ref()
            .and_then(|m| m.local_path.clone())
            .unwrap_or_else(|| source.source_path.clone());
        let url = self
            .media
            .upload(&path, chat, id, &source.file_name, self.policy.max_media_bytes)
            .await?;
        self.merge_media_fields(chat, id, None, Some(url)).await?;
        Ok(())
    }

    async fn process_mailbox(&self) -> Result<(), EngineError> {
        let entries = self.mailbox.fetch(&self.user_id).await?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut acks = Vec::new();
        for envelope in entries {
            match self.accept_envelope(&envelope).await {
                Ok(()) => acks.push(envelope.id.clone()),
                Err(err) => {
                    log::warn!("incoming message {} left queued: {}", envelope.id.value, err)
                }
            }
        }
        if acks.is_empty() {
            return Ok(());
        }
        let summary = self.mailbox.ack(&self.user_id, &acks).await?;
        if (summary.deleted as usize) < acks.len() {
            return Err(EngineError::Transport("ack incomplete".to_string()));
        }
        Ok(())
    }

    async fn accept_envelope(&self, envelope: &MailboxEnvelope) -> Result<(), EngineError> {
        #[cfg(test)]
        if self.persist_fail.load(Ordering::SeqCst) {
            return Err(EngineError::Storage);
        }
        envelope
            .validate()
            .map_err(|field| EngineError::Validation(field.to_string()))?;
        let incoming = envelope.clone().into_message();
        let chat = incoming.chat_id.clone();
        let id = incoming.id.clone();
        let group = envelope.thread == ThreadKind::Group;
        let known = self.messages.get(&chat, &id).await?.is_some();
        let stored = self.messages.upsert(incoming).await?;
        self.messages
            .mark_delivered(&chat, &[id.clone()], &self.user_id)
            .await?;
        self.receipts
            .send_delivered(&chat, &id, &self.user_id, group)
            .await?;
        if !known {
            self.events.publish(ChatEvent::MessageStored {
                message: stored.clone(),
            });
        }
        let wants_download = stored
            .media
            .as_ref()
            .map(|m| m.remote_url.is_some() && m.local_path.is_none())
            .unwrap_or(false);
        if wants_download {
            self.spawn_download(chat, id);
        }
        Ok(())
    }

    async fn apply_receipts(&self, chat: &ChatId) -> Result<(), EngineError> {
        let ledger = self.receipts.fetch(chat).await?;
        if ledger.is_empty() {
            return Ok(());
        }
        let mut delivered: BTreeMap<Uuid, BTreeSet<String>> = BTreeMap::new();
        let mut read: BTreeMap<Uuid, BTreeSet<String>> = BTreeMap::new();
        for row in ledger {
            if row.delivered {
                delivered
                    .entry(row.message_id.value)
                    .or_default()
                    .insert(row.recipient_id.value.clone());
            }
            if row.read {
                read.entry(row.message_id.value)
                    .or_default()
                    .insert(row.recipient_id.value);
            }
        }
        let total = match self.threads.thread(chat).await {
            Ok(info) => Some(info.recipients(&self.user_id).len()),
            Err(EngineError::NotFound) => None,
            Err(err) => return Err(err),
        };
        let empty = BTreeSet::new();
        for message in self.messages.get_all(chat).await? {
            if !message.is_from(&self.user_id) {
                continue;
            }
            let delivered_set = delivered.get(&message.id.value).unwrap_or(&empty);
            let read_set = read.get(&message.id.value).unwrap_or(&empty);
            if delivered_set.is_empty() && read_set.is_empty() {
                continue;
            }
            let desired = match total {
                Some(total) => {
                    if Self::meets_threshold(read_set.len(), total, &self.policy.receipt_aggregation)
                    {
                        MessageStatus::Read
                    } else if Self::meets_threshold(
                        delivered_set.len(),
                        total,
                        &self.policy.receipt_aggregation,
                    ) {
                        MessageStatus::Delivered
                    } else {
                        message.status
                    }
                }
                None => message.status,
            };
            let grows = !delivered_set.is_subset(&message.delivered_to)
                || !read_set.is_subset(&message.read_by);
            let promotes = message.status.promote(desired) != message.status;
            if !grows && !promotes {
                continue;
            }
            if let Some(updated) = self
                .messages
                .update_status(chat, &message.id, desired, Some(delivered_set), Some(read_set))
                .await?
            {
                if updated.status != message.status {
                    self.events.publish(ChatEvent::StatusChanged {
                        chat_id: chat.clone(),
                        message_id: message.id.clone(),
                        status: updated.status,
                    });
                }
            }
        }
        Ok(())
    }

    fn meets_threshold(count: usize, total: usize, aggregation: &ReceiptAggregation) -> bool {
        if total == 0 {
            return false;
        }
        match aggregation {
            ReceiptAggregation::Any => count >= 1,
            ReceiptAggregation::All => count >= total,
        }
    }

    fn spawn_download(&self, chat: ChatId, id: MessageId) {
        let cloned = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = cloned.run_download(&chat, &id).await {
                log::debug!("media download deferred for {}: {}", id.value, err);
                cloned.events.publish(ChatEvent::MediaFailed {
                    chat_id: chat,
                    message_id: id,
                });
            }
        });
        self.track(handle);
    }

    async fn run_download(&self, chat: &ChatId, id: &MessageId) -> Result<(), EngineError> {
        let Some(message) = self.messages.get(chat, id).await? else {
            return Err(EngineError::NotFound);
        };
        let Some(media) = message.media else {
            return Ok(());
        };
        if media.local_path.is_some() {
            return Ok(());
        }
        let Some(url) = media.remote_url else {
            return Ok(());
        };
        let file_name = media
            .metadata
            .file_name
            .clone()
            .unwrap_or_else(|| "blob".to_string());
        let path = self.media.download(&url, chat, id, &file_name).await?;
        self.merge_media_fields(chat, id, Some(path), None).await?;
        self.events.publish(ChatEvent::MediaResolved {
            chat_id: chat.clone(),
            message_id: id.clone(),
        });
        Ok(())
    }

    fn start_mailbox_listener(&self) {
        let cloned = self.clone();
        let mut updates = self.mailbox.updates();
        let handle = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(recipient) => {
                        if recipient != cloned.user_id {
                            continue;
                        }
                        if let Err(err) = cloned.process_mailbox().await {
                            log::warn!("mailbox sync failed: {}", err);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.track(handle);
    }

    fn start_receipt_listener(&self) {
        let cloned = self.clone();
        let mut updates = self.receipts.updates();
        let handle = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(chat) => {
                        if let Err(err) = cloned.apply_receipts(&chat).await {
                            log::warn!("receipt sync failed for {}: {}", chat.value, err);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.track(handle);
    }

    fn start_reconnect_listener(&self) {
        let cloned = self.clone();
        let mut rx = self.connectivity.subscribe();
        let handle = tokio::spawn(async move {
            let mut was_online = *rx.borrow();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow();
                if online && !was_online {
                    if let Err(err) = cloned.flush_pending().await {
                        log::warn!("reconnect flush failed: {}", err);
                    }
                    if let Err(err) = cloned.poll_once().await {
                        log::warn!("reconnect sync failed: {}", err);
                    }
                }
                was_online = online;
            }
        });
        self.track(handle);
    }

    fn start_poller(&self) {
        let cloned = self.clone();
        let interval_ms = self.config.poll_interval_ms;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                if !cloned.connectivity.is_online() {
                    continue;
                }
                let _ = cloned.poll_once().await;
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut guard) = self.tasks.lock() {
            guard.push(Subscription::new(handle));
        }
    }
}

#[cfg(test)]
mod tests;
