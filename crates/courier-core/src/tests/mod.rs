pub mod group_tests;
pub mod send_receive_tests;

use std::sync::Arc;

use courier_api::{
    ChatId, MediaMetadata, MediaSource, MessageId, MessageKind, Participant, SendRequest,
    ThreadInfo, ThreadKind, UserId,
};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::ids::direct_chat_id;
use crate::mailbox::InMemoryMailbox;
use crate::media::InMemoryBlobStore;
use crate::policy::Policy;
use crate::receipts::InMemoryReceiptChannel;
use crate::roster::InMemoryThreadDirectory;
use crate::store::{KeyProvider, MasterKey, StorageError};
use crate::Engine;

#[derive(Clone)]
pub struct TestKeyProvider;

impl KeyProvider for TestKeyProvider {
    fn get_or_create_master_key(&self) -> Result<MasterKey, StorageError> {
        Ok(MasterKey::new([7u8; 32]))
    }

    fn get_master_key(&self) -> Result<MasterKey, StorageError> {
        Ok(MasterKey::new([7u8; 32]))
    }
}

pub fn key_provider() -> Arc<TestKeyProvider> {
    Arc::new(TestKeyProvider)
}

pub fn temp_path(label: &str) -> String {
    format!("/tmp/{}-{}", label, Uuid::new_v4())
}

pub fn engine_config(user: &str, path: String) -> EngineConfig {
    EngineConfig {
        media_dir: format!("{}/media", path),
        storage_path: path,
        namespace: "test".to_string(),
        user_id: user.to_string(),
        display_name: None,
        enable_read_receipts: true,
        allow_media: true,
        poll_interval_ms: 0,
    }
}

pub struct Backend {
    pub mailbox: Arc<InMemoryMailbox>,
    pub receipts: Arc<InMemoryReceiptChannel>,
    pub threads: Arc<InMemoryThreadDirectory>,
    pub blobs: Arc<InMemoryBlobStore>,
}

pub fn backend() -> Backend {
    Backend {
        mailbox: Arc::new(InMemoryMailbox::new()),
        receipts: Arc::new(InMemoryReceiptChannel::new()),
        threads: Arc::new(InMemoryThreadDirectory::new()),
        blobs: Arc::new(InMemoryBlobStore::new()),
    }
}

pub async fn engine(backend: &Backend, user: &str, label: &str) -> Engine {
    engine_with_policy(backend, user, label, Policy::default()).await
}

pub async fn engine_with_policy(
    backend: &Backend,
    user: &str,
    label: &str,
    policy: Policy,
) -> Engine {
    Engine::init(
        engine_config(user, temp_path(label)),
        policy,
        key_provider(),
        backend.mailbox.clone(),
        backend.receipts.clone(),
        backend.threads.clone(),
        backend.blobs.clone(),
    )
    .await
    .expect("engine")
}

pub fn participant(user: &str) -> Participant {
    Participant {
        user_id: UserId::new(user.to_string()),
        display_name: None,
    }
}

pub async fn direct_thread(backend: &Backend, a: &str, b: &str) -> ChatId {
    let chat = direct_chat_id(&UserId::new(a.to_string()), &UserId::new(b.to_string()));
    backend
        .threads
        .insert(ThreadInfo {
            chat_id: chat.clone(),
            kind: ThreadKind::Direct,
            participants: vec![participant(a), participant(b)],
        })
        .await;
    chat
}

pub async fn group_thread(backend: &Backend, label: &str, members: &[&str]) -> ChatId {
    let chat = ChatId::new(format!("group-{}-{}", label, Uuid::new_v4()));
    backend
        .threads
        .insert(ThreadInfo {
            chat_id: chat.clone(),
            kind: ThreadKind::Group,
            participants: members.iter().map(|m| participant(m)).collect(),
        })
        .await;
    chat
}

pub fn text_request(chat: &ChatId, text: &str) -> SendRequest {
    SendRequest {
        client_message_id: MessageId::random(),
        chat_id: chat.clone(),
        kind: MessageKind::Text,
        text: Some(text.to_string()),
        media: None,
        reply_to: None,
    }
}

pub fn image_request(chat: &ChatId, source_path: &str, file_name: &str) -> SendRequest {
    SendRequest {
        client_message_id: MessageId::random(),
        chat_id: chat.clone(),
        kind: MessageKind::Image,
        text: Some("caption".to_string()),
        media: Some(MediaSource {
            source_path: source_path.to_string(),
            file_name: file_name.to_string(),
            mime_type: "image/png".to_string(),
            metadata: MediaMetadata::default(),
        }),
        reply_to: None,
    }
}

pub fn write_media_file(label: &str, bytes: &[u8]) -> String {
    let path = format!("/tmp/{}-{}.bin", label, Uuid::new_v4());
    std::fs::write(&path, bytes).expect("write media file");
    path
}
