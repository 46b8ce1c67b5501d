use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserId {
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatId {
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageId {
    pub value: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
    Location,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum ThreadKind {
    Direct,
    Group,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaMetadata {
    pub file_name: Option<String>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaRef {
    pub local_path: Option<String>,
    pub remote_url: Option<String>,
    pub metadata: MediaMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplyPreview {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub content: Option<String>,
    pub kind: MessageKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to: Option<ReplyPreview>,
    pub status: MessageStatus,
    pub timestamp: u64,
    pub delivered_to: BTreeSet<String>,
    pub read_by: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadInfo {
    pub chat_id: ChatId,
    pub kind: ThreadKind,
    pub participants: Vec<Participant>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailboxEnvelope {
    pub recipient_id: UserId,
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to: Option<ReplyPreview>,
    pub thread: ThreadKind,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptRecord {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub recipient_id: UserId,
    pub delivered: bool,
    pub delivered_at: Option<u64>,
    pub read: bool,
    pub read_at: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaSource {
    pub source_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub metadata: MediaMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendRequest {
    pub client_message_id: MessageId,
    pub chat_id: ChatId,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media: Option<MediaSource>,
    pub reply_to: Option<ReplyPreview>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum ChatEvent {
    MessageStored {
        message: Message,
    },
    StatusChanged {
        chat_id: ChatId,
        message_id: MessageId,
        status: MessageStatus,
    },
    UploadStarted {
        chat_id: ChatId,
        message_id: MessageId,
    },
    UploadProgress {
        chat_id: ChatId,
        message_id: MessageId,
        bytes_sent: u64,
        bytes_total: u64,
    },
    MediaResolved {
        chat_id: ChatId,
        message_id: MessageId,
    },
    MediaFailed {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationLimits {
    pub max_text_bytes: usize,
    pub max_caption_bytes: usize,
    pub max_name_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_text_bytes: 64 * 1024,
            max_caption_bytes: 4 * 1024,
            max_name_len: 64,
        }
    }
}

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl ChatId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl MessageId {
    pub fn random() -> Self {
        Self {
            value: Uuid::new_v4(),
        }
    }
}

impl MessageStatus {
    pub fn rank(&self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 0,
        }
    }

    pub fn promote(self, next: MessageStatus) -> MessageStatus {
        if self == MessageStatus::Failed {
            return MessageStatus::Failed;
        }
        if next == MessageStatus::Failed {
            if self == MessageStatus::Sending {
                return MessageStatus::Failed;
            }
            return self;
        }
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }
}

impl Message {
    pub fn is_from(&self, user: &UserId) -> bool {
        self.sender_id == *user
    }
}

impl ThreadInfo {
    pub fn is_group(&self) -> bool {
        self.kind == ThreadKind::Group
    }

    pub fn recipients(&self, own: &UserId) -> Vec<UserId> {
        self.participants
            .iter()
            .filter(|p| p.user_id != *own)
            .map(|p| p.user_id.clone())
            .collect()
    }
}

impl MailboxEnvelope {
    pub fn from_message(message: &Message, recipient: &UserId, thread: ThreadKind) -> Self {
        let media = message.media.as_ref().map(|m| MediaRef {
            local_path: None,
            remote_url: m.remote_url.clone(),
            metadata: m.metadata.clone(),
        });
        Self {
            recipient_id: recipient.clone(),
            id: message.id.clone(),
            chat_id: message.chat_id.clone(),
            sender_id: message.sender_id.clone(),
            kind: message.kind.clone(),
            content: message.content.clone(),
            media,
            reply_to: message.reply_to.clone(),
            thread,
            timestamp: message.timestamp,
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            kind: self.kind,
            content: self.content,
            media: self.media,
            reply_to: self.reply_to,
            status: MessageStatus::Delivered,
            timestamp: self.timestamp,
            delivered_to: BTreeSet::new(),
            read_by: BTreeSet::new(),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.recipient_id.value.trim().is_empty() {
            return Err("recipient_id");
        }
        if self.chat_id.value.trim().is_empty() {
            return Err("chat_id");
        }
        if self.sender_id.value.trim().is_empty() {
            return Err("sender_id");
        }
        Ok(())
    }
}
