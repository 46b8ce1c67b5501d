use crate::types::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty field {0}")]
    Empty(&'static str),
    #[error("too long {0}")]
    TooLong(&'static str),
    #[error("invalid media {0}")]
    InvalidMedia(&'static str),
    #[error("missing content for kind")]
    MissingContent,
}

pub fn validate_user_id(user: &UserId) -> Result<(), ValidationError> {
    if user.value.trim().is_empty() {
        return Err(ValidationError::Empty("user_id"));
    }
    Ok(())
}

pub fn validate_send_request(
    req: &SendRequest,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    if req.chat_id.value.trim().is_empty() {
        return Err(ValidationError::Empty("chat_id"));
    }
    match req.kind {
        MessageKind::Text | MessageKind::Location | MessageKind::System => {
            let text = req.text.as_deref().unwrap_or("");
            if text.trim().is_empty() {
                return Err(ValidationError::MissingContent);
            }
            if text.len() > limits.max_text_bytes {
                return Err(ValidationError::TooLong("text"));
            }
            if req.media.is_some() {
                return Err(ValidationError::InvalidMedia("unexpected"));
            }
        }
        MessageKind::Image | MessageKind::Video | MessageKind::Audio | MessageKind::File => {
            if req.text.as_deref().unwrap_or("").len() > limits.max_caption_bytes {
                return Err(ValidationError::TooLong("caption"));
            }
            let media = req.media.as_ref().ok_or(ValidationError::MissingContent)?;
            if media.source_path.trim().is_empty() {
                return Err(ValidationError::Empty("source_path"));
            }
            if media.file_name.trim().is_empty() {
                return Err(ValidationError::Empty("file_name"));
            }
            if media.file_name.len() > limits.max_name_len {
                return Err(ValidationError::TooLong("file_name"));
            }
            if media.mime_type.trim().is_empty() {
                return Err(ValidationError::Empty("mime_type"));
            }
            if media.metadata.size == Some(0) {
                return Err(ValidationError::InvalidMedia("size"));
            }
        }
    }
    if let Some(reply) = req.reply_to.as_ref() {
        if reply.sender_id.value.trim().is_empty() {
            return Err(ValidationError::Empty("reply_sender"));
        }
    }
    Ok(())
}
