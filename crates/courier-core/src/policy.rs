use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub enum ReceiptAggregation {
    Any,
    All,
}

impl Default for ReceiptAggregation {
    fn default() -> Self {
        ReceiptAggregation::All
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    pub receipt_aggregation: ReceiptAggregation,
    pub max_text_bytes: usize,
    pub max_caption_bytes: usize,
    pub max_file_name_len: usize,
    pub max_media_bytes: usize,
    pub journal_flush_batch: usize,
    pub max_journal_age_secs: u64,
    pub event_buffer: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            receipt_aggregation: ReceiptAggregation::All,
            max_text_bytes: 64 * 1024,
            max_caption_bytes: 4 * 1024,
            max_file_name_len: 64,
            max_media_bytes: 64 * 1024 * 1024,
            journal_flush_batch: 64,
            max_journal_age_secs: 7 * 24 * 3600,
            event_buffer: 256,
        }
    }
}
