use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub storage_path: String,
    pub namespace: String,
    pub media_dir: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub enable_read_receipts: bool,
    pub allow_media: bool,
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_path: ".courier".to_string(),
            namespace: "default".to_string(),
            media_dir: ".courier/media".to_string(),
            user_id: String::new(),
            display_name: None,
            enable_read_receipts: true,
            allow_media: true,
            poll_interval_ms: 2000,
        }
    }
}
