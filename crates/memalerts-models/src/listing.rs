//! Per-channel listing projection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Denormalized copy of an asset's metadata inside one channel's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChannelListing {
    pub id: String,
    pub channel_id: String,
    pub meme_asset_id: String,
    pub title: String,
    #[serde(default)]
    pub ai_auto_description: Option<String>,
    #[serde(default)]
    pub ai_auto_tags: Vec<String>,
    #[serde(default)]
    pub search_text: Option<String>,
}

impl ChannelListing {
    /// The listing title may be replaced only while it still carries the
    /// submitter's original title.
    pub fn title_is_untouched(&self, original_title: &str) -> bool {
        self.title.trim() == original_title.trim()
    }
}
