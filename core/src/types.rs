//! DTOs for the document methods.
//!
//! # Design
//! Fields the provider may omit are `#[serde(default)]`; the provider adds
//! fields across API versions, so unknown ones are ignored rather than
//! rejected.

use serde::{Deserialize, Serialize};

/// A user or community document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
}

impl Document {
    /// The `<owner_id>_<id>` form used by `docs.getById` and attachments.
    pub fn full_id(&self) -> String {
        format!("{}_{}", self.owner_id, self.id)
    }
}

/// Where to POST a file before saving it with `docs.save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadServerInfo {
    pub upload_url: String,
}

/// A `{count, items}` page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsPage<T> {
    pub total_count: i64,
    pub items: Vec<T>,
}
