//! Shared data shapes exchanged between the ingest, queue and dispatch stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One record handed over by the upstream feed reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub description: String,
}

impl FeedRecord {
    /// Dedup key for the record within one run; falls back to the link.
    pub fn guid_or_link(&self) -> &str {
        let guid = self.guid.trim();
        if guid.is_empty() {
            self.link.trim()
        } else {
            guid
        }
    }
}

/// Lifecycle marker stored on each queue entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    #[default]
    Pending,
}

/// Persisted publish-queue entry. `url` is the unique key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub state: QueueState,
    #[serde(default)]
    pub queued_at: String,
}

impl QueueItem {
    /// Creates a pending item with an empty `queued_at`; the merger stamps it.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
        date: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            source: source.into(),
            date: date.into(),
            file: file.into(),
            state: QueueState::Pending,
            queued_at: String::new(),
        }
    }

    /// Returns `true` when the content fields (everything but bookkeeping) match.
    pub fn same_content(&self, other: &QueueItem) -> bool {
        self.title == other.title
            && self.url == other.url
            && self.source == other.source
            && self.date == other.date
            && self.file == other.file
    }
}

/// Closed set of slot states. `Success` is absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Queued,
    Success,
    Failed,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Queued => "queued",
            SlotStatus::Success => "success",
            SlotStatus::Failed => "failed",
        }
    }
}

/// Per-platform retry and status record for one queued item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlatformSlot {
    #[serde(default)]
    pub status: SlotStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt_at: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
}

/// Tracked item inside the dispatch state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispatchEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformSlot>,
    #[serde(default)]
    pub created_at: String,
}

impl DispatchEntry {
    /// Creates an entry from the first sighting of a queue item.
    pub fn from_queue_item(item: &QueueItem, now: &str) -> Self {
        Self {
            title: item.title.trim().to_string(),
            source: item.source.trim().to_string(),
            date: item.date.trim().to_string(),
            file: item.file.trim().to_string(),
            platforms: BTreeMap::new(),
            created_at: now.to_string(),
        }
    }
}

/// Root of the persisted dispatch-state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispatchState {
    #[serde(default)]
    pub items: BTreeMap<String, DispatchEntry>,
    #[serde(default)]
    pub updated_at: String,
}

/// Normalized result of one platform send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Failed,
    /// Destination or credential missing; nothing was attempted.
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub status: SendStatus,
    pub message: String,
    pub http_code: Option<u16>,
}

impl SendOutcome {
    pub fn success(message: impl Into<String>, http_code: Option<u16>) -> Self {
        Self {
            status: SendStatus::Success,
            message: message.into(),
            http_code,
        }
    }

    pub fn failed(message: impl Into<String>, http_code: Option<u16>) -> Self {
        Self {
            status: SendStatus::Failed,
            message: message.into(),
            http_code,
        }
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self {
            status: SendStatus::NotConfigured,
            message: message.into(),
            http_code: None,
        }
    }
}

/// Body handed to a platform adapter for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchPayload {
    pub platform: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub date: String,
    pub file: String,
    pub body: String,
}

/// Poster and detail text resolved for one item before it is finalised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ItemManifest {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date: String,
    /// Local reference of the stored poster, e.g. `/posters/<hash>.jpg`.
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub poster_source: Option<String>,
    #[serde(default)]
    pub cast: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: String,
}
