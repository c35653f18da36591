// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Top-level browse sections of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    All,
    Movies,
    Series,
    Live,
    Categories,
    ContinueWatching,
    Favorites,
    LocalFiles,
    Settings,
}

impl Section {
    /// Sections backed by the upstream catalog (everything the search index covers).
    pub fn indexable() -> [Section; 3] {
        [Section::Series, Section::Movies, Section::Live]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::All => "all",
            Section::Movies => "movies",
            Section::Series => "series",
            Section::Live => "live",
            Section::Categories => "categories",
            Section::ContinueWatching => "continue_watching",
            Section::Favorites => "favorites",
            Section::LocalFiles => "local_files",
            Section::Settings => "settings",
        }
    }

    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Section::Live => Some(ContentType::Live),
            Section::Movies => Some(ContentType::Movies),
            Section::Series => Some(ContentType::Series),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Live,
    Movies,
    Series,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Live => "live",
            ContentType::Movies => "movies",
            ContentType::Series => "series",
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            ContentType::Live => "live-",
            ContentType::Movies => "vod-",
            ContentType::Series => "series-",
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            ContentType::Live => "Live TV",
            ContentType::Movies => "Movie",
            ContentType::Series => "Series",
        }
    }

    pub fn section(&self) -> Section {
        match self {
            ContentType::Live => Section::Live,
            ContentType::Movies => Section::Movies,
            ContentType::Series => Section::Series,
        }
    }
}

/// A normalized catalog entry. Immutable value type: superseded by re-fetch,
/// never mutated in place. The `id` carries a kind prefix (`vod-`, `series-`,
/// `live-`, `ep-`, `cat-`) over the raw upstream id so it stays stable across
/// syncs and cache/favorites keys remain valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub image_url: Option<String>,
    pub section: Section,
    pub content_type: ContentType,
    pub stream_id: String,
    pub container_extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryItem {
    pub id: String,
    pub name: String,
    pub kind: ContentType,
}

/// One window of catalog items. `end_reached` is true when no further pages
/// exist past this one; a short page (fewer items than the requested limit)
/// always ends the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPage {
    pub items: Vec<ContentItem>,
    pub end_reached: bool,
}

impl ContentPage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            end_reached: true,
        }
    }
}

/// Account credentials. `(base_url, username, list_name)` defines account
/// identity for cache partitioning; the password only participates in the
/// authentication call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub list_name: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    /// SHA-256 hex over `base_url|username|list_name`, used as the cache
    /// filename suffix for everything belonging to this account.
    pub fn account_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.base_url.as_bytes());
        hasher.update(b"|");
        hasher.update(self.username.as_bytes());
        hasher.update(b"|");
        hasher.update(self.list_name.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Resume point for an in-progress section index build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSyncCheckpoint {
    pub last_page_synced: u32,
    pub items_indexed: u64,
    pub is_complete: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    FastStart,
    BackgroundFull,
    OnDemandBoost,
    Complete,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSyncProgress {
    pub items_indexed: u64,
    pub complete: bool,
}

/// Single source of truth for background indexing work. Persisted after every
/// transition so a killed process resumes in a sensible phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveSyncState {
    pub phase: SyncPhase,
    pub sections_completed: HashSet<Section>,
    pub fast_start_ready: bool,
    pub full_index_complete: bool,
    pub current_section: Option<Section>,
    pub section_progress: HashMap<Section, SectionSyncProgress>,
    pub is_paused: bool,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl Default for ProgressiveSyncState {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            sections_completed: HashSet::new(),
            fast_start_ready: false,
            full_index_complete: false,
            current_section: None,
            section_progress: HashMap::new(),
            is_paused: false,
            last_sync_timestamp: None,
        }
    }
}

/// Progress report emitted while building the local search index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LibrarySyncProgress {
    /// 0.0..=1.0, completed sections over total requested sections.
    pub fraction: f32,
    pub sections_done: usize,
    pub sections_total: usize,
    pub items_indexed: u64,
}

/// Minimum watched position before an entry counts as resumable.
pub const RESUME_MIN_WATCHED_MS: u64 = 10_000;
/// Past this fraction of the duration the entry counts as finished.
pub const RESUME_NEAR_COMPLETE_FRACTION: f64 = 0.98;

/// Continue-watching eligibility: enough watched to matter, not so much that
/// the entry is effectively finished.
pub fn is_resume_eligible(position_ms: u64, duration_ms: u64) -> bool {
    if duration_ms == 0 || position_ms < RESUME_MIN_WATCHED_MS {
        return false;
    }
    (position_ms as f64) <= (duration_ms as f64) * RESUME_NEAR_COMPLETE_FRACTION
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AuthConfig {
        AuthConfig {
            list_name: "home".to_string(),
            base_url: "http://example.com".to_string(),
            username: "alice".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn account_hash_ignores_password() {
        let a = account();
        let mut b = account();
        b.password = "other".to_string();
        assert_eq!(a.account_hash(), b.account_hash());
    }

    #[test]
    fn account_hash_changes_with_identity_fields() {
        let a = account();
        let mut b = account();
        b.username = "bob".to_string();
        assert_ne!(a.account_hash(), b.account_hash());

        let mut c = account();
        c.list_name = "work".to_string();
        assert_ne!(a.account_hash(), c.account_hash());
    }

    #[test]
    fn resume_eligibility_thresholds() {
        let duration = 120_000;
        assert!(!is_resume_eligible(5_000, duration));
        assert!(is_resume_eligible(40_000, duration));
        assert!(!is_resume_eligible(118_000, duration));
    }

    #[test]
    fn resume_zero_duration_is_never_eligible() {
        assert!(!is_resume_eligible(60_000, 0));
    }
}
