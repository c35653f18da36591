// SPDX-License-Identifier: MIT

use crate::model::{AuthConfig, CategoryItem, ContentItem, ContentPage, ContentType, Section, SectionSyncCheckpoint};
use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tokio::fs as async_fs;
use tracing::{debug, warn};

/// Durable, account-partitioned JSON storage. Every file name ends with the
/// owning account's hash so `clear_for` can sweep one account without touching
/// the others. Reads are best-effort: a missing or corrupt file is a cache
/// miss, never an error; staleness decisions belong to the repository.
#[derive(Debug)]
pub struct DiskContentCache {
    root: PathBuf,
}

/// Distinguishes "deliberately cleared, awaiting re-sync" from "never synced".
/// An empty cache with a marker shows a refreshing state; without one it shows
/// the first-run sync flow.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct RefreshMarker {
    cleared_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct PartialIndex {
    items: Vec<ContentItem>,
    checkpoint: SectionSyncCheckpoint,
}

impl DiskContentCache {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.exists() {
            fs::create_dir_all(&root)
                .with_context(|| format!("Failed to create cache directory: {}", root.display()))?;
        }
        Ok(Self { root })
    }

    /// Default location under the platform cache directory.
    pub fn at_default_location() -> Result<Self> {
        let root = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?
            .join("xtv");
        Self::new(root)
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Short SHA-256 hash keeping arbitrary logical keys filesystem-safe.
    fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    fn page_path(&self, key: &str, page: u32, limit: u32, account: &AuthConfig) -> PathBuf {
        self.root.join(format!(
            "{}_{}_{}_{}.json",
            Self::hash_key(key),
            page,
            limit,
            account.account_hash()
        ))
    }

    fn categories_path(&self, kind: ContentType, account: &AuthConfig) -> PathBuf {
        self.root.join(format!(
            "categories_{}_{}.json",
            kind.as_str(),
            account.account_hash()
        ))
    }

    fn index_path(&self, section: Section, account: &AuthConfig) -> PathBuf {
        self.root.join(format!(
            "index_{}_{}.json",
            section.as_str(),
            account.account_hash()
        ))
    }

    fn checkpoint_path(&self, section: Section, account: &AuthConfig) -> PathBuf {
        self.root.join(format!(
            "checkpoint_{}_{}.json",
            section.as_str(),
            account.account_hash()
        ))
    }

    fn thumbnail_path(&self, kind: ContentType, category_id: &str, account: &AuthConfig) -> PathBuf {
        self.root.join(format!(
            "category_thumb_{}_{}_{}.json",
            kind.as_str(),
            Self::hash_key(category_id),
            account.account_hash()
        ))
    }

    fn marker_path(&self, account: &AuthConfig) -> PathBuf {
        self.root
            .join(format!("refresh_marker_{}.json", account.account_hash()))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &PathBuf) -> Option<T> {
        let content = match async_fs::read_to_string(path).await {
            Ok(content) => content,
            Err(_) => return None,
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "unreadable cache file treated as miss");
                None
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &PathBuf, value: &T) {
        let content = match serde_json::to_string(value) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to serialize cache value");
                return;
            }
        };
        if let Err(e) = async_fs::write(path, content).await {
            warn!(path = %path.display(), error = %e, "failed to write cache file");
        }
    }

    pub async fn read_page(
        &self,
        key: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> Option<ContentPage> {
        self.read_json(&self.page_path(key, page, limit, account)).await
    }

    pub async fn write_page(
        &self,
        key: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
        content: &ContentPage,
    ) {
        self.write_json(&self.page_path(key, page, limit, account), content)
            .await;
    }

    pub async fn read_categories(
        &self,
        kind: ContentType,
        account: &AuthConfig,
    ) -> Option<Vec<CategoryItem>> {
        self.read_json(&self.categories_path(kind, account)).await
    }

    pub async fn write_categories(
        &self,
        kind: ContentType,
        account: &AuthConfig,
        categories: &[CategoryItem],
    ) {
        self.write_json(&self.categories_path(kind, account), categories)
            .await;
    }

    pub async fn read_index(
        &self,
        section: Section,
        account: &AuthConfig,
    ) -> Option<Vec<ContentItem>> {
        // Accept both the complete form (bare item array) and the partial
        // checkpointed form written by an interrupted sync.
        let path = self.index_path(section, account);
        if let Some(items) = self.read_json::<Vec<ContentItem>>(&path).await {
            return Some(items);
        }
        self.read_json::<PartialIndex>(&path)
            .await
            .map(|partial| partial.items)
    }

    pub async fn write_index(
        &self,
        section: Section,
        account: &AuthConfig,
        items: &[ContentItem],
    ) {
        self.write_json(&self.index_path(section, account), items)
            .await;
    }

    /// Persists an in-progress index together with its resume checkpoint so a
    /// restarted sync continues from `last_page_synced + 1` instead of page 0.
    pub async fn write_partial_index(
        &self,
        section: Section,
        account: &AuthConfig,
        items: &[ContentItem],
        checkpoint: &SectionSyncCheckpoint,
    ) {
        let partial = PartialIndex {
            items: items.to_vec(),
            checkpoint: checkpoint.clone(),
        };
        self.write_json(&self.index_path(section, account), &partial).await;
        self.write_checkpoint(section, account, checkpoint).await;
    }

    pub async fn has_index(&self, section: Section, account: &AuthConfig) -> bool {
        self.index_path(section, account).exists()
    }

    pub async fn read_checkpoint(
        &self,
        section: Section,
        account: &AuthConfig,
    ) -> Option<SectionSyncCheckpoint> {
        self.read_json(&self.checkpoint_path(section, account)).await
    }

    pub async fn write_checkpoint(
        &self,
        section: Section,
        account: &AuthConfig,
        checkpoint: &SectionSyncCheckpoint,
    ) {
        self.write_json(&self.checkpoint_path(section, account), checkpoint)
            .await;
    }

    /// `Some(None)` is a cached "this category has no image"; `None` is a miss.
    pub async fn read_thumbnail(
        &self,
        kind: ContentType,
        category_id: &str,
        account: &AuthConfig,
    ) -> Option<Option<String>> {
        self.read_json(&self.thumbnail_path(kind, category_id, account))
            .await
    }

    pub async fn write_thumbnail(
        &self,
        kind: ContentType,
        category_id: &str,
        account: &AuthConfig,
        image_url: &Option<String>,
    ) {
        self.write_json(&self.thumbnail_path(kind, category_id, account), image_url)
            .await;
    }

    pub async fn write_refresh_marker(&self, account: &AuthConfig) {
        let marker = RefreshMarker {
            cleared_at: chrono::Utc::now(),
        };
        self.write_json(&self.marker_path(account), &marker).await;
    }

    pub async fn has_refresh_marker(&self, account: &AuthConfig) -> bool {
        self.marker_path(account).exists()
    }

    pub async fn clear_refresh_marker(&self, account: &AuthConfig) {
        let _ = async_fs::remove_file(self.marker_path(account)).await;
    }

    /// Deletes every cache file belonging to this account. The refresh marker
    /// is written separately by the caller after the sweep.
    pub async fn clear_for(&self, account: &AuthConfig) -> Result<usize> {
        let suffix = format!("_{}.json", account.account_hash());
        let mut removed = 0usize;
        let mut entries = async_fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list cache directory: {}", self.root.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(&suffix) {
                if let Err(e) = async_fs::remove_file(entry.path()).await {
                    warn!(file = name, error = %e, "failed to remove cache file");
                } else {
                    removed += 1;
                }
            }
        }
        debug!(removed, account = %account.account_hash(), "cleared account cache");
        Ok(removed)
    }

    /// Number of files currently held for the account, refresh marker included.
    pub async fn file_count_for(&self, account: &AuthConfig) -> Result<usize> {
        let suffix = format!("_{}.json", account.account_hash());
        let mut count = 0usize;
        let mut entries = async_fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Section;
    use chrono::Utc;

    fn account(name: &str) -> AuthConfig {
        AuthConfig {
            list_name: name.to_string(),
            base_url: "http://example.com".to_string(),
            username: "alice".to_string(),
            password: "pw".to_string(),
        }
    }

    fn item(id: &str) -> ContentItem {
        ContentItem {
            id: format!("vod-{id}"),
            title: format!("Movie {id}"),
            subtitle: "Movie".to_string(),
            image_url: None,
            section: Section::Movies,
            content_type: ContentType::Movies,
            stream_id: id.to_string(),
            container_extension: Some("mkv".to_string()),
        }
    }

    #[tokio::test]
    async fn page_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).unwrap();
        let account = account("home");
        let page = ContentPage {
            items: vec![item("1"), item("2")],
            end_reached: false,
        };

        assert!(cache.read_page("page_movies", 0, 24, &account).await.is_none());
        cache.write_page("page_movies", 0, 24, &account, &page).await;
        let read = cache.read_page("page_movies", 0, 24, &account).await.unwrap();
        assert_eq!(read, page);
        // Different page/limit keys do not alias.
        assert!(cache.read_page("page_movies", 1, 24, &account).await.is_none());
        assert!(cache.read_page("page_movies", 0, 12, &account).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).unwrap();
        let account = account("home");
        let page = ContentPage {
            items: vec![item("1")],
            end_reached: true,
        };
        cache.write_page("page_movies", 0, 24, &account, &page).await;
        let path = cache.page_path("page_movies", 0, 24, &account);
        std::fs::write(&path, "{not json").unwrap();
        assert!(cache.read_page("page_movies", 0, 24, &account).await.is_none());
    }

    #[tokio::test]
    async fn clear_for_only_touches_one_account() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).unwrap();
        let home = account("home");
        let work = account("work");
        let page = ContentPage {
            items: vec![item("1")],
            end_reached: true,
        };
        cache.write_page("page_movies", 0, 24, &home, &page).await;
        cache.write_page("page_movies", 0, 24, &work, &page).await;

        let removed = cache.clear_for(&home).await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.read_page("page_movies", 0, 24, &home).await.is_none());
        assert!(cache.read_page("page_movies", 0, 24, &work).await.is_some());
    }

    #[tokio::test]
    async fn refresh_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).unwrap();
        let account = account("home");
        assert!(!cache.has_refresh_marker(&account).await);
        cache.write_refresh_marker(&account).await;
        assert!(cache.has_refresh_marker(&account).await);
        cache.clear_refresh_marker(&account).await;
        assert!(!cache.has_refresh_marker(&account).await);
    }

    #[tokio::test]
    async fn partial_index_resumes_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).unwrap();
        let account = account("home");
        let items = vec![item("1"), item("2"), item("3")];
        let checkpoint = SectionSyncCheckpoint {
            last_page_synced: 2,
            items_indexed: 3,
            is_complete: false,
            timestamp: Utc::now(),
        };

        cache
            .write_partial_index(Section::Movies, &account, &items, &checkpoint)
            .await;

        let read_items = cache.read_index(Section::Movies, &account).await.unwrap();
        assert_eq!(read_items, items);
        let read_checkpoint = cache.read_checkpoint(Section::Movies, &account).await.unwrap();
        assert_eq!(read_checkpoint.last_page_synced, 2);
        assert!(!read_checkpoint.is_complete);
    }

    #[tokio::test]
    async fn complete_index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).unwrap();
        let account = account("home");
        let items = vec![item("1"), item("2")];
        cache.write_index(Section::Movies, &account, &items).await;
        assert!(cache.has_index(Section::Movies, &account).await);
        assert_eq!(cache.read_index(Section::Movies, &account).await.unwrap(), items);
    }

    #[tokio::test]
    async fn thumbnail_caches_absent_image() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).unwrap();
        let account = account("home");
        assert!(cache.read_thumbnail(ContentType::Movies, "7", &account).await.is_none());
        cache
            .write_thumbnail(ContentType::Movies, "7", &account, &None)
            .await;
        assert_eq!(
            cache.read_thumbnail(ContentType::Movies, "7", &account).await,
            Some(None)
        );
    }
}
