// SPDX-License-Identifier: MIT

use crate::client::CatalogFetch;
use crate::disk::DiskContentCache;
use crate::error::{CatalogError, CatalogResult};
use crate::lru::LruCache;
use crate::model::{
    AuthConfig, CategoryItem, ContentItem, ContentPage, ContentType, LibrarySyncProgress, Section,
    SectionSyncCheckpoint,
};
use crate::search::{MIN_LOCAL_QUERY_LEN, filter_index, normalize_query};
use crate::sync::{SyncControl, SyncSignal};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PAGE_CACHE_CAPACITY: usize = 200;
const THUMBNAIL_CACHE_CAPACITY: usize = 50;
const EPISODE_CACHE_CAPACITY: usize = 50;
const SEASON_COUNT_CACHE_CAPACITY: usize = 200;
const CATEGORY_CACHE_CAPACITY: usize = 100;

/// Sections indexed past this size stay disk-only; keeping them resident
/// would spike memory right when indexing completes.
const MEM_INDEX_MAX_ITEMS: usize = 50_000;

/// Page-scan budget when search degrades to filtering raw pages.
const MAX_SCAN_PAGES_SECTION: u32 = 6;
const MAX_SCAN_PAGES_ALL: u32 = 10;

/// Index build page sizes. Oversized requests that fail shrink to the
/// fallback and retry.
const INDEX_PAGE_SIZE_SERIES: u32 = 1000;
const INDEX_PAGE_SIZE_STREAMS: u32 = 800;
const INDEX_PAGE_SIZE_FALLBACK: u32 = 200;

pub type ProgressFn = Arc<dyn Fn(LibrarySyncProgress) + Send + Sync>;

/// How a section index build ended. Items counts what this run appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Completed { items: u64 },
    Paused { items: u64 },
    Cancelled { items: u64 },
}

type PageKey = (String, String, u32, u32);

struct MemoryCaches {
    pages: Mutex<LruCache<PageKey, ContentPage>>,
    categories: Mutex<LruCache<(String, ContentType), Vec<CategoryItem>>>,
    thumbnails: Mutex<LruCache<(String, ContentType, String), Option<String>>>,
    episodes: Mutex<LruCache<(String, String), Vec<ContentItem>>>,
    season_counts: Mutex<LruCache<(String, String), u32>>,
    indexes: Mutex<HashMap<(String, Section), Vec<ContentItem>>>,
}

impl MemoryCaches {
    fn new() -> Self {
        Self {
            pages: Mutex::new(LruCache::new(PAGE_CACHE_CAPACITY)),
            categories: Mutex::new(LruCache::new(CATEGORY_CACHE_CAPACITY)),
            thumbnails: Mutex::new(LruCache::new(THUMBNAIL_CACHE_CAPACITY)),
            episodes: Mutex::new(LruCache::new(EPISODE_CACHE_CAPACITY)),
            season_counts: Mutex::new(LruCache::new(SEASON_COUNT_CACHE_CAPACITY)),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    async fn clear(&self) {
        self.pages.lock().await.clear();
        self.categories.lock().await.clear();
        self.thumbnails.lock().await.clear();
        self.episodes.lock().await.clear();
        self.season_counts.lock().await.clear();
        self.indexes.lock().await.clear();
    }
}

/// Round-robin interleave across N lists: each non-exhausted list contributes
/// one item per round, in list order, until `max_items` or exhaustion. Keeps
/// the merged "All" view proportionally mixed instead of letting one section
/// dominate the front.
pub fn interleave_round_robin(lists: Vec<Vec<ContentItem>>, max_items: usize) -> Vec<ContentItem> {
    let mut iters: Vec<_> = lists.into_iter().map(|l| l.into_iter()).collect();
    let mut merged = Vec::with_capacity(max_items);
    loop {
        let mut produced = false;
        for iter in iters.iter_mut() {
            if merged.len() >= max_items {
                return merged;
            }
            if let Some(item) = iter.next() {
                merged.push(item);
                produced = true;
            }
        }
        if !produced {
            return merged;
        }
    }
}

/// Orchestrates the remote client, the disk cache and the in-memory LRU layer.
/// Owns all in-memory catalog state; collaborators only read the values it
/// returns.
pub struct CatalogRepository {
    fetcher: Arc<dyn CatalogFetch>,
    disk: Arc<DiskContentCache>,
    mem: MemoryCaches,
    /// Serializes fetches of the same uncached section so concurrent misses
    /// collapse into one upstream call.
    section_locks: HashMap<Section, Arc<Mutex<()>>>,
    /// Category lists are small and infrequent; one lock covers all types.
    category_lock: Mutex<()>,
}

impl CatalogRepository {
    pub fn new(fetcher: Arc<dyn CatalogFetch>, disk: Arc<DiskContentCache>) -> Self {
        let mut section_locks = HashMap::new();
        for section in Section::indexable() {
            section_locks.insert(section, Arc::new(Mutex::new(())));
        }
        Self {
            fetcher,
            disk,
            mem: MemoryCaches::new(),
            section_locks,
            category_lock: Mutex::new(()),
        }
    }

    fn section_lock(&self, section: Section) -> Arc<Mutex<()>> {
        self.section_locks
            .get(&section)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    fn page_key(account: &AuthConfig, logical: &str, page: u32, limit: u32) -> PageKey {
        (account.account_hash(), logical.to_string(), page, limit)
    }

    /// Serves one page of a section. `All` fans out to the three content
    /// sections and interleaves; concrete sections read through
    /// memory → disk → remote, writing back on a remote fetch. Empty remote
    /// pages are cached in neither tier so a transient upstream hiccup cannot
    /// poison later loads.
    pub async fn load_page(
        &self,
        section: Section,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        if section == Section::All {
            return self.load_merged_page(page, limit, account).await;
        }
        self.load_concrete_page(section, page, limit, account).await
    }

    async fn load_concrete_page(
        &self,
        section: Section,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        let Some(kind) = section.content_type() else {
            return Ok(ContentPage::empty());
        };
        let logical = format!("page_{}", section.as_str());
        self.load_page_keyed(section, kind, None, &logical, page, limit, account)
            .await
    }

    // Fans out to the concrete sections directly; routing back through
    // `load_page` would make the future type recursive.
    async fn load_merged_page(
        &self,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        let per_section = limit.div_ceil(3);
        let (live, movies, series) = tokio::join!(
            self.load_concrete_page(Section::Live, page, per_section, account),
            self.load_concrete_page(Section::Movies, page, per_section, account),
            self.load_concrete_page(Section::Series, page, per_section, account),
        );
        let live = live?;
        let movies = movies?;
        let series = series?;
        let end_reached = live.end_reached && movies.end_reached && series.end_reached;
        let items = interleave_round_robin(
            vec![live.items, movies.items, series.items],
            limit as usize,
        );
        Ok(ContentPage { items, end_reached })
    }

    #[allow(clippy::too_many_arguments)]
    async fn load_page_keyed(
        &self,
        section: Section,
        kind: ContentType,
        category_id: Option<&str>,
        logical: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        let key = Self::page_key(account, logical, page, limit);

        if let Some(cached) = self.mem.pages.lock().await.get(&key) {
            return Ok(cached.clone());
        }

        // Collapse concurrent misses for the same section, then re-check: the
        // winner of the race has usually populated the cache by the time the
        // lock is acquired.
        let lock = self.section_lock(section);
        let _guard = lock.lock().await;

        if let Some(cached) = self.mem.pages.lock().await.get(&key) {
            return Ok(cached.clone());
        }

        if let Some(cached) = self.disk.read_page(logical, page, limit, account).await {
            self.mem.pages.lock().await.put(key, cached.clone());
            return Ok(cached);
        }

        let fetched = self
            .fetcher
            .fetch_page(account, kind, category_id, page * limit, limit)
            .await?;
        if fetched.items.is_empty() {
            // Cached in neither tier: an empty answer may be a transient
            // upstream hiccup, so the next call must try again.
            debug!(section = section.as_str(), page, "empty page not cached");
            return Ok(fetched);
        }
        self.mem.pages.lock().await.put(key, fetched.clone());
        self.disk
            .write_page(logical, page, limit, account, &fetched)
            .await;
        Ok(fetched)
    }

    /// Search ordering: local index when one exists (near-instant, no
    /// upstream load), then the upstream search parameter, then a bounded
    /// client-side page scan.
    pub async fn search_page(
        &self,
        section: Section,
        query: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        let normalized = normalize_query(query);

        if normalized.len() >= MIN_LOCAL_QUERY_LEN {
            if let Some(result) = self
                .search_local_index(section, &normalized, page, limit, account)
                .await
            {
                return Ok(result);
            }
        }

        if let Some(kind) = section.content_type() {
            match self
                .fetcher
                .search(account, kind, &normalized, page * limit, limit)
                .await
            {
                Ok(result) if Self::upstream_search_trustworthy(&result, &normalized) => {
                    return Ok(result);
                }
                Ok(_) => {
                    debug!(section = section.as_str(), "upstream search unreliable, scanning pages");
                }
                Err(e) => {
                    debug!(section = section.as_str(), error = %e, "upstream search failed, scanning pages");
                }
            }
        }

        let max_scan = if section == Section::All {
            MAX_SCAN_PAGES_ALL
        } else {
            MAX_SCAN_PAGES_SECTION
        };
        self.search_filter_pages(section, &normalized, page, limit, account, max_scan)
            .await
    }

    /// A panel that ignores the `search` parameter returns its ordinary
    /// listing; a window containing non-matching titles gives that away.
    fn upstream_search_trustworthy(result: &ContentPage, query: &str) -> bool {
        if result.items.is_empty() {
            return false;
        }
        let needle = query.to_lowercase();
        result
            .items
            .iter()
            .all(|item| item.title.to_lowercase().contains(&needle))
    }

    async fn search_local_index(
        &self,
        section: Section,
        query: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> Option<ContentPage> {
        let sections: Vec<Section> = if section == Section::All {
            Section::indexable().to_vec()
        } else {
            vec![section]
        };

        let mut matched_lists: Vec<Vec<ContentItem>> = Vec::new();
        let mut any_index = false;
        for section in sections {
            if let Some(index) = self.local_index(section, account).await {
                any_index = true;
                matched_lists.push(
                    filter_index(&index, query)
                        .into_iter()
                        .cloned()
                        .collect(),
                );
            }
        }
        if !any_index {
            return None;
        }

        let matches = if matched_lists.len() > 1 {
            let total: usize = matched_lists.iter().map(|l| l.len()).sum();
            interleave_round_robin(matched_lists, total)
        } else {
            matched_lists.pop().unwrap_or_default()
        };

        Some(Self::window_slice(&matches, page, limit))
    }

    fn window_slice(items: &[ContentItem], page: u32, limit: u32) -> ContentPage {
        let start = (page as usize) * (limit as usize);
        let end = (start + limit as usize).min(items.len());
        let window = if start < items.len() {
            items[start..end].to_vec()
        } else {
            Vec::new()
        };
        ContentPage {
            items: window,
            end_reached: end >= items.len(),
        }
    }

    /// Fallback search: scan raw content pages collecting title matches until
    /// enough are found, the scan budget runs out, or true end-of-data.
    async fn search_filter_pages(
        &self,
        section: Section,
        query: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
        max_scan_pages: u32,
    ) -> CatalogResult<ContentPage> {
        let needle = query.to_lowercase();
        let needed = ((page + 1) * limit) as usize;
        let mut matches: Vec<ContentItem> = Vec::new();
        let mut upstream_ended = false;

        for scan_page in 0..max_scan_pages {
            let scanned = self.load_page(section, scan_page, limit, account).await?;
            matches.extend(
                scanned
                    .items
                    .into_iter()
                    .filter(|item| item.title.to_lowercase().contains(&needle)),
            );

            // No matches on the very first page and the caller asked for a
            // later page: later matches cannot exist before page 0's do.
            if scan_page == 0 && matches.is_empty() && page > 0 {
                return Ok(ContentPage::empty());
            }

            if scanned.end_reached {
                upstream_ended = true;
                break;
            }
            if matches.len() >= needed {
                break;
            }
        }

        let mut window = Self::window_slice(&matches, page, limit);
        if !upstream_ended {
            // The scan stopped at its budget; more matches may exist.
            window.end_reached = false;
        }
        Ok(window)
    }

    pub async fn load_category_page(
        &self,
        kind: ContentType,
        category_id: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        let logical = format!("category_{}_{}", kind.as_str(), category_id);
        self.load_page_keyed(
            kind.section(),
            kind,
            Some(category_id),
            &logical,
            page,
            limit,
            account,
        )
        .await
    }

    pub async fn search_category_page(
        &self,
        kind: ContentType,
        category_id: &str,
        query: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        let normalized = normalize_query(query);
        let needle = normalized.to_lowercase();
        let needed = ((page + 1) * limit) as usize;
        let mut matches: Vec<ContentItem> = Vec::new();
        let mut upstream_ended = false;

        for scan_page in 0..MAX_SCAN_PAGES_SECTION {
            let scanned = self
                .load_category_page(kind, category_id, scan_page, limit, account)
                .await?;
            matches.extend(
                scanned
                    .items
                    .into_iter()
                    .filter(|item| item.title.to_lowercase().contains(&needle)),
            );
            if scan_page == 0 && matches.is_empty() && page > 0 {
                return Ok(ContentPage::empty());
            }
            if scanned.end_reached {
                upstream_ended = true;
                break;
            }
            if matches.len() >= needed {
                break;
            }
        }

        let mut window = Self::window_slice(&matches, page, limit);
        if !upstream_ended {
            window.end_reached = false;
        }
        Ok(window)
    }

    /// Fetches and caches the whole episode list on first access (the
    /// upstream has no server-side episode paging), then serves from cache.
    pub async fn load_series_episodes(
        &self,
        series_id: &str,
        account: &AuthConfig,
    ) -> CatalogResult<Vec<ContentItem>> {
        let key = (account.account_hash(), series_id.to_string());
        if let Some(cached) = self.mem.episodes.lock().await.get(&key) {
            return Ok(cached.clone());
        }

        let detail = self.fetcher.fetch_series_detail(account, series_id).await?;
        self.mem
            .episodes
            .lock()
            .await
            .put(key.clone(), detail.episodes.clone());
        self.mem
            .season_counts
            .lock()
            .await
            .put(key, detail.season_count);
        Ok(detail.episodes)
    }

    /// Windowed slice over the cached full episode list.
    pub async fn load_series_episode_page(
        &self,
        series_id: &str,
        page: u32,
        limit: u32,
        account: &AuthConfig,
    ) -> CatalogResult<ContentPage> {
        let episodes = self.load_series_episodes(series_id, account).await?;
        Ok(Self::window_slice(&episodes, page, limit))
    }

    pub async fn load_series_season_count(
        &self,
        series_id: &str,
        account: &AuthConfig,
    ) -> CatalogResult<u32> {
        let key = (account.account_hash(), series_id.to_string());
        if let Some(count) = self.mem.season_counts.lock().await.get(&key) {
            return Ok(*count);
        }
        let detail = self.fetcher.fetch_series_detail(account, series_id).await?;
        self.mem
            .season_counts
            .lock()
            .await
            .put(key.clone(), detail.season_count);
        self.mem
            .episodes
            .lock()
            .await
            .put(key, detail.episodes.clone());
        Ok(detail.season_count)
    }

    pub async fn load_categories(
        &self,
        kind: ContentType,
        account: &AuthConfig,
        force_refresh: bool,
    ) -> CatalogResult<Vec<CategoryItem>> {
        let _guard = self.category_lock.lock().await;
        let key = (account.account_hash(), kind);

        if !force_refresh {
            if let Some(cached) = self.mem.categories.lock().await.get(&key) {
                return Ok(cached.clone());
            }
            if let Some(cached) = self.disk.read_categories(kind, account).await {
                self.mem.categories.lock().await.put(key, cached.clone());
                return Ok(cached);
            }
        }

        let categories = self.fetcher.fetch_categories(account, kind).await?;
        self.mem
            .categories
            .lock()
            .await
            .put(key, categories.clone());
        self.disk.write_categories(kind, account, &categories).await;
        Ok(categories)
    }

    /// Lazily derives a representative image for a category: page 0, limit 1,
    /// first item's image. One extra network call once, persistent thereafter.
    pub async fn category_thumbnail(
        &self,
        kind: ContentType,
        category_id: &str,
        account: &AuthConfig,
    ) -> CatalogResult<Option<String>> {
        let key = (account.account_hash(), kind, category_id.to_string());
        if let Some(cached) = self.mem.thumbnails.lock().await.get(&key) {
            return Ok(cached.clone());
        }
        if let Some(cached) = self.disk.read_thumbnail(kind, category_id, account).await {
            self.mem.thumbnails.lock().await.put(key, cached.clone());
            return Ok(cached);
        }

        let page = self
            .load_category_page(kind, category_id, 0, 1, account)
            .await?;
        let image = page.items.first().and_then(|item| item.image_url.clone());
        self.mem.thumbnails.lock().await.put(key, image.clone());
        self.disk
            .write_thumbnail(kind, category_id, account, &image)
            .await;
        Ok(image)
    }

    /// Returns the full-section index from memory or disk, if one was built.
    /// Oversized indexes stay disk-only.
    pub async fn local_index(
        &self,
        section: Section,
        account: &AuthConfig,
    ) -> Option<Vec<ContentItem>> {
        let key = (account.account_hash(), section);
        if let Some(index) = self.mem.indexes.lock().await.get(&key) {
            return Some(index.clone());
        }
        let index = self.disk.read_index(section, account).await?;
        if index.len() <= MEM_INDEX_MAX_ITEMS {
            self.mem.indexes.lock().await.insert(key, index.clone());
        }
        Some(index)
    }

    pub async fn is_section_indexed(&self, section: Section, account: &AuthConfig) -> bool {
        if let Some(checkpoint) = self.disk.read_checkpoint(section, account).await {
            return checkpoint.is_complete;
        }
        false
    }

    fn index_page_size(section: Section) -> u32 {
        match section {
            Section::Series => INDEX_PAGE_SIZE_SERIES,
            Section::Movies | Section::Live => INDEX_PAGE_SIZE_STREAMS,
            _ => INDEX_PAGE_SIZE_FALLBACK,
        }
    }

    /// Builds (or resumes) the full-section index used for local search.
    /// Bulk fetch-all first; page-by-page fallback with a shrinking page size
    /// when the large request fails. A checkpoint is persisted after every
    /// page so an interrupted build resumes instead of restarting.
    pub async fn build_section_index(
        &self,
        section: Section,
        account: &AuthConfig,
        force: bool,
        throttle: Duration,
        control: Option<&SyncControl>,
    ) -> CatalogResult<IndexOutcome> {
        let Some(kind) = section.content_type() else {
            return Ok(IndexOutcome::Completed { items: 0 });
        };

        if !force {
            if let Some(checkpoint) = self.disk.read_checkpoint(section, account).await {
                if checkpoint.is_complete {
                    debug!(section = section.as_str(), "index already complete");
                    return Ok(IndexOutcome::Completed {
                        items: checkpoint.items_indexed,
                    });
                }
            }
        }

        // Resume state: an interrupted paged build left a partial index.
        let (mut items, mut pages_synced) = if force {
            (Vec::new(), 0u32)
        } else {
            match (
                self.disk.read_index(section, account).await,
                self.disk.read_checkpoint(section, account).await,
            ) {
                (Some(existing), Some(checkpoint)) if !checkpoint.is_complete => {
                    debug!(
                        section = section.as_str(),
                        resumed_items = existing.len(),
                        "resuming index build from checkpoint"
                    );
                    (existing, checkpoint.last_page_synced + 1)
                }
                _ => (Vec::new(), 0),
            }
        };

        // Bulk path only makes sense for a fresh build.
        if items.is_empty() {
            match self.fetcher.fetch_all(account, kind).await {
                Ok(all) if !all.is_empty() => {
                    let count = all.len() as u64;
                    self.store_complete_index(section, account, all, count).await;
                    info!(section = section.as_str(), items = count, "bulk index build complete");
                    return Ok(IndexOutcome::Completed { items: count });
                }
                Ok(_) => {
                    debug!(section = section.as_str(), "bulk fetch empty, falling back to paging");
                }
                Err(e) => {
                    warn!(section = section.as_str(), error = %e, "bulk fetch failed, falling back to paging");
                }
            }
        }

        let mut page_size = Self::index_page_size(section);
        loop {
            if let Some(control) = control {
                match control.signal() {
                    SyncSignal::Continue => {}
                    SyncSignal::Pause => {
                        return Ok(IndexOutcome::Paused {
                            items: items.len() as u64,
                        });
                    }
                    SyncSignal::Cancel => {
                        return Ok(IndexOutcome::Cancelled {
                            items: items.len() as u64,
                        });
                    }
                }
            }

            let offset = items.len() as u32;
            let page = match self
                .fetcher
                .fetch_page(account, kind, None, offset, page_size)
                .await
            {
                Ok(page) => page,
                Err(e) if page_size > INDEX_PAGE_SIZE_FALLBACK => {
                    warn!(
                        section = section.as_str(),
                        page_size,
                        error = %e,
                        "index page fetch failed, shrinking page size"
                    );
                    page_size = INDEX_PAGE_SIZE_FALLBACK;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let end_reached = page.end_reached;
            items.extend(page.items);
            let checkpoint = SectionSyncCheckpoint {
                last_page_synced: pages_synced,
                items_indexed: items.len() as u64,
                is_complete: end_reached,
                timestamp: chrono::Utc::now(),
            };
            pages_synced += 1;

            if end_reached {
                let count = items.len() as u64;
                self.store_complete_index(section, account, items, count).await;
                info!(section = section.as_str(), items = count, "paged index build complete");
                return Ok(IndexOutcome::Completed { items: count });
            }

            self.disk
                .write_partial_index(section, account, &items, &checkpoint)
                .await;

            if !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
        }
    }

    /// Bounded index build for the fast-start phase: at most `max_pages`
    /// pages per section, persisted as a partial (or complete, when the
    /// catalog is small enough) index so search becomes usable immediately.
    /// A no-op when any index for the section already exists.
    pub async fn fast_index_section(
        &self,
        section: Section,
        account: &AuthConfig,
        max_pages: u32,
        page_size: u32,
    ) -> CatalogResult<u64> {
        let Some(kind) = section.content_type() else {
            return Ok(0);
        };
        if self.disk.has_index(section, account).await {
            return Ok(0);
        }

        let mut items: Vec<ContentItem> = Vec::new();
        let mut last_page = 0u32;
        let mut complete = false;
        for page in 0..max_pages {
            let fetched = self
                .fetcher
                .fetch_page(account, kind, None, page * page_size, page_size)
                .await?;
            let end_reached = fetched.end_reached;
            items.extend(fetched.items);
            last_page = page;
            if end_reached {
                complete = true;
                break;
            }
        }

        let count = items.len() as u64;
        if complete {
            self.store_complete_index(section, account, items, count).await;
        } else {
            let checkpoint = SectionSyncCheckpoint {
                last_page_synced: last_page,
                items_indexed: count,
                is_complete: false,
                timestamp: chrono::Utc::now(),
            };
            self.disk
                .write_partial_index(section, account, &items, &checkpoint)
                .await;
        }
        debug!(section = section.as_str(), items = count, complete, "fast index built");
        Ok(count)
    }

    async fn store_complete_index(
        &self,
        section: Section,
        account: &AuthConfig,
        items: Vec<ContentItem>,
        count: u64,
    ) {
        self.disk.write_index(section, account, &items).await;
        self.disk
            .write_checkpoint(
                section,
                account,
                &SectionSyncCheckpoint {
                    last_page_synced: 0,
                    items_indexed: count,
                    is_complete: true,
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;
        let key = (account.account_hash(), section);
        if items.len() <= MEM_INDEX_MAX_ITEMS {
            self.mem.indexes.lock().await.insert(key, items);
        } else {
            // Disk-only past the threshold; drop any stale resident copy.
            self.mem.indexes.lock().await.remove(&key);
        }
    }

    /// Builds the local search index for the requested sections, in parallel
    /// (one task per section). Sections already satisfied report immediately;
    /// failed sections are logged and reported through `on_progress`, never a
    /// crash. Returns the total number of items indexed.
    pub async fn sync_search_index(
        self: &Arc<Self>,
        account: &AuthConfig,
        force: bool,
        sections: Option<Vec<Section>>,
        on_progress: Option<ProgressFn>,
    ) -> CatalogResult<u64> {
        let sections = sections.unwrap_or_else(|| Section::indexable().to_vec());
        let total_sections = sections.len();
        let items_counter = Arc::new(AtomicU64::new(0));
        let sections_done = Arc::new(AtomicU64::new(0));

        let report = |done: usize, items: u64| {
            if let Some(on_progress) = &on_progress {
                on_progress(LibrarySyncProgress {
                    fraction: if total_sections == 0 {
                        1.0
                    } else {
                        done as f32 / total_sections as f32
                    },
                    sections_done: done,
                    sections_total: total_sections,
                    items_indexed: items,
                });
            }
        };

        let mut tasks = Vec::new();
        for section in sections {
            let needs_sync = force
                || !(self
                    .mem
                    .indexes
                    .lock()
                    .await
                    .contains_key(&(account.account_hash(), section))
                    || self.disk.has_index(section, account).await);

            if !needs_sync {
                let done = sections_done.fetch_add(1, Ordering::SeqCst) + 1;
                report(done as usize, items_counter.load(Ordering::SeqCst));
                continue;
            }

            let repo = Arc::clone(self);
            let account = account.clone();
            let counter = Arc::clone(&items_counter);
            tasks.push(tokio::spawn(async move {
                let outcome = repo
                    .build_section_index(section, &account, force, Duration::ZERO, None)
                    .await;
                match outcome {
                    Ok(IndexOutcome::Completed { items }) => {
                        counter.fetch_add(items, Ordering::SeqCst);
                        (section, true)
                    }
                    Ok(_) => (section, false),
                    Err(e) => {
                        warn!(section = section.as_str(), error = %e, "section index sync failed");
                        (section, false)
                    }
                }
            }));
        }

        for task in tasks {
            match task.await {
                Ok((_, _)) => {
                    let done = sections_done.fetch_add(1, Ordering::SeqCst) + 1;
                    report(done as usize, items_counter.load(Ordering::SeqCst));
                }
                Err(e) => {
                    warn!(error = %e, "index sync task panicked");
                    let done = sections_done.fetch_add(1, Ordering::SeqCst) + 1;
                    report(done as usize, items_counter.load(Ordering::SeqCst));
                }
            }
        }

        Ok(items_counter.load(Ordering::SeqCst))
    }

    /// Clears everything for this account, memory and disk, then writes the
    /// refresh marker so the UI can tell "refreshing" from "never synced".
    pub async fn refresh_content(&self, account: &AuthConfig) -> CatalogResult<()> {
        self.mem.clear().await;
        self.disk
            .clear_for(account)
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        self.disk.write_refresh_marker(account).await;
        info!(account = %account.account_hash(), "content refreshed");
        Ok(())
    }

    pub async fn has_pending_refresh(&self, account: &AuthConfig) -> bool {
        self.disk.has_refresh_marker(account).await
    }

    pub fn disk_cache(&self) -> &Arc<DiskContentCache> {
        &self.disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CatalogFetch, SeriesDetail};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Barrier;

    fn account() -> AuthConfig {
        AuthConfig {
            list_name: "home".to_string(),
            base_url: "http://example.com".to_string(),
            username: "alice".to_string(),
            password: "pw".to_string(),
        }
    }

    fn item(kind: ContentType, id: u32, title: &str) -> ContentItem {
        ContentItem {
            id: format!("{}{}", kind.id_prefix(), id),
            title: title.to_string(),
            subtitle: kind.kind_label().to_string(),
            image_url: Some(format!("http://img/{id}.jpg")),
            section: kind.section(),
            content_type: kind,
            stream_id: id.to_string(),
            container_extension: None,
        }
    }

    fn catalog(kind: ContentType, count: u32, title_prefix: &str) -> Vec<ContentItem> {
        (0..count)
            .map(|i| item(kind, i, &format!("{title_prefix} {i}")))
            .collect()
    }

    /// Scripted upstream: serves windows over fixed per-kind catalogs and
    /// counts calls.
    struct MockFetch {
        live: Vec<ContentItem>,
        movies: Vec<ContentItem>,
        series: Vec<ContentItem>,
        page_calls: AtomicU32,
        bulk_calls: AtomicU32,
        detail_calls: AtomicU32,
        /// Bulk fetch-all fails when set (forces the paged fallback).
        bulk_fails: bool,
        /// Page fetches above this limit fail (forces page-size shrink).
        max_page_limit: Option<u32>,
        /// Upstream ignores the search parameter (returns plain windows).
        search_ignores_query: bool,
        season_count: u32,
        episodes: Vec<ContentItem>,
        /// Items served when the request carries a category id.
        category_items: Vec<ContentItem>,
    }

    impl MockFetch {
        fn new(live: Vec<ContentItem>, movies: Vec<ContentItem>, series: Vec<ContentItem>) -> Self {
            Self {
                live,
                movies,
                series,
                page_calls: AtomicU32::new(0),
                bulk_calls: AtomicU32::new(0),
                detail_calls: AtomicU32::new(0),
                bulk_fails: false,
                max_page_limit: None,
                search_ignores_query: true,
                season_count: 0,
                episodes: Vec::new(),
                category_items: Vec::new(),
            }
        }

        fn of(&self, kind: ContentType) -> &Vec<ContentItem> {
            match kind {
                ContentType::Live => &self.live,
                ContentType::Movies => &self.movies,
                ContentType::Series => &self.series,
            }
        }

        fn window(&self, kind: ContentType, offset: u32, limit: u32) -> ContentPage {
            Self::window_of(self.of(kind), offset, limit)
        }

        fn window_of(all: &[ContentItem], offset: u32, limit: u32) -> ContentPage {
            let start = (offset as usize).min(all.len());
            let end = (start + limit as usize).min(all.len());
            let items = all[start..end].to_vec();
            // Mirror the client heuristic: a full window never reports end.
            let end_reached = items.len() < limit as usize;
            ContentPage { items, end_reached }
        }
    }

    #[async_trait]
    impl CatalogFetch for MockFetch {
        async fn fetch_page(
            &self,
            _account: &AuthConfig,
            kind: ContentType,
            category_id: Option<&str>,
            offset: u32,
            limit: u32,
        ) -> CatalogResult<ContentPage> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(max) = self.max_page_limit {
                if limit > max {
                    return Err(CatalogError::Http { status: 500 });
                }
            }
            if category_id.is_some() && !self.category_items.is_empty() {
                return Ok(Self::window_of(&self.category_items, offset, limit));
            }
            Ok(self.window(kind, offset, limit))
        }

        async fn fetch_all(
            &self,
            _account: &AuthConfig,
            kind: ContentType,
        ) -> CatalogResult<Vec<ContentItem>> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            if self.bulk_fails {
                return Err(CatalogError::Transport("bulk timeout".into()));
            }
            Ok(self.of(kind).clone())
        }

        async fn search(
            &self,
            _account: &AuthConfig,
            kind: ContentType,
            query: &str,
            offset: u32,
            limit: u32,
        ) -> CatalogResult<ContentPage> {
            if self.search_ignores_query {
                return Ok(self.window(kind, offset, limit));
            }
            let needle = query.to_lowercase();
            let matches: Vec<ContentItem> = self
                .of(kind)
                .iter()
                .filter(|i| i.title.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            let start = (offset as usize).min(matches.len());
            let end = (start + limit as usize).min(matches.len());
            let items = matches[start..end].to_vec();
            let end_reached = items.len() < limit as usize;
            Ok(ContentPage { items, end_reached })
        }

        async fn fetch_categories(
            &self,
            _account: &AuthConfig,
            kind: ContentType,
        ) -> CatalogResult<Vec<CategoryItem>> {
            Ok(vec![CategoryItem {
                id: "1".to_string(),
                name: "General".to_string(),
                kind,
            }])
        }

        async fn fetch_series_detail(
            &self,
            _account: &AuthConfig,
            _series_id: &str,
        ) -> CatalogResult<SeriesDetail> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SeriesDetail {
                season_count: self.season_count,
                episodes: self.episodes.clone(),
            })
        }
    }

    fn repo_with(fetch: MockFetch) -> (Arc<CatalogRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(Arc::new(fetch), disk));
        (repo, dir)
    }

    #[test]
    fn interleave_takes_one_per_round() {
        let a = catalog(ContentType::Live, 2, "L");
        let b = catalog(ContentType::Movies, 3, "M");
        let c = catalog(ContentType::Series, 1, "S");
        let merged = interleave_round_robin(vec![a, b, c], 6);
        let titles: Vec<&str> = merged.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["L 0", "M 0", "S 0", "L 1", "M 1", "M 2"]);
    }

    #[test]
    fn interleave_emits_every_item_exactly_once() {
        let a = catalog(ContentType::Live, 5, "L");
        let b = catalog(ContentType::Movies, 3, "M");
        let c = catalog(ContentType::Series, 7, "S");
        let merged = interleave_round_robin(vec![a, b, c], 15);
        assert_eq!(merged.len(), 15);
        let mut ids: Vec<&str> = merged.iter().map(|i| i.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 15);
    }

    #[test]
    fn interleave_respects_max_items() {
        let a = catalog(ContentType::Live, 10, "L");
        let b = catalog(ContentType::Movies, 10, "M");
        let merged = interleave_round_robin(vec![a, b], 5);
        assert_eq!(merged.len(), 5);
    }

    #[tokio::test]
    async fn pagination_covers_catalog_without_gaps_or_duplicates() {
        let (repo, _dir) = repo_with(MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 37, "Movie"),
            Vec::new(),
        ));
        let account = account();

        let first = repo.load_page(Section::Movies, 0, 24, &account).await.unwrap();
        assert_eq!(first.items.len(), 24);
        assert!(!first.end_reached);

        let second = repo.load_page(Section::Movies, 1, 24, &account).await.unwrap();
        assert_eq!(second.items.len(), 13);
        assert!(second.end_reached);

        let mut ids: Vec<String> = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|i| i.id.clone())
            .collect();
        assert_eq!(ids.len(), 37);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 37);
    }

    #[tokio::test]
    async fn second_load_hits_cache_with_zero_network() {
        let mock = Arc::new(MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 30, "Movie"),
            Vec::new(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let first = repo.load_page(Section::Movies, 0, 10, &account).await.unwrap();
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), 1);
        let second = repo.load_page(Section::Movies, 0, 10, &account).await.unwrap();
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_into_one_fetch() {
        let mock = MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 30, "Movie"),
            Vec::new(),
        );
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let mock = Arc::new(mock);
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let account = account.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                repo.load_page(Section::Movies, 0, 10, &account).await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        for window in results.windows(2) {
            assert_eq!(window[0], window[1]);
        }
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_page_is_not_written_to_disk() {
        let mock = Arc::new(MockFetch::new(Vec::new(), Vec::new(), Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk.clone()));
        let account = account();

        let page = repo.load_page(Section::Movies, 0, 10, &account).await.unwrap();
        assert!(page.items.is_empty());
        assert!(
            disk.read_page("page_movies", 0, 10, &account).await.is_none(),
            "empty page must not poison the disk cache"
        );

        // The empty result is kept in neither tier: a retry within the same
        // process goes back upstream.
        let calls_before = mock.page_calls.load(Ordering::SeqCst);
        let again = repo.load_page(Section::Movies, 0, 10, &account).await.unwrap();
        assert!(again.items.is_empty());
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), calls_before + 1);
    }

    #[tokio::test]
    async fn category_search_filters_within_the_category() {
        let mut mock = MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 30, "Movie"),
            Vec::new(),
        );
        mock.category_items = vec![
            item(ContentType::Movies, 200, "Alpha One"),
            item(ContentType::Movies, 201, "Beta"),
            item(ContentType::Movies, 202, "Alpha Two"),
        ];
        let (repo, _dir) = repo_with(mock);
        let account = account();

        let result = repo
            .search_category_page(ContentType::Movies, "7", "alpha", 0, 10, &account)
            .await
            .unwrap();
        let titles: Vec<&str> = result.items.iter().map(|i| i.title.as_str()).collect();
        // Only the category's items are scanned; the wider movie catalog
        // never leaks into the result.
        assert_eq!(titles, vec!["Alpha One", "Alpha Two"]);
        assert!(result.end_reached);
    }

    #[tokio::test]
    async fn merged_all_page_interleaves_sections() {
        let (repo, _dir) = repo_with(MockFetch::new(
            catalog(ContentType::Live, 4, "Live"),
            catalog(ContentType::Movies, 4, "Movie"),
            catalog(ContentType::Series, 4, "Show"),
        ));
        let account = account();

        let page = repo.load_page(Section::All, 0, 9, &account).await.unwrap();
        assert_eq!(page.items.len(), 9);
        let titles: Vec<&str> = page.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Live 0", "Movie 0", "Show 0", "Live 1", "Movie 1", "Show 1", "Live 2", "Movie 2",
                "Show 2"
            ]
        );
        assert!(!page.end_reached);
    }

    #[tokio::test]
    async fn merged_all_end_reached_requires_all_sections_ended() {
        let (repo, _dir) = repo_with(MockFetch::new(
            catalog(ContentType::Live, 1, "Live"),
            catalog(ContentType::Movies, 1, "Movie"),
            catalog(ContentType::Series, 1, "Show"),
        ));
        let account = account();
        let page = repo.load_page(Section::All, 0, 9, &account).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.end_reached);
    }

    #[tokio::test]
    async fn local_index_search_preferred_after_sync() {
        let mut movies = catalog(ContentType::Movies, 20, "Movie");
        movies.push(item(ContentType::Movies, 100, "Breaking Bad"));
        let mock = Arc::new(MockFetch::new(Vec::new(), movies, Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        repo.sync_search_index(&account, false, Some(vec![Section::Movies]), None)
            .await
            .unwrap();

        let calls_before = mock.page_calls.load(Ordering::SeqCst);
        let result = repo
            .search_page(Section::Movies, "EN - Breaking Bad", 0, 10, &account)
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].title, "Breaking Bad");
        assert!(result.end_reached);
        // Local index search issues no page fetches.
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn search_scan_early_exit_for_later_pages_without_page0_matches() {
        let mock = Arc::new(MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 60, "Movie"),
            Vec::new(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let result = repo
            .search_page(Section::Movies, "Nonexistent", 2, 10, &account)
            .await
            .unwrap();
        assert!(result.items.is_empty());
        assert!(result.end_reached);
        // Page 0 of the scan plus the untrusted upstream search probe.
        assert!(mock.page_calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn search_scan_finds_matches_across_pages() {
        // Matching titles land on every page of the scan.
        let movies: Vec<ContentItem> = (0..40)
            .map(|i| {
                let title = if i % 4 == 0 {
                    format!("Alpha {i}")
                } else {
                    format!("Other {i}")
                };
                item(ContentType::Movies, i, &title)
            })
            .collect();
        let (repo, _dir) = repo_with(MockFetch::new(Vec::new(), movies, Vec::new()));
        let account = account();

        let result = repo
            .search_page(Section::Movies, "Alpha", 0, 10, &account)
            .await
            .unwrap();
        assert_eq!(result.items.len(), 10);
        assert!(result.items.iter().all(|i| i.title.starts_with("Alpha")));
    }

    #[tokio::test]
    async fn trustworthy_upstream_search_is_used() {
        let mut movies = catalog(ContentType::Movies, 20, "Movie");
        movies.push(item(ContentType::Movies, 100, "Breaking Bad"));
        let mut mock = MockFetch::new(Vec::new(), movies, Vec::new());
        mock.search_ignores_query = false;
        let mock = Arc::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let result = repo
            .search_page(Section::Movies, "Breaking", 0, 10, &account)
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].title, "Breaking Bad");
        // No page scan needed.
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn series_episode_list_fetched_once_then_windowed() {
        let episodes: Vec<ContentItem> = (0..25)
            .map(|i| {
                let mut e = item(ContentType::Series, i, &format!("Episode {i}"));
                e.id = format!("ep-{i}");
                e
            })
            .collect();
        let mut mock = MockFetch::new(Vec::new(), Vec::new(), Vec::new());
        mock.season_count = 3;
        mock.episodes = episodes;
        let mock = Arc::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let page0 = repo
            .load_series_episode_page("42", 0, 10, &account)
            .await
            .unwrap();
        assert_eq!(page0.items.len(), 10);
        assert!(!page0.end_reached);

        let page2 = repo
            .load_series_episode_page("42", 2, 10, &account)
            .await
            .unwrap();
        assert_eq!(page2.items.len(), 5);
        assert!(page2.end_reached);

        let count = repo.load_series_season_count("42", &account).await.unwrap();
        assert_eq!(count, 3);

        // One detail fetch serves episodes and season count.
        assert_eq!(mock.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn categories_read_through_and_force_refresh() {
        let mock = Arc::new(MockFetch::new(Vec::new(), Vec::new(), Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk.clone()));
        let account = account();

        let cats = repo
            .load_categories(ContentType::Movies, &account, false)
            .await
            .unwrap();
        assert_eq!(cats.len(), 1);
        assert!(disk.read_categories(ContentType::Movies, &account).await.is_some());

        // Cached read, then a forced one.
        let again = repo
            .load_categories(ContentType::Movies, &account, false)
            .await
            .unwrap();
        assert_eq!(again, cats);
        let forced = repo
            .load_categories(ContentType::Movies, &account, true)
            .await
            .unwrap();
        assert_eq!(forced, cats);
    }

    #[tokio::test]
    async fn category_thumbnail_derived_from_first_item() {
        let (repo, _dir) = repo_with(MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 5, "Movie"),
            Vec::new(),
        ));
        let account = account();
        let thumb = repo
            .category_thumbnail(ContentType::Movies, "1", &account)
            .await
            .unwrap();
        assert_eq!(thumb.as_deref(), Some("http://img/0.jpg"));
    }

    #[tokio::test]
    async fn bulk_index_build_short_circuits_paging() {
        let mock = Arc::new(MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 50, "Movie"),
            Vec::new(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let outcome = repo
            .build_section_index(Section::Movies, &account, false, Duration::ZERO, None)
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Completed { items: 50 });
        assert_eq!(mock.bulk_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), 0);
        assert!(repo.is_section_indexed(Section::Movies, &account).await);
    }

    #[tokio::test]
    async fn paged_fallback_shrinks_page_size_on_failure() {
        let mut mock = MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 450, "Movie"),
            Vec::new(),
        );
        mock.bulk_fails = true;
        mock.max_page_limit = Some(200);
        let mock = Arc::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let outcome = repo
            .build_section_index(Section::Movies, &account, false, Duration::ZERO, None)
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Completed { items: 450 });
        let index = repo.local_index(Section::Movies, &account).await.unwrap();
        assert_eq!(index.len(), 450);
    }

    #[tokio::test]
    async fn sync_skips_sections_already_indexed() {
        let mock = Arc::new(MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 10, "Movie"),
            Vec::new(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        repo.sync_search_index(&account, false, Some(vec![Section::Movies]), None)
            .await
            .unwrap();
        let bulk_after_first = mock.bulk_calls.load(Ordering::SeqCst);

        let progress: Arc<std::sync::Mutex<Vec<LibrarySyncProgress>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = progress.clone();
        repo.sync_search_index(
            &account,
            false,
            Some(vec![Section::Movies]),
            Some(Arc::new(move |p| sink.lock().unwrap().push(p))),
        )
        .await
        .unwrap();

        assert_eq!(mock.bulk_calls.load(Ordering::SeqCst), bulk_after_first);
        let reports = progress.lock().unwrap();
        assert_eq!(reports.last().unwrap().fraction, 1.0);
    }

    #[tokio::test]
    async fn refresh_clears_caches_and_writes_marker() {
        let mock = Arc::new(MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 30, "Movie"),
            Vec::new(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk.clone()));
        let account = account();

        repo.load_page(Section::Movies, 0, 10, &account).await.unwrap();
        assert!(disk.read_page("page_movies", 0, 10, &account).await.is_some());

        repo.refresh_content(&account).await.unwrap();
        assert!(disk.read_page("page_movies", 0, 10, &account).await.is_none());
        assert!(repo.has_pending_refresh(&account).await);

        // The next load goes back upstream.
        let calls_before = mock.page_calls.load(Ordering::SeqCst);
        repo.load_page(Section::Movies, 0, 10, &account).await.unwrap();
        assert_eq!(mock.page_calls.load(Ordering::SeqCst), calls_before + 1);
    }

    #[tokio::test]
    async fn pause_request_pauses_build_and_resume_completes() {
        let mut mock = MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 500, "Movie"),
            Vec::new(),
        );
        mock.bulk_fails = true;
        mock.max_page_limit = Some(200);
        let mock = Arc::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk));
        let account = account();

        let control = SyncControl::new();
        control.request_pause();
        let outcome = repo
            .build_section_index(Section::Movies, &account, false, Duration::ZERO, Some(&control))
            .await
            .unwrap();
        assert!(matches!(outcome, IndexOutcome::Paused { .. }));

        control.resume();
        let outcome = repo
            .build_section_index(Section::Movies, &account, false, Duration::ZERO, Some(&control))
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Completed { items: 500 });
    }

    #[tokio::test]
    async fn interrupted_build_resumes_from_checkpoint_without_duplicates() {
        let mut mock = MockFetch::new(
            Vec::new(),
            catalog(ContentType::Movies, 500, "Movie"),
            Vec::new(),
        );
        mock.max_page_limit = Some(200);
        let mock = Arc::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskContentCache::new(dir.path().to_path_buf()).unwrap());
        let repo = Arc::new(CatalogRepository::new(mock.clone(), disk.clone()));
        let account = account();

        // Simulate a killed paged build: first 200 items plus a non-complete
        // checkpoint are already on disk.
        let partial: Vec<ContentItem> = catalog(ContentType::Movies, 200, "Movie");
        let checkpoint = SectionSyncCheckpoint {
            last_page_synced: 0,
            items_indexed: 200,
            is_complete: false,
            timestamp: chrono::Utc::now(),
        };
        disk.write_partial_index(Section::Movies, &account, &partial, &checkpoint)
            .await;

        let outcome = repo
            .build_section_index(Section::Movies, &account, false, Duration::ZERO, None)
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Completed { items: 500 });

        // Resume skipped the bulk path and continued at the item offset.
        assert_eq!(mock.bulk_calls.load(Ordering::SeqCst), 0);

        let index = disk.read_index(Section::Movies, &account).await.unwrap();
        assert_eq!(index.len(), 500);
        let mut ids: Vec<&str> = index.iter().map(|i| i.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 500);
    }
}
