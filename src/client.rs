// SPDX-License-Identifier: MIT

use crate::error::{CatalogError, CatalogResult};
use crate::model::{AuthConfig, CategoryItem, ContentItem, ContentPage, ContentType};
use crate::retry::{RetryPolicy, with_retries};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::de::{DeserializeOwned, DeserializeSeed, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Read timeout for ordinary listing calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Bulk fetch-all responses can run to hundreds of megabytes on large panels.
const BULK_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Pre-sizing estimate for very large libraries; trimmed after parse.
const BULK_CAPACITY_HINT: usize = 150_000;

/// Flattened series detail: a season count plus the full episode list in
/// `(season, episode, title)` order.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDetail {
    pub season_count: u32,
    pub episodes: Vec<ContentItem>,
}

/// Upstream fetch seam between the repository and the network client, so
/// tests can substitute a scripted upstream.
#[async_trait]
pub trait CatalogFetch: Send + Sync {
    async fn fetch_page(
        &self,
        account: &AuthConfig,
        kind: ContentType,
        category_id: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> CatalogResult<ContentPage>;

    async fn fetch_all(
        &self,
        account: &AuthConfig,
        kind: ContentType,
    ) -> CatalogResult<Vec<ContentItem>>;

    async fn search(
        &self,
        account: &AuthConfig,
        kind: ContentType,
        query: &str,
        offset: u32,
        limit: u32,
    ) -> CatalogResult<ContentPage>;

    async fn fetch_categories(
        &self,
        account: &AuthConfig,
        kind: ContentType,
    ) -> CatalogResult<Vec<CategoryItem>>;

    async fn fetch_series_detail(
        &self,
        account: &AuthConfig,
        series_id: &str,
    ) -> CatalogResult<SeriesDetail>;
}

fn deserialize_number_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(D::Error::custom("Expected string or number")),
    }
}

fn deserialize_optional_number_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(D::Error::custom("Expected string, number, or null")),
    }
}

fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    match value {
        Value::Array(arr) => {
            let strings: Vec<String> = arr
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect();
            if strings.is_empty() { Ok(None) } else { Ok(Some(strings)) }
        }
        Value::String(s) => {
            if s.is_empty() { Ok(None) } else { Ok(Some(vec![s])) }
        }
        _ => Ok(None),
    }
}

/// Raw live-stream entry as the panel reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveStreamEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub stream_icon: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VodStreamEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub stream_icon: Option<String>,
    #[serde(default)]
    pub movie_image: Option<String>,
    #[serde(default)]
    pub container_extension: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    pub series_id: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub stream_icon: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub backdrop_path: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    #[serde(deserialize_with = "deserialize_number_as_string")]
    pub category_id: String,
    pub category_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SeriesInfoResponse {
    #[serde(default)]
    seasons: Option<Vec<ApiSeason>>,
    #[serde(default)]
    episodes: Option<HashMap<String, Vec<ApiEpisode>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiSeason {
    #[serde(default)]
    #[allow(dead_code)]
    season_number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiEpisode {
    #[serde(deserialize_with = "deserialize_number_as_string")]
    id: String,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    episode_num: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    container_extension: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number_as_string")]
    season: Option<String>,
    #[serde(default)]
    info: Option<ApiEpisodeInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiEpisodeInfo {
    #[serde(default)]
    movie_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    user_info: Option<AuthUserInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthUserInfo {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn first_non_blank(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .find(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
}

/// Strips non-digit characters from a raw season/episode label. Unparsable
/// labels map to `u32::MAX` so malformed entries sort to the end of the list
/// rather than the front.
fn digits_or_max(label: &str) -> u32 {
    let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(u32::MAX)
}

impl LiveStreamEntry {
    fn into_item(self) -> Option<ContentItem> {
        let stream_id = self.stream_id?;
        let title = first_non_blank(&[&self.name, &self.title])?;
        Some(ContentItem {
            id: format!("{}{}", ContentType::Live.id_prefix(), stream_id),
            title,
            subtitle: ContentType::Live.kind_label().to_string(),
            image_url: first_non_blank(&[&self.stream_icon]),
            section: ContentType::Live.section(),
            content_type: ContentType::Live,
            stream_id,
            container_extension: None,
        })
    }
}

impl VodStreamEntry {
    fn into_item(self) -> Option<ContentItem> {
        let stream_id = self.stream_id?;
        let title = first_non_blank(&[&self.name, &self.title])?;
        Some(ContentItem {
            id: format!("{}{}", ContentType::Movies.id_prefix(), stream_id),
            title,
            subtitle: ContentType::Movies.kind_label().to_string(),
            // Image priority encodes real-world panel quirks; keep the order.
            image_url: first_non_blank(&[&self.cover, &self.stream_icon, &self.movie_image]),
            section: ContentType::Movies.section(),
            content_type: ContentType::Movies,
            stream_id,
            container_extension: self.container_extension,
        })
    }
}

impl SeriesEntry {
    fn into_item(self) -> Option<ContentItem> {
        let stream_id = self.series_id?;
        let title = first_non_blank(&[&self.name, &self.title])?;
        let backdrop = self
            .backdrop_path
            .as_ref()
            .and_then(|paths| paths.first().cloned());
        Some(ContentItem {
            id: format!("{}{}", ContentType::Series.id_prefix(), stream_id),
            title,
            subtitle: ContentType::Series.kind_label().to_string(),
            image_url: first_non_blank(&[&self.cover, &self.stream_icon, &backdrop]),
            section: ContentType::Series.section(),
            content_type: ContentType::Series,
            stream_id,
            container_extension: None,
        })
    }
}

/// Streamed window over one JSON array: skips `offset` elements, collects up
/// to `limit`, then drains whatever remains without materializing it. The
/// drain is part of the contract: the body must be consumed to completion so
/// the underlying connection stays reusable.
struct ArrayWindow<T> {
    offset: usize,
    limit: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<'de, T: Deserialize<'de>> DeserializeSeed<'de> for ArrayWindow<T> {
    type Value = (Vec<T>, bool);

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, T: Deserialize<'de>> Visitor<'de> for ArrayWindow<T> {
    type Value = (Vec<T>, bool);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON array of catalog entries")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut skipped = 0usize;
        while skipped < self.offset {
            if seq.next_element::<IgnoredAny>()?.is_none() {
                return Ok((Vec::new(), true));
            }
            skipped += 1;
        }

        let mut items = Vec::with_capacity(self.limit.min(4096));
        while items.len() < self.limit {
            match seq.next_element::<T>()? {
                Some(item) => items.push(item),
                None => return Ok((items, true)),
            }
        }

        // Window filled; drain the remainder without building values.
        while seq.next_element::<IgnoredAny>()?.is_some() {}

        // Exactly `limit` collected: assume more pages exist. The upstream
        // never reports totals, so an exact-multiple catalog costs one empty
        // trailing fetch; callers tolerate that.
        Ok((items, false))
    }
}

/// Parses one array window out of `bytes`. Returns the collected entries and
/// whether the array ended inside the window.
pub(crate) fn parse_array_window<T: DeserializeOwned>(
    bytes: &[u8],
    offset: usize,
    limit: usize,
) -> CatalogResult<(Vec<T>, bool)> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let seed = ArrayWindow {
        offset,
        limit,
        _marker: std::marker::PhantomData,
    };
    let window = seed.deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(window)
}

/// Parses the entire array, pre-sized for very large libraries and trimmed to
/// actual size afterwards.
fn parse_full_array<T: DeserializeOwned>(bytes: &[u8]) -> CatalogResult<Vec<T>> {
    struct FullArray<T>(std::marker::PhantomData<T>);

    impl<'de, T: Deserialize<'de>> DeserializeSeed<'de> for FullArray<T> {
        type Value = Vec<T>;

        fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_seq(self)
        }
    }

    impl<'de, T: Deserialize<'de>> Visitor<'de> for FullArray<T> {
        type Value = Vec<T>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a JSON array of catalog entries")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut items = Vec::with_capacity(BULK_CAPACITY_HINT);
            while let Some(item) = seq.next_element::<T>()? {
                items.push(item);
            }
            items.shrink_to_fit();
            Ok(items)
        }
    }

    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let items = FullArray(std::marker::PhantomData).deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(items)
}

/// Prefixes a scheme when missing and strips the trailing slash. Fails before
/// any network traffic when the result still is not a valid URL.
pub fn normalize_base_url(raw: &str) -> CatalogResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::InvalidBaseUrl("empty base URL".to_string()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| CatalogError::InvalidBaseUrl(format!("{with_scheme}: {e}")))?;
    if parsed.host_str().is_none() {
        return Err(CatalogError::InvalidBaseUrl(format!("{with_scheme}: no host")));
    }
    Ok(with_scheme.trim_end_matches('/').to_string())
}

/// HTTP client for the panel API. Stateless with respect to accounts: every
/// call takes the `AuthConfig` it should act for.
#[derive(Debug)]
pub struct RemoteCatalogClient {
    client: Client,
    bulk_client: Client,
    retry: RetryPolicy,
}

impl RemoteCatalogClient {
    pub fn new() -> CatalogResult<Self> {
        Self::with_retry_policy(RetryPolicy::default())
    }

    pub fn with_retry_policy(retry: RetryPolicy) -> CatalogResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Mozilla/5.0")
            .build()
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        let bulk_client = Client::builder()
            .timeout(BULK_REQUEST_TIMEOUT)
            .user_agent("Mozilla/5.0")
            .build()
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            bulk_client,
            retry,
        })
    }

    fn api_url(
        account: &AuthConfig,
        action: Option<&str>,
        extras: &[(&str, &str)],
    ) -> CatalogResult<String> {
        let base = normalize_base_url(&account.base_url)?;
        let mut url = format!(
            "{}/player_api.php?username={}&password={}",
            base,
            urlencoding::encode(&account.username),
            urlencoding::encode(&account.password),
        );
        if let Some(action) = action {
            url.push_str(&format!("&action={action}"));
        }
        for (key, value) in extras {
            url.push_str(&format!("&{key}={}", urlencoding::encode(value)));
        }
        Ok(url)
    }

    fn list_action(kind: ContentType) -> &'static str {
        match kind {
            ContentType::Live => "get_live_streams",
            ContentType::Movies => "get_vod_streams",
            ContentType::Series => "get_series",
        }
    }

    fn category_action(kind: ContentType) -> &'static str {
        match kind {
            ContentType::Live => "get_live_categories",
            ContentType::Movies => "get_vod_categories",
            ContentType::Series => "get_series_categories",
        }
    }

    /// Streams the body chunk-by-chunk into a byte buffer. GETs are idempotent
    /// so the retry wrapper applies.
    async fn get_bytes(&self, url: &str, bulk: bool) -> CatalogResult<Vec<u8>> {
        let client = if bulk { &self.bulk_client } else { &self.client };
        with_retries(self.retry, || {
            // reqwest::Client clones share the connection pool.
            let client = client.clone();
            let url = url.to_string();
            async move {
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| CatalogError::from_transport(&e))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(CatalogError::Http {
                        status: status.as_u16(),
                    });
                }

                let mut bytes = Vec::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| CatalogError::from_transport(&e))?;
                    bytes.extend_from_slice(&chunk);
                }
                debug!(bytes = bytes.len(), "response received");
                Ok(bytes)
            }
        })
        .await
    }

    async fn fetch_windowed(
        &self,
        account: &AuthConfig,
        kind: ContentType,
        extras: &[(&str, &str)],
        offset: u32,
        limit: u32,
    ) -> CatalogResult<ContentPage> {
        let url = Self::api_url(account, Some(Self::list_action(kind)), extras)?;
        let bytes = self.get_bytes(&url, false).await?;
        let (items, end_reached) = match kind {
            ContentType::Live => {
                let (raw, end) =
                    parse_array_window::<LiveStreamEntry>(&bytes, offset as usize, limit as usize)?;
                (raw.into_iter().filter_map(LiveStreamEntry::into_item).collect(), end)
            }
            ContentType::Movies => {
                let (raw, end) =
                    parse_array_window::<VodStreamEntry>(&bytes, offset as usize, limit as usize)?;
                (raw.into_iter().filter_map(VodStreamEntry::into_item).collect(), end)
            }
            ContentType::Series => {
                let (raw, end) =
                    parse_array_window::<SeriesEntry>(&bytes, offset as usize, limit as usize)?;
                (raw.into_iter().filter_map(SeriesEntry::into_item).collect(), end)
            }
        };
        Ok(ContentPage { items, end_reached })
    }

    /// Validates credentials: the panel must answer with an active account.
    pub async fn authenticate(&self, account: &AuthConfig) -> CatalogResult<()> {
        let url = Self::api_url(account, None, &[])?;
        let bytes = self.get_bytes(&url, false).await?;
        Self::check_auth_response(&bytes)
    }

    fn check_auth_response(bytes: &[u8]) -> CatalogResult<()> {
        let response: AuthResponse = serde_json::from_slice(bytes)?;
        match response.user_info {
            Some(info) if info.status.as_deref() == Some("active") => Ok(()),
            Some(info) => Err(CatalogError::Auth(
                info.message
                    .or(info.status)
                    .unwrap_or_else(|| "account not active".to_string()),
            )),
            None => Err(CatalogError::Auth("no user_info in response".to_string())),
        }
    }
}

#[async_trait]
impl CatalogFetch for RemoteCatalogClient {
    async fn fetch_page(
        &self,
        account: &AuthConfig,
        kind: ContentType,
        category_id: Option<&str>,
        offset: u32,
        limit: u32,
    ) -> CatalogResult<ContentPage> {
        let extras: Vec<(&str, &str)> = match category_id {
            Some(id) => vec![("category_id", id)],
            None => Vec::new(),
        };
        self.fetch_windowed(account, kind, &extras, offset, limit).await
    }

    async fn fetch_all(
        &self,
        account: &AuthConfig,
        kind: ContentType,
    ) -> CatalogResult<Vec<ContentItem>> {
        let url = Self::api_url(account, Some(Self::list_action(kind)), &[])?;
        let bytes = self.get_bytes(&url, true).await?;
        let items = match kind {
            ContentType::Live => parse_full_array::<LiveStreamEntry>(&bytes)?
                .into_iter()
                .filter_map(LiveStreamEntry::into_item)
                .collect(),
            ContentType::Movies => parse_full_array::<VodStreamEntry>(&bytes)?
                .into_iter()
                .filter_map(VodStreamEntry::into_item)
                .collect(),
            ContentType::Series => parse_full_array::<SeriesEntry>(&bytes)?
                .into_iter()
                .filter_map(SeriesEntry::into_item)
                .collect(),
        };
        Ok(items)
    }

    async fn search(
        &self,
        account: &AuthConfig,
        kind: ContentType,
        query: &str,
        offset: u32,
        limit: u32,
    ) -> CatalogResult<ContentPage> {
        // Many panels honor a `search` parameter on the listing actions; the
        // repository degrades to page scanning when this comes back useless.
        self.fetch_windowed(account, kind, &[("search", query)], offset, limit)
            .await
    }

    async fn fetch_categories(
        &self,
        account: &AuthConfig,
        kind: ContentType,
    ) -> CatalogResult<Vec<CategoryItem>> {
        let url = Self::api_url(account, Some(Self::category_action(kind)), &[])?;
        let bytes = self.get_bytes(&url, false).await?;
        let entries: Vec<CategoryEntry> = serde_json::from_slice(&bytes)?;
        Ok(entries
            .into_iter()
            .map(|entry| CategoryItem {
                id: entry.category_id,
                name: entry.category_name,
                kind,
            })
            .collect())
    }

    async fn fetch_series_detail(
        &self,
        account: &AuthConfig,
        series_id: &str,
    ) -> CatalogResult<SeriesDetail> {
        let url = Self::api_url(
            account,
            Some("get_series_info"),
            &[("series_id", series_id)],
        )?;
        let bytes = self.get_bytes(&url, false).await?;
        let response: SeriesInfoResponse = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(series_id, error = %e, "failed to parse series info");
            CatalogError::Parse(e.to_string())
        })?;
        Ok(flatten_series_detail(response))
    }
}

fn flatten_series_detail(response: SeriesInfoResponse) -> SeriesDetail {
    // Two upstream shapes: an explicit seasons array, or only the episode
    // groups. Group count is the fallback season count.
    let season_count = match &response.seasons {
        Some(seasons) if !seasons.is_empty() => seasons.len() as u32,
        _ => response.episodes.as_ref().map(|e| e.len()).unwrap_or(0) as u32,
    };

    let mut episodes: Vec<(u32, u32, ContentItem)> = Vec::new();
    if let Some(groups) = response.episodes {
        for (season_label, group) in groups {
            let season = digits_or_max(&season_label);
            for episode in group {
                let episode_label = episode.episode_num.clone().unwrap_or_default();
                let episode_num = digits_or_max(&episode_label);
                let season_num = episode
                    .season
                    .as_deref()
                    .map(digits_or_max)
                    .filter(|&s| s != u32::MAX)
                    .unwrap_or(season);
                let title = episode
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| format!("Episode {episode_label}"));
                let subtitle = if season_num == u32::MAX || episode_num == u32::MAX {
                    ContentType::Series.kind_label().to_string()
                } else {
                    format!("S{season_num} · E{episode_num}")
                };
                let item = ContentItem {
                    id: format!("ep-{}", episode.id),
                    title,
                    subtitle,
                    image_url: episode.info.as_ref().and_then(|i| i.movie_image.clone()),
                    section: ContentType::Series.section(),
                    content_type: ContentType::Series,
                    stream_id: episode.id,
                    container_extension: episode.container_extension,
                };
                episodes.push((season_num, episode_num, item));
            }
        }
    }

    episodes.sort_by(|a, b| {
        (a.0, a.1, &a.2.title).cmp(&(b.0, b.1, &b.2.title))
    });

    SeriesDetail {
        season_count,
        episodes: episodes.into_iter().map(|(_, _, item)| item).collect(),
    }
}
