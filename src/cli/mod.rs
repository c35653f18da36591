use anyhow::{Context, Result};
use std::sync::Arc;

use xtv::client::RemoteCatalogClient;
use xtv::config::Config;
use xtv::disk::DiskContentCache;
use xtv::model::{AuthConfig, ContentItem, ContentType, Section};
use xtv::repository::CatalogRepository;

pub mod cache;
pub mod list;
pub mod search;
pub mod sync;

pub use cache::CacheCommand;
pub use list::ListCommand;
pub use search::SearchCommand;
pub use sync::SyncCommand;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
    M3u,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "m3u" => Ok(Self::M3u),
            _ => anyhow::bail!("Invalid format: {}. Use 'text', 'json', or 'm3u'", s),
        }
    }
}

pub fn parse_section(s: &str) -> Result<Section> {
    match s.to_lowercase().as_str() {
        "all" => Ok(Section::All),
        "live" => Ok(Section::Live),
        "movie" | "movies" | "vod" => Ok(Section::Movies),
        "series" | "tv" => Ok(Section::Series),
        _ => anyhow::bail!(
            "Invalid section: {}. Use 'all', 'live', 'movies', or 'series'",
            s
        ),
    }
}

pub fn parse_content_type(s: &str) -> Result<ContentType> {
    match s.to_lowercase().as_str() {
        "live" => Ok(ContentType::Live),
        "movie" | "movies" | "vod" => Ok(ContentType::Movies),
        "series" | "tv" => Ok(ContentType::Series),
        _ => anyhow::bail!("Invalid type: {}. Use 'live', 'movie', or 'series'", s),
    }
}

/// Shared state for command execution: the resolved account and a repository
/// wired to the live upstream client.
pub struct CommandContext {
    pub repo: Arc<CatalogRepository>,
    pub account: AuthConfig,
}

impl CommandContext {
    pub fn new(config: &Config, account_name: Option<&str>) -> Result<Self> {
        let account = config.account(account_name)?;
        let disk = match &config.cache.directory {
            Some(dir) => DiskContentCache::new(dir.clone())?,
            None => DiskContentCache::at_default_location()?,
        };
        let client = RemoteCatalogClient::new().context("Failed to build upstream client")?;
        let disk = Arc::new(disk);
        let repo = Arc::new(CatalogRepository::new(Arc::new(client), disk));
        Ok(Self { repo, account })
    }
}

/// Direct playback URL for an item, Xtream path layout.
pub fn stream_url(account: &AuthConfig, item: &ContentItem) -> String {
    let base = account.base_url.trim_end_matches('/');
    let ext = item.container_extension.as_deref().unwrap_or("ts");
    match item.content_type {
        ContentType::Live => format!(
            "{}/live/{}/{}/{}.ts",
            base, account.username, account.password, item.stream_id
        ),
        ContentType::Movies => format!(
            "{}/movie/{}/{}/{}.{}",
            base, account.username, account.password, item.stream_id, ext
        ),
        ContentType::Series => format!(
            "{}/series/{}/{}/{}.{}",
            base, account.username, account.password, item.stream_id, ext
        ),
    }
}

pub fn print_items(items: &[ContentItem], format: OutputFormat, account: &AuthConfig) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for item in items {
                println!(
                    "[{}] {} ({})",
                    item.content_type.as_str(),
                    item.title,
                    item.id
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items)?);
        }
        OutputFormat::M3u => {
            println!("#EXTM3U");
            for item in items {
                println!("#EXTINF:-1,{}", item.title);
                println!("{}", stream_url(account, item));
            }
        }
    }
    Ok(())
}
