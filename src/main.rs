// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use xtv::Config;
use xtv::config::default_config_path;

mod cli;
use cli::{
    CacheCommand, CommandContext, ListCommand, OutputFormat, SearchCommand, SyncCommand,
    list::CategoriesCommand, parse_content_type, parse_section,
};

fn cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser)]
#[command(name = "xtv")]
#[command(about = "Xtream catalog browser with local caching and progressive indexing")]
#[command(version)]
#[command(styles = cargo_style())]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Account name from the config file
    #[arg(short, long, global = true)]
    account: Option<String>,

    /// Alternate config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a page of catalog content
    List {
        /// Section to list (all, live, movies, series)
        #[arg(short, long, default_value = "all")]
        section: String,
        /// Restrict to a category id
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        /// Output format (text, json, m3u)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List categories for a content type
    Categories {
        /// Content type (live, movie, series)
        #[arg(short = 't', long, default_value = "movie")]
        r#type: String,
        /// Bypass cached categories
        #[arg(long)]
        refresh: bool,
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Search content
    Search {
        /// Search query
        query: String,
        /// Section to search (all, live, movies, series)
        #[arg(short, long, default_value = "all")]
        section: String,
        /// Restrict the search to a category id
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        /// Output format (text, json, m3u)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Build or inspect the local search index
    #[command(subcommand)]
    Sync(SyncSubcommand),

    /// Manage the on-disk cache
    #[command(subcommand)]
    Cache(CacheSubcommand),
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Index every section completely
    Full {
        /// Re-index even sections already complete
        #[arg(long)]
        force: bool,
    },
    /// Index only the first pages of each section
    Fast,
    /// Show the persisted sync state
    Status,
}

#[derive(Subcommand)]
enum CacheSubcommand {
    /// Drop cached content and mark the account for refresh
    Refresh,
    /// Remove the account's cache files
    Clear,
    /// Show cache location and size
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(tracing::Level::DEBUG.into())
                    .add_directive("hyper_util=error".parse()?),
            )
            .init();
    } else if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive("hyper_util=error".parse()?),
            )
            .init();
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        eprintln!(
            "No config found at {}; writing a template. Edit it and re-run.",
            config_path.display()
        );
        let config = Config::default();
        config.save(&config_path)?;
        return Ok(());
    };

    let context = CommandContext::new(&config, cli.account.as_deref())?;

    match cli.command {
        Commands::List {
            section,
            category,
            page,
            page_size,
            format,
        } => {
            let cmd = ListCommand {
                section: parse_section(&section)?,
                category,
                page,
                page_size,
                format: OutputFormat::from_str(&format)?,
            };
            cmd.execute(context).await?;
        }

        Commands::Categories {
            r#type,
            refresh,
            format,
        } => {
            let cmd = CategoriesCommand {
                kind: parse_content_type(&r#type)?,
                refresh,
                format: OutputFormat::from_str(&format)?,
            };
            cmd.execute(context).await?;
        }

        Commands::Search {
            query,
            section,
            category,
            page,
            page_size,
            format,
        } => {
            let cmd = SearchCommand {
                query,
                section: parse_section(&section)?,
                category,
                page,
                page_size,
                format: OutputFormat::from_str(&format)?,
            };
            cmd.execute(context).await?;
        }

        Commands::Sync(sync_cmd) => {
            let cmd = match sync_cmd {
                SyncSubcommand::Full { force } => SyncCommand::Full { force },
                SyncSubcommand::Fast => SyncCommand::Fast,
                SyncSubcommand::Status => SyncCommand::Status,
            };
            cmd.execute(context).await?;
        }

        Commands::Cache(cache_cmd) => {
            let cmd = match cache_cmd {
                CacheSubcommand::Refresh => CacheCommand::Refresh,
                CacheSubcommand::Clear => CacheCommand::Clear,
                CacheSubcommand::Stats => CacheCommand::Stats,
            };
            cmd.execute(context).await?;
        }
    }

    Ok(())
}
