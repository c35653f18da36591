use super::CommandContext;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use xtv::model::Section;
use xtv::repository::ProgressFn;
use xtv::sync::{FileSyncStateStore, ProgressiveSyncCoordinator, SyncStateStore};

pub enum SyncCommand {
    /// Build the full local search index, section by section.
    Full { force: bool },
    /// Bounded first-pages pass so search works immediately.
    Fast,
    /// Show the persisted sync state.
    Status,
}

impl SyncCommand {
    pub async fn execute(self, context: CommandContext) -> Result<()> {
        match self {
            SyncCommand::Full { force } => run_full_sync(context, force).await,
            SyncCommand::Fast => run_fast_start(context).await,
            SyncCommand::Status => show_status(context).await,
        }
    }
}

fn state_store(context: &CommandContext) -> Result<Arc<FileSyncStateStore>> {
    Ok(Arc::new(FileSyncStateStore::new(
        context.repo.disk_cache().root().clone(),
    )?))
}

async fn run_full_sync(context: CommandContext, force: bool) -> Result<()> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {percent}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message("Indexing library...");

    let bar = pb.clone();
    let on_progress: ProgressFn = Arc::new(move |progress| {
        bar.set_position((progress.fraction * 100.0) as u64);
        bar.set_message(format!(
            "{}/{} sections, {} items",
            progress.sections_done, progress.sections_total, progress.items_indexed
        ));
    });

    let items = context
        .repo
        .sync_search_index(&context.account, force, None, Some(on_progress))
        .await?;

    pb.finish_and_clear();
    context
        .repo
        .disk_cache()
        .clear_refresh_marker(&context.account)
        .await;
    println!(
        "Indexed {} items across {} sections.",
        items,
        Section::indexable().len()
    );
    Ok(())
}

async fn run_fast_start(context: CommandContext) -> Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Fast-start indexing...");
    pb.enable_steady_tick(std::time::Duration::from_millis(120));

    let store = state_store(&context)?;
    let coordinator = ProgressiveSyncCoordinator::new(
        Arc::clone(&context.repo),
        store,
        context.account.clone(),
    )
    .await;
    coordinator.start_fast_start().await;
    coordinator.join_running_jobs().await;

    pb.finish_and_clear();
    let state = coordinator.current_state().await;
    if state.fast_start_ready {
        println!("Fast start done; search is ready.");
    } else {
        println!("Fast start finished with errors; some sections are not indexed yet.");
    }
    Ok(())
}

async fn show_status(context: CommandContext) -> Result<()> {
    let store = state_store(&context)?;
    let Some(state) = store.load_sync_state(&context.account.account_hash()).await else {
        println!("No sync state recorded for this account.");
        return Ok(());
    };

    println!("Phase: {:?}", state.phase);
    println!("Fast start ready: {}", state.fast_start_ready);
    println!("Full index complete: {}", state.full_index_complete);
    for section in Section::indexable() {
        let done = state.sections_completed.contains(&section);
        let items = state
            .section_progress
            .get(&section)
            .map(|p| p.items_indexed)
            .unwrap_or(0);
        println!(
            "  {:8} {} ({} items)",
            section.as_str(),
            if done { "complete" } else { "pending" },
            items
        );
    }
    if let Some(ts) = state.last_sync_timestamp {
        println!("Last full sync: {}", ts.to_rfc3339());
    }
    Ok(())
}
