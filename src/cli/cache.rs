use super::CommandContext;
use anyhow::Result;

pub enum CacheCommand {
    /// Drop cached content for the account and mark it for refresh.
    Refresh,
    /// Remove the account's cache files outright.
    Clear,
    /// Report cache location and file count.
    Stats,
}

impl CacheCommand {
    pub async fn execute(self, context: CommandContext) -> Result<()> {
        let disk = context.repo.disk_cache();
        match self {
            CacheCommand::Refresh => {
                context.repo.refresh_content(&context.account).await?;
                println!("Cache refreshed; next fetches will repopulate it.");
            }
            CacheCommand::Clear => {
                let removed = disk.clear_for(&context.account).await?;
                println!("Removed {} cache file(s).", removed);
            }
            CacheCommand::Stats => {
                let count = disk.file_count_for(&context.account).await?;
                println!("Cache directory: {}", disk.root().display());
                println!("Files for this account: {}", count);
                if context.repo.has_pending_refresh(&context.account).await {
                    println!("A refresh is pending.");
                }
            }
        }
        Ok(())
    }
}
