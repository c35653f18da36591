use super::{CommandContext, OutputFormat, print_items};
use anyhow::Result;
use serde_json::json;

use xtv::model::{ContentType, Section};

pub struct ListCommand {
    pub section: Section,
    pub category: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub format: OutputFormat,
}

impl ListCommand {
    pub async fn execute(self, context: CommandContext) -> Result<()> {
        let page = match (&self.category, self.section.content_type()) {
            (Some(category_id), Some(kind)) => {
                context
                    .repo
                    .load_category_page(kind, category_id, self.page, self.page_size, &context.account)
                    .await?
            }
            (Some(_), None) => {
                anyhow::bail!("Category filtering needs a concrete section, not 'all'")
            }
            (None, _) => {
                context
                    .repo
                    .load_page(self.section, self.page, self.page_size, &context.account)
                    .await?
            }
        };

        print_items(&page.items, self.format, &context.account)?;
        if matches!(self.format, OutputFormat::Text) && !page.end_reached {
            eprintln!("(more pages available; --page {})", self.page + 1);
        }
        Ok(())
    }
}

pub struct CategoriesCommand {
    pub kind: ContentType,
    pub refresh: bool,
    pub format: OutputFormat,
}

impl CategoriesCommand {
    pub async fn execute(self, context: CommandContext) -> Result<()> {
        let categories = context
            .repo
            .load_categories(self.kind, &context.account, self.refresh)
            .await?;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&json!(categories))?);
            }
            _ => {
                for category in &categories {
                    println!("{}  {}", category.id, category.name);
                }
            }
        }
        Ok(())
    }
}
