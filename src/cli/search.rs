use super::{CommandContext, OutputFormat, print_items};
use anyhow::{Result, bail};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use xtv::model::{ContentItem, Section};
use xtv::search::MIN_UI_QUERY_LEN;

pub struct SearchCommand {
    pub query: String,
    pub section: Section,
    pub category: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub format: OutputFormat,
}

impl SearchCommand {
    pub async fn execute(self, context: CommandContext) -> Result<()> {
        let query = validate_query(&self.query)?;

        let page = match &self.category {
            Some(category_id) => {
                let Some(kind) = self.section.content_type() else {
                    bail!("--category requires a concrete section (live, movies, series)");
                };
                context
                    .repo
                    .search_category_page(
                        kind,
                        category_id,
                        query,
                        self.page,
                        self.page_size,
                        &context.account,
                    )
                    .await?
            }
            None => {
                context
                    .repo
                    .search_page(
                        self.section,
                        query,
                        self.page,
                        self.page_size,
                        &context.account,
                    )
                    .await?
            }
        };

        // The repository returns results in catalog order; re-rank for
        // terminal output so the closest titles come first.
        let ranked = rank_by_relevance(page.items, &self.query);

        if ranked.is_empty() && matches!(self.format, OutputFormat::Text) {
            println!("No results found for '{}'", self.query);
            return Ok(());
        }
        print_items(&ranked, self.format, &context.account)?;
        if matches!(self.format, OutputFormat::Text) && !page.end_reached {
            eprintln!("(more pages available; --page {})", self.page + 1);
        }
        Ok(())
    }
}

/// Interactive searches need a few characters before they are worth the
/// upstream round trips a short query would trigger.
fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.chars().count() < MIN_UI_QUERY_LEN {
        bail!("query too short; need at least {MIN_UI_QUERY_LEN} characters");
    }
    Ok(trimmed)
}

fn rank_by_relevance(items: Vec<ContentItem>, query: &str) -> Vec<ContentItem> {
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, ContentItem)> = items
        .into_iter()
        .map(|item| {
            let score = matcher.fuzzy_match(&item.title, query).unwrap_or(0);
            (score, item)
        })
        .collect();
    // Stable sort keeps catalog order among equal scores.
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, item)| item).collect()
}
