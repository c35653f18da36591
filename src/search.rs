// SPDX-License-Identifier: MIT

use crate::model::ContentItem;

/// Minimum normalized query length for a local-index search.
pub const MIN_LOCAL_QUERY_LEN: usize = 2;
/// Minimum raw query length before an interactive search fires.
pub const MIN_UI_QUERY_LEN: usize = 3;

/// Normalizes a user query: trims whitespace, then strips a leading 2-3 letter
/// alphabetic language tag followed by `-`, `:` or `|` ("EN - Title" panels
/// prefix every title that way). A single-letter prefix does not qualify.
pub fn normalize_query(query: &str) -> String {
    let trimmed = query.trim();
    if let Some(rest) = strip_language_prefix(trimmed) {
        rest.to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_language_prefix(s: &str) -> Option<&str> {
    for sep in ['-', ':', '|'] {
        if let Some((head, tail)) = s.split_once(sep) {
            let head = head.trim();
            if (2..=3).contains(&head.len()) && head.chars().all(|c| c.is_ascii_alphabetic()) {
                let tail = tail.trim_start();
                if !tail.is_empty() {
                    return Some(tail);
                }
            }
        }
    }
    None
}

/// Case-insensitive title containment over a previously built section index,
/// preserving index order.
pub fn filter_index<'a>(index: &'a [ContentItem], query: &str) -> Vec<&'a ContentItem> {
    let needle = query.to_lowercase();
    index
        .iter()
        .filter(|item| item.title.to_lowercase().contains(&needle))
        .collect()
}
