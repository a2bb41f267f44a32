//! CSS selector helpers.
//!
//! Site class names often carry build hashes (`ListingCellItem_cellItemWrapper__t2hO2`)
//! that change between deployments. [`flexible_selector`] rewrites such a
//! selector into substring matches on its meaningful words.

use crate::errors::{ConfigError, ExtractionError};
use crate::extraction::ExtractionClient;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Words that say nothing about what an element holds.
pub const STOPWORDS: &[&str] = &[
    "wrapper", "container", "main", "active", "button", "btn", "icon", "image", "img", "media",
    "content", "holder", "inner", "outer", "slide", "shadow", "light", "dark", "style", "layout",
    "grid", "row", "col", "link", "nav", "filter", "used", "splide", "cell",
];

/// Primary keywords and the class fragments that commonly accompany them.
pub const KEYWORD_SYNONYMS: &[(&str, &[&str])] = &[
    ("listing", &["ListingCell", "PropertyCard", "listing-item"]),
    ("product", &["item", "product-card", "prd"]),
    ("search", &["result-item", "search-result"]),
    ("card", &["panel", "tile", "card-container"]),
];

/// Minimum length of a fallback keyword.
const MIN_KEYWORD_LEN: usize = 4;

const SUGGEST_SYSTEM_PROMPT: &str = "You are a CSS selector optimization expert. \
Convert rigid CSS selectors into flexible, robust versions.

Example 1:
Rigid: [class^='ListingCellItem_cellItemWrapper__t2hO2']
Flexible: [class*='ListingCell'], [class*='PropertyCard'], [class*='listing-item']

Example 2:
Rigid: [class^='product-item-container-wrapper']
Flexible: [class*='product'], [class*='item'], [class*='container']

Example 3:
Rigid: [class^='search-result-card-main']
Flexible: [class*='card'], [class*='result'], [class*='search']";

struct ClassPatterns {
    simple: Regex,
    attribute: Regex,
    delimiters: Regex,
}

static PATTERNS: LazyLock<Option<ClassPatterns>> = LazyLock::new(|| {
    Some(ClassPatterns {
        simple: Regex::new(r"\.([a-zA-Z0-9_-]+)").ok()?,
        attribute: Regex::new(r#"\[class\s*.*?=\s*['"](.*?)['"]\]"#).ok()?,
        delimiters: Regex::new(r"__|_|-|\s").ok()?,
    })
});

/// Checks that a selector is non-empty and, with the `http` feature, parses.
///
/// # Errors
///
/// Returns `InvalidSelector`.
pub fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    if selector.trim().is_empty() {
        return Err(ConfigError::invalid_selector(selector, "selector is empty"));
    }
    #[cfg(feature = "http")]
    scraper::Selector::parse(selector).map_err(|e| ConfigError::invalid_selector(selector, e))?;
    Ok(())
}

/// Rewrites a rigid selector into `[class*='…']` alternatives.
///
/// Returns the input unchanged when it names no classes or no usable
/// keywords, and an empty string for a blank input.
#[must_use]
pub fn flexible_selector(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let Some(patterns) = PATTERNS.as_ref() else {
        return raw.to_string();
    };

    let mut classes: BTreeSet<&str> = patterns
        .simple
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    for captures in patterns.attribute.captures_iter(raw) {
        if let Some(group) = captures.get(1) {
            classes.extend(group.as_str().split_whitespace());
        }
    }
    if classes.is_empty() {
        return raw.to_string();
    }

    let keywords: Vec<&str> = classes
        .iter()
        .copied()
        .flat_map(|class| patterns.delimiters.split(class))
        .flat_map(split_camel_case)
        .collect();

    let mut chosen: BTreeSet<&str> = keywords
        .iter()
        .filter_map(|k| synonyms_for(&k.to_ascii_lowercase()))
        .flatten()
        .copied()
        .collect();

    if chosen.is_empty() {
        chosen = keywords
            .iter()
            .copied()
            .filter(|k| {
                let lower = k.to_ascii_lowercase();
                k.len() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(&lower.as_str())
            })
            .collect();
    }
    if chosen.is_empty() {
        return raw.to_string();
    }

    let alternatives: BTreeSet<String> = chosen.iter().map(|k| format!("[class*='{k}']")).collect();
    alternatives.into_iter().collect::<Vec<_>>().join(", ")
}

fn synonyms_for(keyword: &str) -> Option<&'static [&'static str]> {
    KEYWORD_SYNONYMS
        .iter()
        .find(|(k, _)| *k == keyword)
        .map(|(_, synonyms)| *synonyms)
}

/// Splits `ListingCellItem` into `Listing`, `Cell`, `Item`.
///
/// Acronym runs stay together (`HTMLParser` gives `HTML`, `Parser`);
/// digits and other characters separate words and are dropped.
fn split_camel_case(part: &str) -> Vec<&str> {
    let bytes = part.as_bytes();
    let mut words = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let starts_word = c.is_ascii_uppercase() && bytes.get(i + 1).is_some_and(u8::is_ascii_lowercase);
        if c.is_ascii_lowercase() || starts_word {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_lowercase() {
                i += 1;
            }
            words.push(&part[start..i]);
        } else if c.is_ascii_uppercase() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_uppercase() {
                i += 1;
            }
            // An acronym ends one letter early unless it ends the word.
            let end = if i == bytes.len() { i } else { i - 1 };
            if end > start {
                words.push(&part[start..end]);
            }
            // A lone capital before a digit or symbol is not a word.
            i = end.max(start + 1);
        } else {
            i += 1;
        }
    }
    words
}

/// Asks the model for a flexible version of `raw`.
///
/// # Errors
///
/// Any error from the completion call, or `MalformedResponse` for an empty reply.
pub async fn suggest_selector(client: &ExtractionClient, raw: &str) -> Result<String, ExtractionError> {
    if raw.trim().is_empty() {
        return Ok(raw.to_string());
    }

    let user = format!(
        "Now convert this selector: {raw}\n\n\
         Requirements:\n\
         1. Use the *= operator for flexibility.\n\
         2. Include 3-5 alternative selectors.\n\
         3. Focus on the most important class patterns.\n\
         4. Return only the selector string, with no explanation or formatting."
    );
    let reply = client.complete_text(SUGGEST_SYSTEM_PROMPT, &user).await?;
    let cleaned = clean_suggestion(&reply);
    if cleaned.is_empty() {
        return Err(ExtractionError::malformed("empty selector suggestion"));
    }
    Ok(cleaned)
}

fn clean_suggestion(reply: &str) -> String {
    let without_ticks = reply.replace('`', "");
    let trimmed = without_ticks.trim();
    trimmed
        .strip_prefix("css")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
