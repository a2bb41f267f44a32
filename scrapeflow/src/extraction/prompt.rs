//! Prompt construction for record extraction.

use super::record::FieldSet;
use crate::chunker::Chunk;
use crate::providers::Prompt;

/// System prompt used when the caller supplies none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert data extraction assistant. \
You receive content selected from a web page, usually a list of items such as product \
or property listings. Extract one record per item. Keep values exactly as they appear \
on the page, cleaned of surrounding markup. If a piece of information is not present, \
set it to null.";

/// Builds the extraction prompt for one chunk.
///
/// The field schema and the null-over-guessing rule are always appended to
/// the system prompt, custom or default.
#[must_use]
pub fn extraction_prompt(fields: &FieldSet, system_prompt: Option<&str>, chunk: &Chunk) -> Prompt {
    let base = system_prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);

    let keys = fields.names().join(", ");
    let system = format!(
        "{base}\n\n\
         Respond with JSON only, in the form {{\"records\": [ ... ]}}.\n\
         Every record must have exactly these keys: {keys}.\n\
         Record schema: {schema}\n\
         Use null for any value that is not present in the content. Never guess or invent values.\n\
         If the content holds no records, respond with {{\"records\": []}}.",
        schema = fields.json_schema(),
    );

    let user = format!(
        "Content from {url} (part {part}):\n\n{text}",
        url = chunk.page_url,
        part = chunk.index + 1,
        text = chunk.text,
    );

    Prompt::json(system, user)
}
