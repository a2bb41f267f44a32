//! Splits page content into bounded chunks for single extraction calls.
//!
//! Cuts prefer, in order: the last element start inside the window, the last
//! blank line, the last line break, the last whitespace, and finally the
//! nearest UTF-8 character boundary. Concatenating the chunks in order always
//! reproduces the input exactly.

use crate::errors::ChunkError;
use crate::fetch::PageContent;
use std::ops::Range;

/// Smallest usable maximum: the width of the widest UTF-8 character.
pub const MIN_CHUNK_SIZE: usize = 4;

/// Default maximum chunk size in bytes.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8000;

/// A bounded slice of one page's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// URL of the page the chunk came from.
    pub page_url: String,
    /// 0-based position within the page.
    pub index: usize,
    /// Chunk text, at most the configured maximum in bytes.
    pub text: String,
}

impl Chunk {
    /// Whether the chunk holds only whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Splits a page into ordered chunks of at most `max_chunk_size` bytes.
///
/// # Errors
///
/// Returns `MaxSizeTooSmall` if `max_chunk_size` is below [`MIN_CHUNK_SIZE`].
pub fn chunk(page: &PageContent, max_chunk_size: usize) -> Result<Vec<Chunk>, ChunkError> {
    let ranges = split_ranges(&page.content, &page.element_offsets, max_chunk_size)?;
    Ok(ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| Chunk {
            page_url: page.url.clone(),
            index,
            text: page.content[range].to_string(),
        })
        .collect())
}

/// Byte ranges of the chunks of `content`.
///
/// `element_offsets` are preferred cut points; offsets that are out of range
/// or not on a character boundary are ignored.
///
/// # Errors
///
/// Returns `MaxSizeTooSmall` if `max_chunk_size` is below [`MIN_CHUNK_SIZE`].
pub fn split_ranges(
    content: &str,
    element_offsets: &[usize],
    max_chunk_size: usize,
) -> Result<Vec<Range<usize>>, ChunkError> {
    if max_chunk_size < MIN_CHUNK_SIZE {
        return Err(ChunkError::MaxSizeTooSmall {
            max: max_chunk_size,
            min: MIN_CHUNK_SIZE,
        });
    }

    let mut offsets: Vec<usize> = element_offsets
        .iter()
        .copied()
        .filter(|&o| o > 0 && o < content.len() && content.is_char_boundary(o))
        .collect();
    offsets.sort_unstable();
    offsets.dedup();

    let mut ranges = Vec::new();
    let mut start = 0;
    while start < content.len() {
        if content.len() - start <= max_chunk_size {
            ranges.push(start..content.len());
            break;
        }
        let end = find_cut(content, &offsets, start, max_chunk_size);
        ranges.push(start..end);
        start = end;
    }
    Ok(ranges)
}

fn find_cut(content: &str, offsets: &[usize], start: usize, max_chunk_size: usize) -> usize {
    let window_end = floor_char_boundary(content, start + max_chunk_size);

    // Element starts strictly inside the window.
    if let Some(&offset) = offsets
        .iter()
        .rev()
        .find(|&&o| o > start && o <= window_end)
    {
        return offset;
    }

    let window = &content[start..window_end];
    if let Some(pos) = window.rfind("\n\n") {
        return start + pos + 2;
    }
    if let Some(pos) = window.rfind('\n') {
        return start + pos + 1;
    }
    if let Some((pos, ch)) = window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        return start + pos + ch.len_utf8();
    }
    window_end
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(page: &PageContent, max: usize) -> Vec<String> {
        chunk(page, max).unwrap().into_iter().map(|c| c.text).collect()
    }

    fn assert_covering(content: &str, chunks: &[String], max: usize) {
        assert_eq!(chunks.concat(), content);
        for c in chunks {
            assert!(c.len() <= max, "chunk of {} bytes exceeds {max}", c.len());
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn test_small_content_single_chunk() {
        let page = PageContent::new("https://a.test", "short text");
        let chunks = chunk(&page, 100).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].page_url, "https://a.test");
        assert_eq!(chunks[0].text, "short text");
    }

    #[test]
    fn test_empty_content_no_chunks() {
        let page = PageContent::new("https://a.test", "");
        assert!(chunk(&page, 100).unwrap().is_empty());
    }

    #[test]
    fn test_max_below_minimum_rejected() {
        let page = PageContent::new("https://a.test", "abc");
        assert_eq!(
            chunk(&page, 3).unwrap_err(),
            ChunkError::MaxSizeTooSmall { max: 3, min: 4 }
        );
    }

    #[test]
    fn test_prefers_element_boundaries() {
        let page = PageContent::from_elements(
            "https://a.test",
            ["card one text", "card two text", "card three text"],
        );
        let chunks = texts(&page, 32);

        assert_eq!(
            chunks,
            vec!["card one text\n\ncard two text\n\n", "card three text"]
        );
        assert_covering(&page.content, &chunks, 32);
    }

    #[test]
    fn test_falls_back_to_line_then_whitespace() {
        let content = "alpha beta\ngamma delta epsilon";
        let page = PageContent::new("https://a.test", content);
        let chunks = texts(&page, 14);

        assert_eq!(chunks, vec!["alpha beta\n", "gamma delta ", "epsilon"]);
        assert_covering(content, &chunks, 14);
    }

    #[test]
    fn test_hard_cut_respects_char_boundaries() {
        let content = "ééééééééé";
        let page = PageContent::new("https://a.test", content);
        let chunks = texts(&page, 5);

        assert_covering(content, &chunks, 5);
        assert_eq!(chunks[0], "éé");
    }

    #[test]
    fn test_four_byte_characters_with_minimum_size() {
        let content = "🦀🦀🦀";
        let page = PageContent::new("https://a.test", content);
        let chunks = texts(&page, MIN_CHUNK_SIZE);

        assert_eq!(chunks, vec!["🦀", "🦀", "🦀"]);
    }

    #[test]
    fn test_coverage_across_sizes() {
        let elements: Vec<String> = (0..40)
            .map(|i| format!("Listing {i}\nPrice: Rp {}.000.000\nCity: Jakarta Selatan", i * 7))
            .collect();
        let page = PageContent::from_elements("https://a.test", &elements);

        for max in [4, 7, 16, 64, 100, 333, 1024, 100_000] {
            let chunks = texts(&page, max);
            assert_covering(&page.content, &chunks, max);
        }
    }

    #[test]
    fn test_invalid_offsets_ignored() {
        let content = "héllo world";
        let ranges = split_ranges(content, &[2, 500, 0], 8).unwrap();

        let joined: String = ranges.iter().map(|r| &content[r.clone()]).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn test_chunking_is_restartable() {
        let page = PageContent::from_elements("https://a.test", ["a b c d e", "f g h i j"]);
        assert_eq!(chunk(&page, 6).unwrap(), chunk(&page, 6).unwrap());
    }
}
