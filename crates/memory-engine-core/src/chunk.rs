//! Overlapping, offset-addressed text chunker.
//!
//! Splits text into [`TextChunk`]s whose `start_char..end_char` byte range
//! addresses the *input* text exactly: `chunk.text == text[start..end]`.
//! Two modes share one grouping algorithm:
//!
//! - **Plain** ([`Chunker::chunk`]): units are paragraphs separated by
//!   blank lines.
//! - **Markdown** ([`Chunker::chunk_markdown`]): units are heading-delimited
//!   sections; section title and level are carried as chunk metadata.
//!
//! # Algorithm
//!
//! 1. Split the input into units (paragraphs or sections), trimmed.
//! 2. Accumulate units into a chunk until adding the next one would make
//!    the chunk longer than `chunk_size`.
//! 3. Close the chunk and seed the next one with the last `overlap` bytes of
//!    the closed chunk, advanced to a word boundary.
//! 4. A single unit longer than `chunk_size` is cut with the sliding window:
//!    windows of `chunk_size` bytes whose end snaps back to whitespace within
//!    a 50-byte lookback, each window starting `overlap` bytes before the
//!    previous end.
//! 5. If no units were found, the sliding window runs over the whole text.
//!
//! The first chunk starts at 0, the last ends at `text.len()`, and every
//! chunk starts at or before the previous chunk's end, so the chunks always
//! cover the whole input.
//!
//! # Example
//!
//! ```rust
//! use memory_engine_core::chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let text = "Hello world.\n\nSecond paragraph.";
//! let chunks = chunker.chunk(text, None);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, text);
//! ```

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{MemoryError, Result};
use crate::models::Metadata;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// How far back (in bytes) a window end may move to land on whitespace.
const WORD_BOUNDARY_LOOKBACK: usize = 50;

/// Chunker tuning. Sizes are in bytes of UTF-8 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Group paragraphs before falling back to the sliding window.
    pub preserve_structure: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            preserve_structure: true,
        }
    }
}

/// Which splitting strategy to apply to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    Plain,
    Markdown,
}

/// A slice of the input text plus chunking annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: Metadata,
}

impl TextChunk {
    /// SHA-256 of the chunk text, hex encoded.
    pub fn hash(&self) -> String {
        content_hash(&self.text)
    }
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
struct Section {
    level: usize,
    title: String,
}

/// A trimmed paragraph or section inside the input.
#[derive(Debug, Clone)]
struct Unit {
    start: usize,
    end: usize,
    section: Option<Section>,
}

/// A byte range of the input that becomes one chunk.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    /// Index of the first unit that begins inside this piece.
    unit: usize,
    large: bool,
}

/// Splits text into overlapping chunks. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// # Errors
    ///
    /// [`MemoryError::Validation`] if `chunk_size` is zero or
    /// `overlap >= chunk_size`.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(MemoryError::Validation(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if config.overlap >= config.chunk_size {
            return Err(MemoryError::Validation(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                config.overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn chunk_with_mode(
        &self,
        text: &str,
        mode: ChunkMode,
        metadata: Option<&Metadata>,
    ) -> Vec<TextChunk> {
        match mode {
            ChunkMode::Plain => self.chunk(text, metadata),
            ChunkMode::Markdown => self.chunk_markdown(text, metadata),
        }
    }

    /// Paragraph-preserving chunking with sliding-window fallback.
    pub fn chunk(&self, text: &str, metadata: Option<&Metadata>) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        if self.config.preserve_structure {
            let units = paragraph_units(text);
            pieces = self.group_units(text, &units);
        }
        if pieces.is_empty() {
            pieces = self.sliding_window(text, 0, text.len(), 0);
            extend_to_bounds(&mut pieces, text.len());
        }

        pieces
            .iter()
            .map(|p| TextChunk {
                text: text[p.start..p.end].to_string(),
                start_char: p.start,
                end_char: p.end,
                metadata: metadata.cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// Heading-aware chunking for Markdown documents.
    pub fn chunk_markdown(&self, text: &str, metadata: Option<&Metadata>) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let units = markdown_units(text);
        let pieces = self.group_units(text, &units);

        pieces
            .iter()
            .map(|p| {
                let mut meta = metadata.cloned().unwrap_or_default();
                let section = units.get(p.unit).and_then(|u| u.section.as_ref());
                let (level, title) = section
                    .map(|s| (s.level, s.title.clone()))
                    .unwrap_or((0, String::new()));
                meta.insert("section_level".to_string(), json!(level));
                meta.insert("section_title".to_string(), json!(title));
                meta.insert("chunk_type".to_string(), json!("markdown"));
                if p.large {
                    meta.insert("is_large_section".to_string(), json!(true));
                }
                TextChunk {
                    text: text[p.start..p.end].to_string(),
                    start_char: p.start,
                    end_char: p.end,
                    metadata: meta,
                }
            })
            .collect()
    }

    /// Accumulate units into pieces no longer than `chunk_size`.
    fn group_units(&self, text: &str, units: &[Unit]) -> Vec<Piece> {
        let size = self.config.chunk_size;
        let mut pieces: Vec<Piece> = Vec::new();
        let mut group: Option<Piece> = None;
        // End of the last emitted piece, and where the next piece may begin.
        let mut covered = 0usize;
        let mut next_start = 0usize;

        for (idx, unit) in units.iter().enumerate() {
            if let Some(mut open) = group.take() {
                if unit.end - open.start <= size {
                    open.end = unit.end;
                    group = Some(open);
                    continue;
                }
                pieces.push(open);
                covered = open.end;
                next_start = self.overlap_start(text, open.start, open.end);
            }

            let start = if unit.end - next_start <= size {
                Some(next_start)
            } else if unit.end - covered <= size {
                Some(covered)
            } else {
                None
            };

            match start {
                Some(start) => {
                    group = Some(Piece {
                        start,
                        end: unit.end,
                        unit: idx,
                        large: false,
                    });
                }
                None => {
                    let windows = self.sliding_window(text, next_start, unit.end, idx);
                    if let Some(last) = windows.last() {
                        covered = last.end;
                        next_start = self.overlap_start(text, last.start, last.end);
                    }
                    pieces.extend(windows);
                }
            }
        }

        if let Some(open) = group {
            pieces.push(open);
        }
        extend_to_bounds(&mut pieces, text.len());
        pieces
    }

    /// Fixed-size windows over `text[from..to]`, ends snapped to whitespace.
    fn sliding_window(&self, text: &str, from: usize, to: usize, unit: usize) -> Vec<Piece> {
        let size = self.config.chunk_size;
        let mut pieces = Vec::new();
        let mut start = from;

        while start < to {
            let mut end = floor_char_boundary(text, (start + size).min(to));
            if end <= start {
                end = next_char_boundary(text, start).min(to);
            }

            if end < to && !starts_with_whitespace(&text[end..]) {
                let lookback = ceil_char_boundary(
                    text,
                    end.saturating_sub(WORD_BOUNDARY_LOOKBACK).max(start),
                );
                if let Some((pos, _)) = text[lookback..end]
                    .char_indices()
                    .rev()
                    .find(|(_, c)| c.is_whitespace())
                {
                    if lookback + pos > start {
                        end = lookback + pos;
                    }
                }
            }

            if !text[start..end].trim().is_empty() {
                pieces.push(Piece {
                    start,
                    end,
                    unit,
                    large: true,
                });
            }

            if end >= to {
                break;
            }

            let next = floor_char_boundary(text, end.saturating_sub(self.config.overlap));
            start = if next > start {
                next
            } else {
                next_char_boundary(text, start)
            };
        }

        pieces
    }

    /// Start of the overlap tail of `text[start..end]`, on a word boundary.
    fn overlap_start(&self, text: &str, start: usize, end: usize) -> usize {
        let overlap = self.config.overlap;
        if overlap == 0 {
            return end;
        }
        if end - start <= overlap {
            return start;
        }
        let tail = ceil_char_boundary(text, end - overlap);
        if text[..tail].chars().next_back().is_some_and(char::is_whitespace) {
            return tail;
        }
        match text[tail..end]
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
        {
            Some((pos, c)) => tail + pos + c.len_utf8(),
            None => tail,
        }
    }
}

/// Stretch the first piece back to 0 and the last forward to `len`, so
/// leading and trailing whitespace stays covered.
fn extend_to_bounds(pieces: &mut [Piece], len: usize) {
    if let Some(first) = pieces.first_mut() {
        first.start = 0;
    }
    if let Some(last) = pieces.last_mut() {
        last.end = len;
    }
}

/// Non-blank paragraphs separated by blank lines, trimmed.
fn paragraph_units(text: &str) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim().is_empty() {
            if let Some((start, end)) = current.take() {
                units.push(Unit {
                    start,
                    end,
                    section: None,
                });
            }
            continue;
        }

        let leading = line.len() - line.trim_start().len();
        let content_end = line_start + line.trim_end().len();
        current = match current {
            Some((start, _)) => Some((start, content_end)),
            None => Some((line_start + leading, content_end)),
        };
    }

    if let Some((start, end)) = current {
        units.push(Unit {
            start,
            end,
            section: None,
        });
    }
    units
}

/// Parse `#{1,6} <title>` into `(level, title)`.
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let line = line.trim_end_matches(&['\n', '\r'][..]);
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !starts_with_whitespace(rest) {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title.to_string()))
}

/// Heading-delimited sections, trimmed; blank sections are dropped.
fn markdown_units(text: &str) -> Vec<Unit> {
    let mut raw: Vec<(usize, usize, Section)> = Vec::new();
    let mut section_start = 0usize;
    let mut section = Section {
        level: 0,
        title: String::new(),
    };
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if let Some((level, title)) = parse_heading(line) {
            if line_start > section_start {
                raw.push((section_start, line_start, section));
            }
            section = Section { level, title };
            section_start = line_start;
        }
    }
    if text.len() > section_start {
        raw.push((section_start, text.len(), section));
    }

    raw.into_iter()
        .filter_map(|(start, end, section)| {
            let slice = &text[start..end];
            let trimmed = slice.trim();
            if trimmed.is_empty() {
                return None;
            }
            let leading = slice.len() - slice.trim_start().len();
            Some(Unit {
                start: start + leading,
                end: start + leading + trimmed.len(),
                section: Some(section),
            })
        })
        .collect()
}

fn starts_with_whitespace(s: &str) -> bool {
    s.chars().next().is_some_and(char::is_whitespace)
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest valid UTF-8 char boundary.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Byte index just past the char starting at `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size: size,
            overlap,
            preserve_structure: true,
        })
        .unwrap()
    }

    fn sample_text() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Paragraph {} covers topic {} with a handful of extra words for padding.",
                    i,
                    i * 7
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Rebuild the input by stitching chunks together on their offsets.
    fn stitch(chunks: &[TextChunk]) -> String {
        let mut out = String::new();
        let mut cursor = 0;
        for c in chunks {
            if c.end_char > cursor {
                out.push_str(&c.text[cursor.max(c.start_char) - c.start_char..]);
                cursor = c.end_char;
            }
        }
        out
    }

    fn assert_covers(text: &str, chunks: &[TextChunk], size: usize) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks.last().unwrap().end_char, text.len());
        for c in chunks {
            assert_eq!(c.text, &text[c.start_char..c.end_char]);
            assert!(c.end_char >= c.start_char);
            assert!(!c.text.trim().is_empty());
            assert!(
                c.end_char - c.start_char <= size,
                "chunk of {} bytes exceeds {}",
                c.end_char - c.start_char,
                size
            );
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start_char <= pair[0].end_char, "gap between chunks");
            assert!(pair[1].start_char >= pair[0].start_char);
        }
        assert_eq!(stitch(chunks), text);
    }

    #[test]
    fn test_rejects_overlap_not_less_than_size() {
        let err = Chunker::new(ChunkerConfig {
            chunk_size: 100,
            overlap: 100,
            preserve_structure: true,
        });
        assert!(matches!(err, Err(MemoryError::Validation(_))));
        assert!(Chunker::new(ChunkerConfig {
            chunk_size: 0,
            overlap: 0,
            preserve_structure: true,
        })
        .is_err());
    }

    #[test]
    fn test_empty_and_blank_text() {
        let c = chunker(100, 20);
        assert!(c.chunk("", None).is_empty());
        assert!(c.chunk("   \n\n\t ", None).is_empty());
        assert!(c.chunk_markdown("\n\n", None).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let c = chunker(1000, 200);
        let chunks = c.chunk("Hello, world!", None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start_char, chunks[0].end_char), (0, 13));
    }

    #[test]
    fn test_paragraphs_cover_input_for_many_configs() {
        let text = sample_text();
        for (size, overlap) in [(200, 50), (120, 0), (300, 299), (80, 40), (1000, 200)] {
            let chunks = chunker(size, overlap).chunk(&text, None);
            assert_covers(&text, &chunks, size);
        }
    }

    #[test]
    fn test_overlap_is_present_between_chunks() {
        let text = sample_text();
        let chunks = chunker(200, 60).chunk(&text, None);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_char < pair[0].end_char);
        }
    }

    #[test]
    fn test_overlap_starts_on_word_boundary() {
        let text = sample_text();
        let chunks = chunker(200, 60).chunk(&text, None);
        for c in chunks.iter().skip(1) {
            let prev = text[..c.start_char].chars().last();
            assert!(prev.map(char::is_whitespace).unwrap_or(true));
        }
    }

    #[test]
    fn test_long_paragraph_uses_sliding_window() {
        let text = "lorem ipsum dolor sit amet ".repeat(60);
        let text = text.trim();
        let chunks = chunker(100, 20).chunk(text, None);
        assert!(chunks.len() > 5);
        assert_covers(text, &chunks, 100);
        // Window ends snap back to whitespace rather than splitting words.
        for c in &chunks[..chunks.len() - 1] {
            assert!(text[c.end_char..].starts_with(' '));
        }
    }

    #[test]
    fn test_sliding_window_when_structure_disabled() {
        let c = Chunker::new(ChunkerConfig {
            chunk_size: 100,
            overlap: 30,
            preserve_structure: false,
        })
        .unwrap();
        let text = sample_text();
        let chunks = c.chunk(&text, None);
        assert_covers(&text, &chunks, 100);
    }

    #[test]
    fn test_unbroken_text_still_progresses() {
        let text = "x".repeat(450);
        let chunks = chunker(100, 10).chunk(&text, None);
        assert_covers(&text, &chunks, 100);
        assert_eq!(chunks[1].start_char, 90);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘\n\nÜber straße naïve café ".repeat(8);
        let text = text.trim();
        let chunks = chunker(40, 10).chunk(text, None);
        assert_covers(text, &chunks, 40);
    }

    #[test]
    fn test_metadata_is_copied() {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), json!("unit"));
        let chunks = chunker(100, 10).chunk(&sample_text(), Some(&meta));
        assert!(chunks.iter().all(|c| c.metadata["source"] == "unit"));
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        let c = chunker(150, 30);
        let a = c.chunk(&text, None);
        let b = c.chunk(&text, None);
        assert_eq!(a, b);
        assert_eq!(a[0].hash(), content_hash(&a[0].text));
    }

    #[test]
    fn test_parse_heading() {
        assert_eq!(parse_heading("# Title\n"), Some((1, "Title".to_string())));
        assert_eq!(parse_heading("###### Deep  "), Some((6, "Deep".to_string())));
        assert_eq!(parse_heading("####### Too deep"), None);
        assert_eq!(parse_heading("#NoSpace"), None);
        assert_eq!(parse_heading("#   "), None);
        assert_eq!(parse_heading("plain text"), None);
    }

    #[test]
    fn test_markdown_sections_carry_titles() {
        let text = "Intro line.\n\n# Setup\n\nInstall the tool.\n\n## Usage\n\nRun it daily.";
        let chunks = chunker(30, 5).chunk_markdown(text, None);
        assert_covers(text, &chunks, 30);
        let titles: Vec<&str> = chunks
            .iter()
            .map(|c| c.metadata["section_title"].as_str().unwrap())
            .collect();
        assert!(titles.contains(&"Setup"));
        assert!(titles.contains(&"Usage"));
        let usage = chunks
            .iter()
            .find(|c| c.metadata["section_title"] == "Usage")
            .unwrap();
        assert_eq!(usage.metadata["section_level"], 2);
        assert!(chunks.iter().all(|c| c.metadata["chunk_type"] == "markdown"));
    }

    #[test]
    fn test_markdown_small_document_is_one_chunk() {
        let text = "# Notes\n\nShort body.\n\n## More\n\nAnother line.";
        let chunks = chunker(1000, 200).chunk_markdown(text, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].metadata["section_title"], "Notes");
        assert_eq!(chunks[0].metadata["section_level"], 1);
    }

    #[test]
    fn test_markdown_large_section_is_split() {
        let body = "word ".repeat(100);
        let text = format!("# Small\n\nTiny.\n\n# Big\n\n{}", body.trim());
        let chunks = chunker(120, 20).chunk_markdown(&text, None);
        assert_covers(&text, &chunks, 120);
        let large: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.get("is_large_section") == Some(&json!(true)))
            .collect();
        assert!(large.len() > 2);
        assert!(large.iter().all(|c| c.metadata["section_title"] == "Big"));
    }

    #[test]
    fn test_markdown_offsets_are_document_relative() {
        let text = format!("# A\n\n{}\n\n# B\n\n{}", "alpha ".repeat(40), "beta ".repeat(40));
        let text = text.trim();
        let chunks = chunker(100, 10).chunk_markdown(text, None);
        for c in &chunks {
            assert_eq!(&text[c.start_char..c.end_char], c.text);
        }
    }

    #[test]
    fn test_chunk_with_mode_dispatch() {
        let c = chunker(1000, 100);
        let text = "# Title\n\nBody";
        let md = c.chunk_with_mode(text, ChunkMode::Markdown, None);
        let plain = c.chunk_with_mode(text, ChunkMode::Plain, None);
        assert!(md[0].metadata.contains_key("section_title"));
        assert!(!plain[0].metadata.contains_key("section_title"));
    }
}
