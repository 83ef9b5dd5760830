//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`FixedSizeChunker`]: splits by character count with configurable overlap
//! - [`RecursiveChunker`]: splits hierarchically by paragraphs, sentences, then words
//!
//! Sizes are counted in characters, never bytes, so multi-byte text is always
//! cut on a character boundary.

/// A strategy for splitting text into bounded-size pieces.
pub trait Chunker: Send + Sync {
    /// Split `text` into pieces of at most the configured size.
    ///
    /// Returns an empty `Vec` for blank text.
    fn split(&self, text: &str) -> Vec<String>;
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The last `n` characters of `text`, starting at a word boundary when one exists.
fn overlap_tail(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let len = char_len(text);
    if len <= n {
        return text;
    }
    let start = text.char_indices().nth(len - n).map_or(0, |(i, _)| i);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(ws) if ws + 1 < tail.len() => tail[ws..].trim_start(),
        _ => tail,
    }
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// # Example
///
/// ```rust,ignore
/// use ragline_core::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50);
/// let pieces = chunker.split(&text);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

impl Chunker for FixedSizeChunker {
    fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        split_by_size(text, self.chunk_size, self.chunk_overlap)
    }
}

/// Simple character-based splitting with overlap.
fn split_by_size(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Splits text hierarchically: paragraphs → sentences → words.
///
/// First splits by paragraph separators (`\n\n`). If a paragraph exceeds
/// `chunk_size`, splits by sentence boundaries (`. `, `! `, `? `). If a
/// sentence still exceeds `chunk_size`, splits by word boundaries, and a
/// single oversized word falls back to fixed-size splitting. Each new chunk
/// starts with up to `chunk_overlap` trailing characters of the previous one
/// when they fit.
///
/// # Example
///
/// ```rust,ignore
/// use ragline_core::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(512, 100);
/// let pieces = chunker.split(&text);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

const SEPARATORS: [&str; 5] = ["\n\n", ". ", "! ", "? ", " "];

/// Split text by a separator, then merge segments into chunks that respect
/// `chunk_size`. If a segment exceeds `chunk_size`, it is split further
/// using the next-level separator.
fn split_and_merge(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Vec<String> {
    if char_len(text) <= chunk_size || separators.is_empty() {
        return split_by_size(text, chunk_size, chunk_overlap);
    }

    let separator = separators[0];
    let remaining_separators = &separators[1..];
    let segments = split_keeping_separator(text, separator);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, chunks: &mut Vec<String>| {
        if current.trim().is_empty() {
            current.clear();
            return;
        }
        if char_len(current.as_str()) > chunk_size {
            chunks.extend(split_and_merge(
                current.as_str(),
                chunk_size,
                chunk_overlap,
                remaining_separators,
            ));
        } else {
            chunks.push(std::mem::take(current));
        }
        current.clear();
    };

    for segment in segments {
        if current.is_empty() || char_len(&current) + char_len(segment) <= chunk_size {
            current.push_str(segment);
            continue;
        }

        flush(&mut current, &mut chunks);
        let tail = chunks.last().map(|last| overlap_tail(last, chunk_overlap)).unwrap_or("");
        if !tail.is_empty() && char_len(tail) + 1 + char_len(segment) <= chunk_size {
            current.push_str(tail);
            if !tail.ends_with(char::is_whitespace) {
                current.push(' ');
            }
        }
        current.push_str(segment);
    }
    flush(&mut current, &mut chunks);

    chunks
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

impl Chunker for RecursiveChunker {
    fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        split_and_merge(text, self.chunk_size, self.chunk_overlap, &SEPARATORS)
            .into_iter()
            .map(|piece| piece.trim().to_string())
            .filter(|piece| !piece.is_empty())
            .collect()
    }
}
