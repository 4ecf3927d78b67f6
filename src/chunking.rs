//! Word-window chunking for splitting documents into retrievable units.
//!
//! Text is split on whitespace and grouped into windows of at most
//! `chunk_size` words. Consecutive windows share exactly `overlap` words,
//! so a sentence cut at a window edge still appears whole in one of the
//! two neighbouring chunks. The last window ends at the last word and may
//! be shorter than `chunk_size`.

use crate::error::{Error, Result};

/// Default window size in words.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default number of words shared by consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Validated chunking parameters.
///
/// # Examples
///
/// ```
/// use docvec::chunking::ChunkingConfig;
///
/// assert!(ChunkingConfig::new(3, 1).is_ok());
/// assert!(ChunkingConfig::new(3, 3).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    /// Reject configurations that would make the window stop advancing.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "chunk size must be at least one word".into(),
            ));
        }
        if overlap >= chunk_size {
            return Err(Error::InvalidArgument(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        chunk_words(text, self.chunk_size, self.overlap)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A window of words from a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The window's words joined by single spaces.
    pub text: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// Position of the window's first word in the document.
    pub start_word: usize,
    /// Number of words in the window.
    pub word_count: usize,
}

/// Split text into overlapping word windows.
///
/// `overlap >= chunk_size` is clamped to `chunk_size - 1` and a zero
/// `chunk_size` is treated as one word, so the window always advances.
/// Use [`ChunkingConfig::new`] to reject such values up front.
///
/// # Examples
///
/// ```
/// use docvec::chunking::chunk_words;
///
/// let chunks = chunk_words("alpha beta gamma delta epsilon", 3, 1);
/// let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
/// assert_eq!(texts, ["alpha beta gamma", "gamma delta epsilon"]);
///
/// assert!(chunk_words("   ", 3, 1).is_empty());
/// ```
pub fn chunk_words(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let step = chunk_size - overlap;

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(Chunk {
            text: words[start..end].join(" "),
            index: chunks.len(),
            start_word: start,
            word_count: end - start,
        });

        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}
