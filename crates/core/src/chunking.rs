use crate::error::RagError;
use crate::extractor::PageText;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE_WORDS: usize = 200;
pub const DEFAULT_OVERLAP_WORDS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size_words: usize,
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_words: DEFAULT_CHUNK_SIZE_WORDS,
            overlap_words: DEFAULT_OVERLAP_WORDS,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size_words: usize, overlap_words: usize) -> Result<Self, RagError> {
        let config = Self {
            chunk_size_words,
            overlap_words,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size_words == 0 {
            return Err(RagError::InvalidConfig(
                "chunk size must be at least one word".to_string(),
            ));
        }
        Ok(())
    }

    /// Words the window advances by; never zero.
    pub fn step(&self) -> usize {
        self.chunk_size_words.saturating_sub(self.overlap_words).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub page_number: Option<u32>,
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Overlapping word windows: one starts every `step` words, each at most
/// `chunk_size_words` long.
pub fn chunk_text(text: &str, chunk_size_words: usize, overlap_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    window_starts(
        words.len(),
        ChunkingConfig {
            chunk_size_words,
            overlap_words,
        },
    )
    .map(|(start, end)| words[start..end].join(" "))
    .collect()
}

/// Same windows as [`chunk_text`] over the joined pages, tagged with the page
/// holding each window's first word.
pub fn chunk_pages(pages: &[PageText], config: ChunkingConfig) -> Vec<TextChunk> {
    let words: Vec<(&str, u32)> = pages
        .iter()
        .flat_map(|page| page.text.split_whitespace().map(move |word| (word, page.number)))
        .collect();

    window_starts(words.len(), config)
        .map(|(start, end)| TextChunk {
            text: words[start..end]
                .iter()
                .map(|(word, _)| *word)
                .collect::<Vec<_>>()
                .join(" "),
            page_number: Some(words[start].1),
        })
        .collect()
}

fn window_starts(word_count: usize, config: ChunkingConfig) -> impl Iterator<Item = (usize, usize)> {
    let size = config.chunk_size_words;
    let starts = if size == 0 { 0 } else { word_count };
    (0..starts)
        .step_by(config.step())
        .map(move |start| (start, (start + size).min(word_count)))
}
