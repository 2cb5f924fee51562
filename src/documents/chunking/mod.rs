
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::documents::LoadedDocument;

/// A chunk of document text ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub content: String,
    /// Index of this chunk within its source document.
    pub chunk_index: usize,
    /// Estimated token count.
    pub token_count: usize,
}

/// Configuration for document chunking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens before forced splitting
    pub max_chunk_size: usize,
    /// Minimum chunk size in tokens (smaller chunks will be merged)
    pub min_chunk_size: usize,
    /// Whether to break at sentence boundaries when possible
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 650,
            max_chunk_size: 1000,
            min_chunk_size: 100,
            sentence_boundary_splitting: true,
        }
    }
}

/// Chunk a loaded document into embedding-ready pieces.
///
/// Paragraphs are the primary unit: they are accumulated up to the target
/// size, oversized paragraphs are split at sentence boundaries (or by
/// word count when sentence splitting is disabled or insufficient), and
/// undersized trailing chunks are merged backwards.
#[inline]
pub fn chunk_document(document: &LoadedDocument, config: &ChunkingConfig) -> Vec<DocumentChunk> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in document.text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let paragraph_tokens = estimate_token_count(paragraph);
        if paragraph_tokens > config.max_chunk_size {
            // Oversized paragraph: flush whatever is pending, then split it
            if !current.trim().is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_oversized(paragraph, config));
            continue;
        }

        let combined_tokens = estimate_token_count(&current) + paragraph_tokens;
        if combined_tokens > config.target_chunk_size && !current.trim().is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.trim().is_empty() {
        pieces.push(current);
    }

    let pieces = merge_small_chunks(pieces, config);

    let chunks: Vec<DocumentChunk> = pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, content)| {
            let token_count = estimate_token_count(&content);
            DocumentChunk {
                content,
                chunk_index,
                token_count,
            }
        })
        .collect();

    debug!(
        "Chunked '{}' into {} chunks (avg {} tokens)",
        document.file_name,
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}

/// Split a paragraph that exceeds the max chunk size.
fn split_oversized(paragraph: &str, config: &ChunkingConfig) -> Vec<String> {
    let units: Vec<&str> = if config.sentence_boundary_splitting {
        split_sentences(paragraph)
    } else {
        paragraph.split_whitespace().collect()
    };

    let mut pieces = Vec::new();
    let mut current = String::new();

    for unit in units {
        let combined = if current.is_empty() {
            estimate_token_count(unit)
        } else {
            estimate_token_count(&current) + estimate_token_count(unit)
        };

        if combined > config.target_chunk_size && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(unit);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Split text into sentences on terminal punctuation followed by
/// whitespace. Keeps the punctuation with the sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (idx, ch) in text.char_indices() {
        if prev_terminal && ch.is_whitespace() {
            let sentence = text[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx;
        }
        prev_terminal = matches!(ch, '.' | '!' | '?');
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Merge chunks below the minimum size into their predecessor.
fn merge_small_chunks(pieces: Vec<String>, config: &ChunkingConfig) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(pieces.len());

    for piece in pieces {
        let tokens = estimate_token_count(&piece);
        if tokens < config.min_chunk_size {
            if let Some(last) = merged.last_mut() {
                if estimate_token_count(last) + tokens <= config.max_chunk_size {
                    last.push_str("\n\n");
                    last.push_str(&piece);
                    continue;
                }
            }
        }
        merged.push(piece);
    }

    merged
}

/// Rough token estimate: whitespace-delimited words plus standalone
/// punctuation, which tracks BPE tokenizers closely enough for sizing.
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text
        .chars()
        .filter(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '(' | ')' | '"'))
        .count();
    words + punctuation
}
