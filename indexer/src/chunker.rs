// src/chunker.rs

//! Text chunking for embedding.
//!
//! Documents longer than the model budget are split into overlapping
//! windows. Splits prefer sentence boundaries and fall back to word
//! boundaries; a chunk never exceeds `max_chunk_chars`.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingSettings;

/// One bounded slice of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: u32,
    /// Character offset of the chunk start in the source text
    pub start: usize,
}

pub struct Chunker {
    max_chars: usize,
    overlap: usize,
    enabled: bool,
}

impl Chunker {
    pub fn new(settings: &ChunkingSettings) -> Self {
        Self {
            max_chars: settings.max_chunk_chars.max(1),
            overlap: settings.overlap_chars,
            enabled: settings.enabled,
        }
    }

    /// Split text into overlapping chunks under the budget.
    ///
    /// Short documents (and disabled chunking) yield a single chunk.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if !self.enabled || trimmed.chars().count() <= self.max_chars {
            return vec![TextChunk {
                content: trimmed.to_string(),
                chunk_index: 0,
                start: 0,
            }];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_start = 0usize;
        let mut consumed = 0usize;

        for sentence in trimmed.unicode_sentences() {
            let sentence_chars = sentence.chars().count();

            if sentence_chars > self.max_chars {
                // Degenerate sentence: flush and split it on word bounds.
                if !current.is_empty() {
                    Self::push_chunk(&mut chunks, &mut current, current_start);
                }
                let mut offset = consumed;
                for piece in self.split_long_run(sentence) {
                    let piece_chars = piece.chars().count();
                    chunks.push(TextChunk {
                        content: piece,
                        chunk_index: chunks.len() as u32,
                        start: offset,
                    });
                    offset += piece_chars;
                }
                consumed += sentence_chars;
                current_start = consumed;
                continue;
            }

            if current.chars().count() + sentence_chars > self.max_chars && !current.is_empty() {
                let overlap_text = self.tail(&current);
                let chunk_len = current.chars().count();
                Self::push_chunk(&mut chunks, &mut current, current_start);
                current_start = current_start + chunk_len - overlap_text.chars().count();
                current = overlap_text;
            }

            if current.is_empty() {
                current_start = consumed;
            }
            current.push_str(sentence);
            consumed += sentence_chars;
        }

        if !current.trim().is_empty() {
            Self::push_chunk(&mut chunks, &mut current, current_start);
        }

        chunks
    }

    fn push_chunk(chunks: &mut Vec<TextChunk>, current: &mut String, start: usize) {
        let content = current.trim().to_string();
        if !content.is_empty() {
            chunks.push(TextChunk {
                content,
                chunk_index: chunks.len() as u32,
                start,
            });
        }
        current.clear();
    }

    /// Last `overlap` characters of a chunk, kept as context for the next.
    fn tail(&self, text: &str) -> String {
        let count = text.chars().count();
        if count <= self.overlap {
            return text.to_string();
        }
        text.chars().skip(count - self.overlap).collect()
    }

    /// Split an over-long unbroken run on word boundaries.
    fn split_long_run(&self, run: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();

        for word in run.split_word_bounds() {
            if current.chars().count() + word.chars().count() > self.max_chars && !current.trim().is_empty() {
                pieces.push(current.trim().to_string());
                current.clear();
            }
            // A single word larger than the budget gets hard-cut.
            if word.chars().count() > self.max_chars {
                if !current.trim().is_empty() {
                    pieces.push(current.trim().to_string());
                }
                current.clear();
                let chars: Vec<char> = word.chars().collect();
                for hard_piece in chars.chunks(self.max_chars) {
                    pieces.push(hard_piece.iter().collect());
                }
                continue;
            }
            current.push_str(word);
        }
        if !current.trim().is_empty() {
            pieces.push(current.trim().to_string());
        }
        pieces
    }

    /// Rough token estimate: CJK runs about one token per character,
    /// Latin about one per four.
    pub fn estimate_tokens(text: &str) -> usize {
        let mut cjk = 0usize;
        let mut other = 0usize;
        for c in text.chars() {
            match c {
                '\u{3040}'..='\u{30ff}' | '\u{4e00}'..='\u{9fff}' => cjk += 1,
                _ => other += 1,
            }
        }
        cjk + other / 4
    }
}
