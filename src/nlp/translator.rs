use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::TranslationModel;
use crate::nlp::TextProcessor;

/// Longest chunk handed to the model, in characters.
pub const MAX_CHUNK_CHARS: usize = 400;
/// Output cap per chunk, in decoder positions.
pub const MAX_TRANSLATION_LENGTH: usize = 400;

/// English to Greek translation of arbitrarily long text.
#[derive(Clone)]
pub struct Translator {
    model: Arc<dyn TranslationModel>,
}

impl Translator {
    pub fn new(model: Arc<dyn TranslationModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Translate chunk by chunk and join the results in order. The first
    /// model failure aborts the whole translation.
    pub fn translate(&self, text: &str) -> Result<String> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        tracing::debug!(chunks = chunks.len(), "Translating text");

        let mut translated = String::new();
        for chunk in chunks {
            let output = self
                .model
                .translate(chunk, MAX_TRANSLATION_LENGTH)
                .map_err(|e| Error::Translation(e.to_string()))?;
            translated.push_str(&output);
        }
        Ok(translated)
    }
}

#[async_trait]
impl TextProcessor for Translator {
    async fn process(&self, text: String) -> Result<String> {
        let translator = self.clone();
        tokio::task::spawn_blocking(move || translator.translate(&text))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }
}

/// Split `text` into consecutive slices of at most `max_chars` characters.
/// Empty input yields no chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_is_ceiling_of_length() {
        for len in [1usize, 399, 400, 401, 800, 801, 1234] {
            let text = "a".repeat(len);
            let chunks = chunk_text(&text, MAX_CHUNK_CHARS);
            assert_eq!(chunks.len(), len.div_ceil(MAX_CHUNK_CHARS), "length {len}");
            assert!(chunks.iter().all(|c| c.chars().count() <= MAX_CHUNK_CHARS));
            assert_eq!(chunks.concat(), text);
        }
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", MAX_CHUNK_CHARS).is_empty());
    }

    #[test]
    fn test_chunks_split_on_characters_not_bytes() {
        let text = "αβγδε";
        let chunks = chunk_text(text, 2);
        assert_eq!(chunks, vec!["αβ", "γδ", "ε"]);
    }

    #[test]
    fn test_last_chunk_may_be_shorter() {
        let text = format!("{}{}", "x".repeat(400), "tail");
        let chunks = chunk_text(&text, MAX_CHUNK_CHARS);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "tail");
    }
}
