use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{GenerationModel, GenerationParams};
use crate::nlp::TextProcessor;

/// Longest input accepted, in characters.
pub const MAX_SIMPLIFY_CHARS: usize = 2500;
pub const NUM_CANDIDATES: usize = 4;
const TOP_K: usize = 50;
const TEMPERATURE: f32 = 1.0;

/// Paraphrases text into simpler language by sampling several candidates
/// and keeping the longest.
#[derive(Clone)]
pub struct Simplifier {
    model: Arc<dyn GenerationModel>,
}

impl Simplifier {
    pub fn new(model: Arc<dyn GenerationModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn simplify(&self, text: &str) -> Result<String> {
        let char_count = text.chars().count();
        if char_count > MAX_SIMPLIFY_CHARS {
            tracing::warn!(chars = char_count, "Rejecting oversized simplification input");
            return Err(Error::TextTooBig);
        }

        let mut input_ids = self.model.encode(text).map_err(generation_error)?;
        input_ids.push(self.model.bos_token_id());

        let params = GenerationParams {
            max_length: char_count,
            num_return_sequences: NUM_CANDIDATES,
            do_sample: true,
            top_k: TOP_K,
            temperature: TEMPERATURE,
        };
        let sequences = self
            .model
            .generate(&input_ids, &params)
            .map_err(generation_error)?;

        let eos = self.model.eos_token();
        let candidates = sequences
            .iter()
            .map(|ids| {
                self.model
                    .decode(ids)
                    .map(|decoded| decoded.replace(eos, ""))
                    .map_err(generation_error)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(candidates = candidates.len(), "Selecting longest candidate");
        Ok(longest(candidates))
    }
}

fn generation_error(e: anyhow::Error) -> Error {
    Error::Generation(e.to_string())
}

/// Longest candidate by character count; the earliest wins a tie.
pub fn longest(candidates: Vec<String>) -> String {
    candidates.into_iter().fold(String::new(), |best, candidate| {
        if candidate.chars().count() > best.chars().count() {
            candidate
        } else {
            best
        }
    })
}

#[async_trait]
impl TextProcessor for Simplifier {
    async fn process(&self, text: String) -> Result<String> {
        let simplifier = self.clone();
        tokio::task::spawn_blocking(move || simplifier.simplify(&text))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_picks_maximum_length() {
        let candidates = vec!["ab".to_string(), "abcd".to_string(), "abc".to_string()];
        assert_eq!(longest(candidates), "abcd");
    }

    #[test]
    fn test_longest_keeps_first_on_tie() {
        let candidates = vec!["one".to_string(), "two".to_string(), "six".to_string()];
        assert_eq!(longest(candidates), "one");
    }

    #[test]
    fn test_longest_counts_characters() {
        // 3 characters, 6 bytes vs 4 ASCII characters
        let candidates = vec!["αβγ".to_string(), "abcd".to_string()];
        assert_eq!(longest(candidates), "abcd");
    }

    #[test]
    fn test_longest_of_nothing_is_empty() {
        assert_eq!(longest(Vec::new()), "");
    }
}
