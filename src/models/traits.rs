// ARCHITECTURE: Model Seams
//
// The request handlers only see these traits. Concrete candle models live in
// sibling modules and are injected at startup, which keeps the handlers
// testable with in-memory fakes.

use anyhow::Result;

/// Sequence-to-sequence translation of a single, already size-limited chunk.
pub trait TranslationModel: Send + Sync {
    /// Translate `text`, producing at most `max_length` decoder positions.
    fn translate(&self, text: &str, max_length: usize) -> Result<String>;

    /// Hub identifier of the loaded model.
    fn name(&self) -> &str;
}

/// Decoding options for causal generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Cap on the total sequence length, prompt included.
    pub max_length: usize,
    pub num_return_sequences: usize,
    /// `false` selects greedy decoding; `top_k` and `temperature` are then ignored.
    pub do_sample: bool,
    pub top_k: usize,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 20,
            num_return_sequences: 1,
            do_sample: false,
            top_k: 50,
            temperature: 1.0,
        }
    }
}

/// Causal language model plus the tokenizer it was trained with.
pub trait GenerationModel: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode without skipping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn bos_token_id(&self) -> u32;

    /// Text form of the end-of-sequence marker, as `decode` renders it.
    fn eos_token(&self) -> &str;

    /// Generate `num_return_sequences` continuations of `input_ids`.
    /// Each returned list holds only the new tokens.
    fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<Vec<u32>>>;

    fn name(&self) -> &str;
}
