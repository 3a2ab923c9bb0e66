// ARCHITECTURE: keep_it_simple Paraphrase Generator
//
// GPT-2 medium fine-tuned for simplification. The prompt is the paragraph
// followed by the BOS token; the continuation is the simplified text.
// All candidates run as one batch and every row is sampled independently.

use anyhow::Result;
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use crate::config::SimplificationModelConfig;
use crate::models::gpt2::{Cache, Config, Gpt2};
use crate::models::hub;
use crate::models::sampling::{argmax, sample_top_k};
use crate::models::traits::{GenerationModel, GenerationParams};

const EOS_TOKEN: &str = "<|endoftext|>";

pub struct KeepItSimpleModel {
    name: String,
    model: Gpt2,
    tokenizer: Tokenizer,
    device: Device,
}

impl std::fmt::Debug for KeepItSimpleModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeepItSimpleModel({})", self.name)
    }
}

impl KeepItSimpleModel {
    /// Blocking: downloads and maps the weights. Call from a blocking task.
    pub fn load(settings: &SimplificationModelConfig, cache_dir: Option<&str>, device: &Device) -> Result<Self> {
        tracing::info!("🚀 Loading simplification model {}...", settings.repo);
        let repo = hub::open_repo(&settings.repo, &settings.revision, cache_dir)?;

        let config = Config::from_json(&hub::load_config_json(&repo)?);
        tracing::info!(
            "Parsed config: vocab_size={}, n_embd={}, n_layer={}, n_positions={}",
            config.vocab_size,
            config.n_embd,
            config.n_layer,
            config.n_positions
        );

        let tokenizer_repo = hub::open_repo(&settings.tokenizer_repo, "main", cache_dir)?;
        let tokenizer = hub::load_tokenizer(&tokenizer_repo, "tokenizer.json")?;

        tracing::info!("Downloading model weights...");
        let weight_files = hub::download_weight_files(&repo)?;
        let vb = hub::load_weights(&weight_files, crate::gpu_detection::model_dtype(device), device)?;

        tracing::info!("Building model graph...");
        let model = Gpt2::load(&config, vb)?;

        tracing::info!("✅ Simplification model {} loaded", settings.repo);
        Ok(Self {
            name: settings.repo.clone(),
            model,
            tokenizer,
            device: device.clone(),
        })
    }

    fn next_token(&self, logits: &[f32], params: &GenerationParams) -> Result<u32> {
        if params.do_sample {
            sample_top_k(logits, params.top_k, params.temperature, &mut rand::rng())
        } else {
            argmax(logits).ok_or_else(|| anyhow::anyhow!("Empty logits"))
        }
    }
}

impl GenerationModel for KeepItSimpleModel {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, false)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    fn bos_token_id(&self) -> u32 {
        self.model.config().bos_token_id
    }

    fn eos_token(&self) -> &str {
        EOS_TOKEN
    }

    fn generate(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<Vec<u32>>> {
        let config = self.model.config();
        let prompt_len = input_ids.len();
        if prompt_len == 0 {
            anyhow::bail!("Cannot generate from an empty prompt");
        }
        let max_new_tokens = new_token_budget(prompt_len, params.max_length, config.n_positions)?;
        let rows = params.num_return_sequences.max(1);

        tracing::debug!(
            "Generating {} candidates: prompt_len={}, max_new_tokens={}",
            rows,
            prompt_len,
            max_new_tokens
        );

        let batch: Vec<u32> = input_ids.repeat(rows);
        let mut input = Tensor::from_vec(batch, (rows, prompt_len), &self.device)?;
        let mut cache = Cache::new(config);
        let mut index_pos = 0;
        let mut candidates = CandidateRows::new(rows, config.eos_token_id);

        for step in 0..max_new_tokens {
            let logits = self.model.forward(&input, index_pos, &mut cache)?;
            index_pos += input.dim(1)?;
            let logits = logits.to_vec2::<f32>()?;

            let next_tokens = candidates.advance(|row| self.next_token(&logits[row], params))?;
            if candidates.all_finished() {
                tracing::debug!("All candidates finished at step {}", step);
                break;
            }
            input = Tensor::from_vec(next_tokens, (rows, 1), &self.device)?;
        }

        Ok(candidates.into_sequences())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Progress of each row in a batched generation. A row that produced EOS
/// keeps feeding EOS to the model but never grows again.
struct CandidateRows {
    sequences: Vec<Vec<u32>>,
    finished: Vec<bool>,
    eos_token_id: u32,
}

impl CandidateRows {
    fn new(rows: usize, eos_token_id: u32) -> Self {
        Self {
            sequences: vec![Vec::new(); rows],
            finished: vec![false; rows],
            eos_token_id,
        }
    }

    /// Records one step. `pick` is only asked about unfinished rows; the
    /// returned tokens are the next model input, one per row.
    fn advance(&mut self, mut pick: impl FnMut(usize) -> Result<u32>) -> Result<Vec<u32>> {
        let mut next_tokens = Vec::with_capacity(self.sequences.len());
        for row in 0..self.sequences.len() {
            if self.finished[row] {
                next_tokens.push(self.eos_token_id);
                continue;
            }
            let token = pick(row)?;
            if token == self.eos_token_id {
                self.finished[row] = true;
            } else {
                self.sequences[row].push(token);
            }
            next_tokens.push(token);
        }
        Ok(next_tokens)
    }

    fn all_finished(&self) -> bool {
        self.finished.iter().all(|done| *done)
    }

    fn into_sequences(self) -> Vec<Vec<u32>> {
        self.sequences
    }
}

/// New tokens allowed when the whole sequence is capped at `max_length`.
/// At least one token is produced, and the context window is never exceeded.
pub fn new_token_budget(prompt_len: usize, max_length: usize, n_positions: usize) -> Result<usize> {
    if prompt_len >= n_positions {
        anyhow::bail!(
            "Input of {} tokens exceeds the model context of {}",
            prompt_len,
            n_positions
        );
    }
    let requested = max_length.saturating_sub(prompt_len).max(1);
    Ok(requested.min(n_positions - prompt_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{VarBuilder, VarMap};
    use std::str::FromStr;

    const EOS: u32 = 10;

    fn tiny_config(n_positions: usize) -> Config {
        Config {
            vocab_size: 11,
            n_positions,
            n_embd: 8,
            n_layer: 2,
            n_head: 2,
            n_inner: None,
            layer_norm_epsilon: 1e-5,
            bos_token_id: EOS,
            eos_token_id: EOS,
        }
    }

    fn word_tokenizer() -> Tokenizer {
        let mut vocab = serde_json::Map::new();
        for id in 0..EOS {
            vocab.insert(format!("w{id}"), serde_json::json!(id));
        }
        vocab.insert(EOS_TOKEN.to_string(), serde_json::json!(EOS));
        let tokenizer = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": { "type": "WhitespaceSplit" },
            "post_processor": null,
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "w0" }
        });
        Tokenizer::from_str(&tokenizer.to_string()).unwrap()
    }

    /// Random weights. With `always_eos`, the final layer norm maps every
    /// position to the same vector and only the EOS embedding scores it.
    fn tiny_model(n_positions: usize, always_eos: bool) -> KeepItSimpleModel {
        let config = tiny_config(n_positions);
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Gpt2::load(&config, vb).unwrap();

        if always_eos {
            let (vocab, dim) = (config.vocab_size, config.n_embd);
            let mut direction = vec![0f32; dim];
            direction[0] = 1.0;
            let mut embeddings = vec![0f32; vocab * dim];
            embeddings[EOS as usize * dim] = 100.0;

            varmap
                .set_one("ln_f.weight", Tensor::zeros(dim, DType::F32, &Device::Cpu).unwrap())
                .unwrap();
            varmap
                .set_one("ln_f.bias", Tensor::from_vec(direction, dim, &Device::Cpu).unwrap())
                .unwrap();
            varmap
                .set_one("wte.weight", Tensor::from_vec(embeddings, (vocab, dim), &Device::Cpu).unwrap())
                .unwrap();
        }

        KeepItSimpleModel {
            name: "test/gpt2".to_string(),
            model,
            tokenizer: word_tokenizer(),
            device: Device::Cpu,
        }
    }

    fn sampled(max_length: usize) -> GenerationParams {
        GenerationParams {
            max_length,
            num_return_sequences: 4,
            do_sample: true,
            top_k: 50,
            temperature: 1.0,
        }
    }

    #[test]
    fn test_generate_returns_one_row_per_candidate_within_budget() {
        let model = tiny_model(16, false);
        let rows = model.generate(&[1, 2, 3, EOS], &sampled(12)).unwrap();

        assert_eq!(rows.len(), 4);
        for row in &rows {
            assert!(row.len() <= 8);
            assert!(!row.contains(&EOS));
        }
    }

    #[test]
    fn test_generate_stops_at_context_window() {
        let model = tiny_model(16, false);

        let prompt: Vec<u32> = (0..15).map(|i| i % 10).collect();
        let rows = model.generate(&prompt, &sampled(2500)).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|row| row.len() <= 1));

        let prompt: Vec<u32> = (0..16).map(|i| i % 10).collect();
        assert!(model.generate(&prompt, &sampled(2500)).is_err());
    }

    #[test]
    fn test_generate_rows_end_at_eos() {
        let model = tiny_model(16, true);

        let rows = model.generate(&[1, 2, 3, EOS], &sampled(12)).unwrap();
        assert_eq!(rows, vec![Vec::<u32>::new(); 4]);

        let greedy = GenerationParams {
            do_sample: false,
            ..sampled(12)
        };
        assert_eq!(model.generate(&[1, EOS], &greedy).unwrap(), vec![Vec::<u32>::new(); 4]);
    }

    #[test]
    fn test_finished_rows_stop_growing() {
        let mut candidates = CandidateRows::new(2, EOS);

        let fed = candidates.advance(|row| Ok(if row == 0 { 1 } else { EOS })).unwrap();
        assert_eq!(fed, vec![1, EOS]);
        assert!(!candidates.all_finished());

        let fed = candidates
            .advance(|row| {
                assert_eq!(row, 0, "finished row was asked for a token");
                Ok(2)
            })
            .unwrap();
        assert_eq!(fed, vec![2, EOS]);

        candidates.advance(|_| Ok(EOS)).unwrap();
        assert!(candidates.all_finished());
        assert_eq!(candidates.into_sequences(), vec![vec![1, 2], vec![]]);
    }

    #[test]
    fn test_tokenizer_round_trip_keeps_eos_text() {
        let model = tiny_model(16, false);
        let ids = model.encode("w1 w2").unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert!(model.decode(&[1, EOS]).unwrap().contains(EOS_TOKEN));
    }

    #[test]
    fn test_budget_caps_total_length() {
        // 10 prompt tokens, 50 characters of input
        assert_eq!(new_token_budget(10, 50, 1024).unwrap(), 40);
    }

    #[test]
    fn test_budget_generates_at_least_one_token() {
        assert_eq!(new_token_budget(10, 5, 1024).unwrap(), 1);
        assert_eq!(new_token_budget(10, 0, 1024).unwrap(), 1);
    }

    #[test]
    fn test_budget_respects_context_window() {
        assert_eq!(new_token_budget(1000, 2500, 1024).unwrap(), 24);
        assert!(new_token_budget(1024, 2500, 1024).is_err());
    }
}
