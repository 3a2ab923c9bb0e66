// ARCHITECTURE: Marian Translation Model (opus-mt)
//
// Encoder/decoder transformer from candle-transformers. The candle model
// keeps its decoder KV cache inside the struct, so calls are serialised
// through a mutex and the cache is reset before every chunk.
//
// DECODING: `num_beams` and `length_penalty` come from the checkpoint's
// `config.json`. One beam decodes greedily with the KV cache; more beams
// run batched beam search, re-scoring each hypothesis prefix per step
// because the candle cache cannot be reordered between beams.
//
// TOKENIZERS: opus-mt repositories ship `source.spm`, `target.spm` and a
// joint `vocab.json`. Both tokenizers are built from those files unless a
// prepared `tokenizer.json` is configured for a side.

use anyhow::Result;
use candle_core::{D, DType, Device, Tensor};
use candle_nn::Activation;
use candle_transformers::models::marian::{Config, MTModel};
use hf_hub::api::sync::ApiRepo;
use serde_json::Value;
use std::sync::Mutex;
use tokenizers::Tokenizer;

use crate::config::TranslationModelConfig;
use crate::models::beam_search::{BeamSettings, beam_search};
use crate::models::hub;
use crate::models::sampling::argmax_excluding;
use crate::models::sentencepiece;
use crate::models::traits::TranslationModel;

/// Generation settings stored beside the network settings in `config.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodingConfig {
    pub num_beams: usize,
    pub length_penalty: f64,
}

pub struct MarianTranslator {
    name: String,
    model: Mutex<MTModel>,
    source_tokenizer: Tokenizer,
    target_tokenizer: Tokenizer,
    config: Config,
    decoding: DecodingConfig,
    device: Device,
}

impl std::fmt::Debug for MarianTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MarianTranslator({})", self.name)
    }
}

impl MarianTranslator {
    /// Blocking: downloads and maps the weights. Call from a blocking task.
    pub fn load(settings: &TranslationModelConfig, cache_dir: Option<&str>, device: &Device) -> Result<Self> {
        tracing::info!("🚀 Loading translation model {}...", settings.repo);
        let repo = hub::open_repo(&settings.repo, &settings.revision, cache_dir)?;

        let raw_config = hub::load_config_json(&repo)?;
        let config = parse_marian_config(&raw_config);
        let decoding = parse_decoding_config(&raw_config);
        tracing::info!(
            "Parsed config: vocab_size={}, d_model={}, encoder_layers={}, decoder_layers={}, num_beams={}",
            config.vocab_size,
            config.d_model,
            config.encoder_layers,
            config.decoder_layers,
            decoding.num_beams
        );

        let source_tokenizer = load_tokenizer(&repo, settings.source_tokenizer.as_deref(), "source.spm")?;
        let target_tokenizer = load_tokenizer(&repo, settings.target_tokenizer.as_deref(), "target.spm")?;

        tracing::info!("Downloading model weights...");
        let weight_files = hub::download_weight_files(&repo)?;
        // The candle decoder builds its attention mask in F32 on every device.
        let vb = hub::load_weights(&weight_files, DType::F32, device)?;

        tracing::info!("Building model graph...");
        let model = MTModel::new(&config, vb)?;

        tracing::info!("✅ Translation model {} loaded", settings.repo);
        Ok(Self::new(
            settings.repo.clone(),
            model,
            source_tokenizer,
            target_tokenizer,
            config,
            decoding,
            device,
        ))
    }

    fn new(
        name: String,
        model: MTModel,
        source_tokenizer: Tokenizer,
        target_tokenizer: Tokenizer,
        config: Config,
        decoding: DecodingConfig,
        device: &Device,
    ) -> Self {
        Self {
            name,
            model: Mutex::new(model),
            source_tokenizer,
            target_tokenizer,
            config,
            decoding,
            device: device.clone(),
        }
    }

    fn encode_source(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .source_tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        let mut tokens = encoding.get_ids().to_vec();
        tokens.push(self.config.eos_token_id);

        if tokens.len() > self.config.max_position_embeddings {
            anyhow::bail!(
                "Input of {} tokens exceeds the model limit of {}",
                tokens.len(),
                self.config.max_position_embeddings
            );
        }
        Ok(tokens)
    }

    fn is_eos_token(&self, token: u32) -> bool {
        token == self.config.eos_token_id || token == self.config.forced_eos_token_id
    }

    /// Target ids for `text`, decoder start token first. At most
    /// `max_length` positions, further capped by the position table.
    fn decode_ids(&self, text: &str, max_length: usize) -> Result<Vec<u32>> {
        let source = self.encode_source(text)?;
        tracing::debug!("Translating chunk of {} source tokens", source.len());

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("Translation model lock poisoned"))?;
        model.reset_kv_cache();

        let source = Tensor::new(source.as_slice(), &self.device)?.unsqueeze(0)?;
        let encoder_xs = model.encoder().forward(&source, 0)?;

        let max_positions = max_length.min(self.config.max_position_embeddings);
        if self.decoding.num_beams > 1 {
            self.beam_decode(&mut model, &encoder_xs, max_positions)
        } else {
            self.greedy_decode(&mut model, &encoder_xs, max_positions)
        }
    }

    fn greedy_decode(&self, model: &mut MTModel, encoder_xs: &Tensor, max_positions: usize) -> Result<Vec<u32>> {
        let mut token_ids = vec![self.config.decoder_start_token_id];
        for step in 0..max_positions.saturating_sub(1) {
            // The first step feeds the start token; later steps feed only the newest token.
            let context_size = if step >= 1 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;

            let logits = model.decode(&input_ids, encoder_xs, start_pos)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let logits = logits.to_dtype(DType::F32)?.to_vec1::<f32>()?;

            let token = argmax_excluding(&logits, self.config.pad_token_id)
                .ok_or_else(|| anyhow::anyhow!("Empty logits at step {}", step))?;
            token_ids.push(token);
            if self.is_eos_token(token) {
                break;
            }
        }
        Ok(token_ids)
    }

    fn beam_decode(&self, model: &mut MTModel, encoder_xs: &Tensor, max_positions: usize) -> Result<Vec<u32>> {
        let settings = BeamSettings {
            num_beams: self.decoding.num_beams,
            max_positions,
            start_token: self.config.decoder_start_token_id,
            eos_tokens: vec![self.config.eos_token_id, self.config.forced_eos_token_id],
            banned_token: self.config.pad_token_id,
            length_penalty: self.decoding.length_penalty,
        };

        beam_search(&settings, |prefixes| {
            model.reset_kv_cache();
            let rows = prefixes.len();
            let len = prefixes[0].len();

            let input_ids = Tensor::from_vec(prefixes.concat(), (rows, len), &self.device)?;
            let encoder_xs = encoder_xs.repeat((rows, 1, 1))?;
            let logits = model.decode(&input_ids, &encoder_xs, 0)?;

            let last = logits.narrow(1, len - 1, 1)?.squeeze(1)?.to_dtype(DType::F32)?;
            Ok(candle_nn::ops::log_softmax(&last, D::Minus1)?.to_vec2::<f32>()?)
        })
    }
}

impl TranslationModel for MarianTranslator {
    fn translate(&self, text: &str, max_length: usize) -> Result<String> {
        let token_ids = self.decode_ids(text, max_length)?;
        self.target_tokenizer
            .decode(&token_ids, true)
            .map(|text| text.trim().to_string())
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn load_tokenizer(repo: &ApiRepo, prepared: Option<&str>, spm_file: &str) -> Result<Tokenizer> {
    if let Some(file) = prepared {
        return hub::load_tokenizer(repo, file);
    }
    let scores = sentencepiece::read_piece_scores(&hub::resolve_file(repo, spm_file)?)?;
    let vocab = sentencepiece::read_vocab(&hub::resolve_file(repo, "vocab.json")?)?;
    tracing::info!(
        "Building tokenizer from {}: {} pieces, {} vocabulary ids",
        spm_file,
        scores.len(),
        vocab.len()
    );
    sentencepiece::marian_tokenizer(&scores, &vocab)
}

fn parse_activation(name: Option<&str>) -> Activation {
    match name {
        Some("gelu") => Activation::Gelu,
        Some("gelu_new") => Activation::NewGelu,
        Some("relu") => Activation::Relu,
        Some("silu") => Activation::Silu,
        _ => Activation::Swish,
    }
}

fn parse_decoding_config(config: &Value) -> DecodingConfig {
    DecodingConfig {
        num_beams: hub::config_usize(config, "num_beams", 1).max(1),
        length_penalty: hub::config_f64(config, "length_penalty", 1.0),
    }
}

/// opus-mt configs predate several newer fields, so every key has a default.
fn parse_marian_config(config: &Value) -> Config {
    let vocab_size = hub::config_usize(config, "vocab_size", 58101);
    let pad_token_id = hub::config_u32(config, "pad_token_id", vocab_size.saturating_sub(1) as u32);
    let eos_token_id = hub::config_u32(config, "eos_token_id", 0);

    Config {
        vocab_size,
        decoder_vocab_size: config
            .get("decoder_vocab_size")
            .and_then(Value::as_u64)
            .map(|v| v as usize),
        max_position_embeddings: hub::config_usize(config, "max_position_embeddings", 512),
        encoder_layers: hub::config_usize(config, "encoder_layers", 6),
        encoder_ffn_dim: hub::config_usize(config, "encoder_ffn_dim", 2048),
        encoder_attention_heads: hub::config_usize(config, "encoder_attention_heads", 8),
        decoder_layers: hub::config_usize(config, "decoder_layers", 6),
        decoder_ffn_dim: hub::config_usize(config, "decoder_ffn_dim", 2048),
        decoder_attention_heads: hub::config_usize(config, "decoder_attention_heads", 8),
        use_cache: hub::config_bool(config, "use_cache", true),
        is_encoder_decoder: hub::config_bool(config, "is_encoder_decoder", true),
        activation_function: parse_activation(
            config.get("activation_function").and_then(Value::as_str),
        ),
        d_model: hub::config_usize(config, "d_model", 512),
        decoder_start_token_id: hub::config_u32(config, "decoder_start_token_id", pad_token_id),
        scale_embedding: hub::config_bool(config, "scale_embedding", true),
        pad_token_id,
        eos_token_id,
        forced_eos_token_id: hub::config_u32(config, "forced_eos_token_id", eos_token_id),
        share_encoder_decoder_embeddings: hub::config_bool(
            config,
            "share_encoder_decoder_embeddings",
            true,
        ),
    }
}
