// GPT-2 causal language model on candle_nn.
//
// Checkpoints store the attention and MLP projections as `Conv1D` weights of
// shape (in, out), the transpose of `nn.Linear`. The KV cache lives outside
// the model, so one loaded network serves concurrent generations.

use candle_core::{D, DType, Device, Module, Result, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use serde_json::Value;

use crate::models::hub;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_inner: Option<usize>,
    pub layer_norm_epsilon: f64,
    pub bos_token_id: u32,
    pub eos_token_id: u32,
}

impl Config {
    /// Read a Hugging Face `config.json`; missing keys take gpt2-medium values.
    pub fn from_json(config: &Value) -> Self {
        Self {
            vocab_size: hub::config_usize(config, "vocab_size", 50257),
            n_positions: hub::config_usize(config, "n_positions", 1024),
            n_embd: hub::config_usize(config, "n_embd", 1024),
            n_layer: hub::config_usize(config, "n_layer", 24),
            n_head: hub::config_usize(config, "n_head", 16),
            n_inner: config.get("n_inner").and_then(Value::as_u64).map(|v| v as usize),
            layer_norm_epsilon: hub::config_f64(config, "layer_norm_epsilon", 1e-5),
            bos_token_id: hub::config_u32(config, "bos_token_id", 50256),
            eos_token_id: hub::config_u32(config, "eos_token_id", 50256),
        }
    }

    fn inner_dim(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }
}

#[derive(Debug, Clone)]
struct Conv1D {
    weight: Tensor,
    bias: Tensor,
}

impl Conv1D {
    fn load(n_in: usize, n_out: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get((n_in, n_out), "weight")?;
        let bias = vb.get(n_out, "bias")?;
        Ok(Self { weight, bias })
    }
}

impl Module for Conv1D {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.broadcast_matmul(&self.weight)?.broadcast_add(&self.bias)
    }
}

/// Per-call key/value cache, one slot per layer.
#[derive(Debug, Clone)]
pub struct Cache {
    layers: Vec<Option<(Tensor, Tensor)>>,
}

impl Cache {
    pub fn new(config: &Config) -> Self {
        Self {
            layers: vec![None; config.n_layer],
        }
    }
}

#[derive(Debug, Clone)]
struct Attention {
    c_attn: Conv1D,
    c_proj: Conv1D,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn load(config: &Config, vb: VarBuilder) -> Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            c_attn: Conv1D::load(n_embd, 3 * n_embd, vb.pp("c_attn"))?,
            c_proj: Conv1D::load(n_embd, n_embd, vb.pp("c_proj"))?,
            n_head: config.n_head,
            head_dim: n_embd / config.n_head,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        xs.reshape((b, t, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor, index_pos: usize, cache: &mut Option<(Tensor, Tensor)>) -> Result<Tensor> {
        let (b, t, c) = xs.dims3()?;
        let qkv = self.c_attn.forward(xs)?;
        let q = self.split_heads(&qkv.narrow(2, 0, c)?)?;
        let mut k = self.split_heads(&qkv.narrow(2, c, c)?)?;
        let mut v = self.split_heads(&qkv.narrow(2, 2 * c, c)?)?;

        if let Some((past_k, past_v)) = cache.take() {
            k = Tensor::cat(&[&past_k, &k], 2)?;
            v = Tensor::cat(&[&past_v, &v], 2)?;
        }
        *cache = Some((k.clone(), v.clone()));

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let mut att = (q.matmul(&k.t()?)? * scale)?;
        if t > 1 {
            let kv_len = k.dim(2)?;
            let mask = causal_mask(t, kv_len, index_pos, xs.device())?;
            let neg_inf = Tensor::new(f32::NEG_INFINITY, xs.device())?
                .to_dtype(att.dtype())?
                .broadcast_as(att.shape())?;
            att = mask.broadcast_as(att.shape())?.where_cond(&neg_inf, &att)?;
        }
        let att = candle_nn::ops::softmax(&att, D::Minus1)?;

        let ys = att
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, c))?;
        self.c_proj.forward(&ys)
    }
}

/// 1 where query `i` (absolute position `index_pos + i`) must not see key `j`.
fn causal_mask(t: usize, kv_len: usize, index_pos: usize, device: &Device) -> Result<Tensor> {
    let mask: Vec<u8> = (0..t)
        .flat_map(|i| (0..kv_len).map(move |j| u8::from(j > index_pos + i)))
        .collect();
    Tensor::from_slice(&mask, (t, kv_len), device)
}

#[derive(Debug, Clone)]
struct Mlp {
    c_fc: Conv1D,
    c_proj: Conv1D,
}

impl Mlp {
    fn load(config: &Config, vb: VarBuilder) -> Result<Self> {
        let inner = config.inner_dim();
        Ok(Self {
            c_fc: Conv1D::load(config.n_embd, inner, vb.pp("c_fc"))?,
            c_proj: Conv1D::load(inner, config.n_embd, vb.pp("c_proj"))?,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // gelu_new: tanh approximation
        self.c_proj.forward(&self.c_fc.forward(xs)?.gelu()?)
    }
}

#[derive(Debug, Clone)]
struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(config: &Config, vb: VarBuilder) -> Result<Self> {
        let eps = config.layer_norm_epsilon;
        Ok(Self {
            ln_1: candle_nn::layer_norm(config.n_embd, eps, vb.pp("ln_1"))?,
            attn: Attention::load(config, vb.pp("attn"))?,
            ln_2: candle_nn::layer_norm(config.n_embd, eps, vb.pp("ln_2"))?,
            mlp: Mlp::load(config, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, xs: &Tensor, index_pos: usize, cache: &mut Option<(Tensor, Tensor)>) -> Result<Tensor> {
        let residual = xs;
        let xs = (self.attn.forward(&self.ln_1.forward(xs)?, index_pos, cache)? + residual)?;
        let residual = &xs;
        self.mlp.forward(&self.ln_2.forward(&xs)?)? + residual
    }
}

#[derive(Debug, Clone)]
pub struct Gpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    config: Config,
}

impl Gpt2 {
    pub fn load(config: &Config, vb: VarBuilder) -> Result<Self> {
        // GPT2LMHeadModel checkpoints nest the body under `transformer`.
        let vb_t = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb.clone()
        };

        let wte = candle_nn::embedding(config.vocab_size, config.n_embd, vb_t.pp("wte"))?;
        let wpe = candle_nn::embedding(config.n_positions, config.n_embd, vb_t.pp("wpe"))?;
        let blocks = (0..config.n_layer)
            .map(|i| Block::load(config, vb_t.pp(format!("h.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = candle_nn::layer_norm(config.n_embd, config.layer_norm_epsilon, vb_t.pp("ln_f"))?;
        // Tied with the token embedding.
        let lm_head = Linear::new(wte.embeddings().clone(), None);

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Logits of the last position for every row: (batch, vocab).
    pub fn forward(&self, input_ids: &Tensor, index_pos: usize, cache: &mut Cache) -> Result<Tensor> {
        let (_, t) = input_ids.dims2()?;
        let positions = Tensor::arange(index_pos as u32, (index_pos + t) as u32, input_ids.device())?
            .unsqueeze(0)?;

        let mut xs = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;
        for (block, slot) in self.blocks.iter().zip(cache.layers.iter_mut()) {
            xs = block.forward(&xs, index_pos, slot)?;
        }

        let xs = self.ln_f.forward(&xs)?;
        let last = xs.narrow(1, t - 1, 1)?.squeeze(1)?;
        self.lm_head.forward(&last)?.to_dtype(DType::F32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tiny_config() -> Config {
        Config {
            vocab_size: 11,
            n_positions: 16,
            n_embd: 8,
            n_layer: 2,
            n_head: 2,
            n_inner: None,
            layer_norm_epsilon: 1e-5,
            bos_token_id: 10,
            eos_token_id: 10,
        }
    }

    fn tiny_model(config: &Config) -> Gpt2 {
        // Freshly initialised variables are enough to exercise shapes.
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Gpt2::load(config, vb).expect("tiny model builds")
    }

    #[test]
    fn test_missing_weights_fail_to_load() {
        let vb = VarBuilder::from_tensors(HashMap::new(), DType::F32, &Device::Cpu);
        assert!(Gpt2::load(&tiny_config(), vb).is_err());
    }

    #[test]
    fn test_config_defaults_match_gpt2_medium() {
        let config = Config::from_json(&serde_json::json!({}));
        assert_eq!(config.n_embd, 1024);
        assert_eq!(config.n_layer, 24);
        assert_eq!(config.eos_token_id, 50256);
        assert_eq!(config.inner_dim(), 4096);
    }

    #[test]
    fn test_causal_mask_respects_offset() {
        let mask = causal_mask(2, 3, 0, &Device::Cpu).unwrap();
        assert_eq!(mask.to_vec2::<u8>().unwrap(), vec![vec![0, 1, 1], vec![0, 0, 1]]);

        let mask = causal_mask(1, 3, 2, &Device::Cpu).unwrap();
        assert_eq!(mask.to_vec2::<u8>().unwrap(), vec![vec![0, 0, 0]]);
    }

    #[test]
    fn test_forward_with_cache_yields_batch_logits() {
        let config = tiny_config();
        let model = tiny_model(&config);
        let mut cache = Cache::new(&config);

        let prompt = Tensor::new(&[[1u32, 2, 3], [1, 2, 3]], &Device::Cpu).unwrap();
        let logits = model.forward(&prompt, 0, &mut cache).unwrap();
        assert_eq!(logits.dims(), &[2, config.vocab_size]);

        let next = Tensor::new(&[[4u32], [5]], &Device::Cpu).unwrap();
        let logits = model.forward(&next, 3, &mut cache).unwrap();
        assert_eq!(logits.dims(), &[2, config.vocab_size]);
    }
}
