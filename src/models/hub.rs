// Hugging Face hub helpers shared by the model loaders: repository handles,
// file resolution, weight discovery and VarBuilder construction.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use hf_hub::{
    Repo, RepoType,
    api::sync::{ApiBuilder, ApiRepo},
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

/// Open `repo_id` at `revision`, honouring an optional cache directory.
pub fn open_repo(repo_id: &str, revision: &str, cache_dir: Option<&str>) -> Result<ApiRepo> {
    let mut builder = ApiBuilder::new();
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(PathBuf::from(dir));
    }
    let api = builder.build()?;
    Ok(api.repo(Repo::with_revision(
        repo_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    )))
}

/// A local path wins; anything else is fetched from `repo` by file name.
pub fn resolve_file(repo: &ApiRepo, file: &str) -> Result<PathBuf> {
    let local = Path::new(file);
    if local.is_file() {
        tracing::debug!("Using local file {}", local.display());
        return Ok(local.to_path_buf());
    }
    repo.get(file)
        .map_err(|e| anyhow::anyhow!("Failed to download {}: {}", file, e))
}

pub fn load_tokenizer(repo: &ApiRepo, file: &str) -> Result<Tokenizer> {
    let path = resolve_file(repo, file)?;
    Tokenizer::from_file(&path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", path.display(), e))
}

pub fn load_config_json(repo: &ApiRepo) -> Result<Value> {
    let path = resolve_file(repo, "config.json")?;
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn config_usize(config: &Value, key: &str, default: usize) -> usize {
    config
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub fn config_u32(config: &Value, key: &str, default: u32) -> u32 {
    config
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default)
}

pub fn config_bool(config: &Value, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub fn config_f64(config: &Value, key: &str, default: f64) -> f64 {
    config.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Safetensors first, then PyTorch pickles.
pub fn download_weight_files(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    for filename in ["model.safetensors", "pytorch_model.bin"] {
        match repo.get(filename) {
            Ok(path) => {
                tracing::info!("Found weight file: {}", filename);
                return Ok(vec![path]);
            }
            Err(e) => tracing::debug!("Weight file {} unavailable: {}", filename, e),
        }
    }

    Err(anyhow::anyhow!("No model weight files found"))
}

pub fn load_weights(weight_files: &[PathBuf], dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    let first = weight_files
        .first()
        .ok_or_else(|| anyhow::anyhow!("No model weight files given"))?;

    if first.extension().and_then(|s| s.to_str()) == Some("safetensors") {
        tracing::info!("Loading safetensors weights...");
        // SAFETY: the files come from the hub cache and are not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weight_files, dtype, device)? };
        Ok(vb)
    } else {
        tracing::info!("Loading PyTorch weights...");
        let mut all_tensors: HashMap<String, Tensor> = HashMap::new();
        for weight_file in weight_files {
            all_tensors.extend(candle_core::pickle::read_all(weight_file)?);
        }
        Ok(VarBuilder::from_tensors(all_tensors, dtype, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_accessors_fall_back_to_defaults() {
        let config: Value = serde_json::json!({
            "d_model": 512,
            "scale_embedding": true,
            "layer_norm_epsilon": 1e-5,
            "activation_function": "swish"
        });

        assert_eq!(config_usize(&config, "d_model", 0), 512);
        assert_eq!(config_usize(&config, "missing", 7), 7);
        assert_eq!(config_u32(&config, "activation_function", 3), 3);
        assert!(config_bool(&config, "scale_embedding", false));
        assert_eq!(config_f64(&config, "layer_norm_epsilon", 0.0), 1e-5);
    }
}
