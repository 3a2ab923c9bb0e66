use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub models: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hugging Face cache location; `None` keeps the hub default.
    pub cache_dir: Option<String>,
    pub translation: TranslationModelConfig,
    pub simplification: SimplificationModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationModelConfig {
    pub repo: String,
    pub revision: String,
    /// Prepared `tokenizer.json`, as a local path or a file name inside
    /// `repo`. `None` builds the tokenizer from `source.spm` and `vocab.json`.
    pub source_tokenizer: Option<String>,
    /// Same as `source_tokenizer`, falling back to `target.spm`.
    pub target_tokenizer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplificationModelConfig {
    pub repo: String,
    pub revision: String,
    // keep_it_simple is a gpt2-medium fine-tune and shares its vocabulary
    pub tokenizer_repo: String,
}

pub const DEFAULT_TRANSLATION_MODEL: &str = "Helsinki-NLP/opus-mt-en-el";
pub const DEFAULT_SIMPLIFICATION_MODEL: &str = "philippelaban/keep_it_simple";
pub const DEFAULT_SIMPLIFICATION_TOKENIZER: &str = "openai-community/gpt2-medium";

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "80".to_string())
                    .parse()
                    .unwrap_or(80),
                log_level: var_or("LOG_LEVEL", "info"),
            },
            models: ModelConfig {
                cache_dir: optional_var("MODEL_CACHE_DIR"),
                translation: TranslationModelConfig {
                    repo: var_or("TRANSLATION_MODEL", DEFAULT_TRANSLATION_MODEL),
                    revision: var_or("TRANSLATION_REVISION", "main"),
                    source_tokenizer: optional_var("TRANSLATION_SOURCE_TOKENIZER"),
                    target_tokenizer: optional_var("TRANSLATION_TARGET_TOKENIZER"),
                },
                simplification: SimplificationModelConfig {
                    repo: var_or("SIMPLIFICATION_MODEL", DEFAULT_SIMPLIFICATION_MODEL),
                    revision: var_or("SIMPLIFICATION_REVISION", "main"),
                    tokenizer_repo: var_or(
                        "SIMPLIFICATION_TOKENIZER_MODEL",
                        DEFAULT_SIMPLIFICATION_TOKENIZER,
                    ),
                },
            },
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::default();
        if config.models.translation.repo.trim().is_empty() {
            anyhow::bail!("TRANSLATION_MODEL must not be empty");
        }
        if config.models.simplification.repo.trim().is_empty() {
            anyhow::bail!("SIMPLIFICATION_MODEL must not be empty");
        }
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.server
            .log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
