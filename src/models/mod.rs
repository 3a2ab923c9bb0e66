pub mod beam_search;
pub mod gpt2;
pub mod hub;
pub mod keep_it_simple;
pub mod marian;
pub mod sampling;
pub mod sentencepiece;
pub mod traits;

pub use keep_it_simple::KeepItSimpleModel;
pub use marian::MarianTranslator;
pub use traits::{GenerationModel, GenerationParams, TranslationModel};

use anyhow::Result;
use candle_core::Device;
use std::sync::Arc;

use crate::config::ModelConfig;

/// The two models the service needs, ready to be shared across requests.
pub struct LoadedModels {
    pub translator: Arc<dyn TranslationModel>,
    pub generator: Arc<dyn GenerationModel>,
}

/// Load both models on the blocking pool. Called once at startup.
pub async fn load_models(config: &ModelConfig, device: &Device) -> Result<LoadedModels> {
    let translation = config.translation.clone();
    let simplification = config.simplification.clone();
    let cache_dir = config.cache_dir.clone();

    let translator_device = device.clone();
    let translator_cache = cache_dir.clone();
    let translator = tokio::task::spawn_blocking(move || {
        MarianTranslator::load(&translation, translator_cache.as_deref(), &translator_device)
    });

    let generator_device = device.clone();
    let generator = tokio::task::spawn_blocking(move || {
        KeepItSimpleModel::load(&simplification, cache_dir.as_deref(), &generator_device)
    });

    let translator = translator.await??;
    let generator = generator.await??;

    Ok(LoadedModels {
        translator: Arc::new(translator),
        generator: Arc::new(generator),
    })
}
