// ARCHITECTURE: Operation Dispatch
//
// `process` names one operation from a closed set. Each operation maps to a
// handler object built once at startup; the dispatcher never consults global
// state.

pub mod simplifier;
pub mod translator;

pub use simplifier::Simplifier;
pub use translator::Translator;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::LoadedModels;

/// Text-to-text handler behind one operation.
#[async_trait]
pub trait TextProcessor: Send + Sync {
    async fn process(&self, text: String) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Translate,
    Simplify,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Translate, Operation::Simplify];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Translate => "translate",
            Operation::Simplify => "simplify",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == value)
            .ok_or_else(|| Error::UnrecognizedProcess(value.to_string()))
    }
}

/// Handler table plus the model names reported by the health endpoint.
pub struct NlpService {
    translator: Arc<dyn TextProcessor>,
    simplifier: Arc<dyn TextProcessor>,
    translation_model: String,
    simplification_model: String,
}

impl NlpService {
    pub fn new(translator: Translator, simplifier: Simplifier) -> Self {
        Self {
            translation_model: translator.model_name().to_string(),
            simplification_model: simplifier.model_name().to_string(),
            translator: Arc::new(translator),
            simplifier: Arc::new(simplifier),
        }
    }

    pub fn from_models(models: LoadedModels) -> Self {
        Self::new(
            Translator::new(models.translator),
            Simplifier::new(models.generator),
        )
    }

    pub fn handler(&self, operation: Operation) -> &dyn TextProcessor {
        match operation {
            Operation::Translate => self.translator.as_ref(),
            Operation::Simplify => self.simplifier.as_ref(),
        }
    }

    pub async fn run(&self, operation: Operation, text: String) -> Result<String> {
        self.handler(operation).process(text).await
    }

    pub fn model_name(&self, operation: Operation) -> &str {
        match operation {
            Operation::Translate => &self.translation_model,
            Operation::Simplify => &self.simplification_model,
        }
    }
}
