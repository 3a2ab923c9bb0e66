pub mod api;
pub mod config;
pub mod error;
pub mod gpu_detection;
pub mod models;
pub mod nlp;

pub use config::Config;
pub use error::{Error, Result};
pub use nlp::{NlpService, Operation};
