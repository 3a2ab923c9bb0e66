// API STRUCTURE:
// - POST /process-text: translate or simplify text (process.rs)
// - GET  /health: liveness and loaded model names (health.rs)

pub mod health;
pub mod process;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::nlp::NlpService;

pub type AppState = Arc<NlpService>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/process-text", post(process::process_text))
        .with_state(state)
}
