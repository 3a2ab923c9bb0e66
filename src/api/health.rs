use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};

use crate::{api::AppState, nlp::Operation};

pub async fn health_check(State(service): State<AppState>) -> (StatusCode, Json<Value>) {
    let response = json!({
        "status": "healthy",
        "service": "nlp-service",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": {
            "translate": service.model_name(Operation::Translate),
            "simplify": service.model_name(Operation::Simplify),
        }
    });

    (StatusCode::OK, Json(response))
}
