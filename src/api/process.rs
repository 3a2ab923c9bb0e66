use crate::{
    api::AppState,
    error::{Error, Result},
    nlp::Operation,
};
use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

/// Envelope returned for every `/process-text` call.
/// Failures use the same shape without `data`; see `Error::into_response`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessResponse {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ProcessResponse {
    pub fn success(operation: Operation, data: String) -> Self {
        Self {
            error: false,
            message: format!("NLP proccess \"{operation}\" was successful"),
            data: Some(data),
        }
    }
}

/// A validated request. `process` is checked before `text`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    pub operation: Operation,
    pub text: String,
}

impl ProcessRequest {
    /// Both fields are typed strictly.
    ///
    /// A `process` that is present but not a string is echoed back as JSON
    /// in the unrecognized-process message, so `null` reads `null` and `5`
    /// reads `5`. A `text` that is present but not a string is rejected
    /// with `Parameter text must be a string`; it is never stringified.
    pub fn from_json(body: &Value) -> Result<Self> {
        let operation = match body.get("process") {
            None => return Err(Error::MissingParameter("proccess")),
            Some(Value::String(name)) => name.parse::<Operation>()?,
            Some(other) => return Err(Error::UnrecognizedProcess(other.to_string())),
        };

        let text = match body.get("text") {
            None => return Err(Error::MissingParameter("text")),
            Some(Value::String(text)) => text.clone(),
            Some(_) => return Err(Error::InvalidParameter("text")),
        };

        Ok(Self { operation, text })
    }
}

// ENDPOINT: POST /process-text
pub async fn process_text(
    State(service): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<ProcessResponse>> {
    let request_start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let Json(body) = payload.map_err(|rejection| {
        tracing::warn!(request_id = %request_id, "Rejected request body: {}", rejection);
        Error::MissingParameter("proccess")
    })?;

    let request = ProcessRequest::from_json(&body).map_err(|e| {
        tracing::warn!(request_id = %request_id, "Invalid request: {}", e);
        e
    })?;

    tracing::info!(
        request_id = %request_id,
        operation = %request.operation,
        text_length = request.text.chars().count(),
        "Received NLP request"
    );

    let operation = request.operation;
    let data = service.run(operation, request.text).await.map_err(|e| {
        tracing::error!(request_id = %request_id, operation = %operation, "NLP request failed: {}", e);
        e
    })?;

    tracing::info!(
        request_id = %request_id,
        operation = %operation,
        elapsed_ms = request_start.elapsed().as_millis() as u64,
        "NLP request completed"
    );

    Ok(Json(ProcessResponse::success(operation, data)))
}
