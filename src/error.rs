use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

/// Request-path failures. Every variant is reported to the caller through the
/// standard envelope; none of them is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot retrieve parameter {0} from json")]
    MissingParameter(&'static str),

    #[error("Parameter {0} must be a string")]
    InvalidParameter(&'static str),

    #[error("Unrecognized proccess: {0}")]
    UnrecognizedProcess(String),

    #[error("Text too big for simplification. Proccess aborted")]
    TextTooBig,

    #[error("Could not translate provided text with error {0}")]
    Translation(String),

    #[error("Could not simplify provided text with error {0}")]
    Generation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // The envelope carries the failure, so the status stays 200.
        let body = Json(json!({
            "error": true,
            "message": self.to_string(),
        }));
        (StatusCode::OK, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_match_wire_format() {
        assert_eq!(
            Error::MissingParameter("proccess").to_string(),
            "Cannot retrieve parameter proccess from json"
        );
        assert_eq!(
            Error::UnrecognizedProcess("summarize".to_string()).to_string(),
            "Unrecognized proccess: summarize"
        );
        assert_eq!(
            Error::TextTooBig.to_string(),
            "Text too big for simplification. Proccess aborted"
        );
        assert_eq!(
            Error::Translation("boom".to_string()).to_string(),
            "Could not translate provided text with error boom"
        );
    }

    #[tokio::test]
    async fn test_error_response_is_failure_envelope() {
        let response = Error::TextTooBig.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            json!({ "error": true, "message": "Text too big for simplification. Proccess aborted" })
        );
    }
}
