//! HTTP error mapping.
//!
//! Every failure leaves the service as
//! `{"error": {"code": "<snake_case>", "message": "<text>"}}` with a status
//! derived from the error kind.

use crate::error::DocConvError;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    Core(DocConvError),
    /// The multipart body could not be read (malformed, or over the size limit).
    Multipart(MultipartError),
    /// The JSON body could not be parsed.
    Json(JsonRejection),
}

impl From<DocConvError> for ApiError {
    fn from(err: DocConvError) -> Self {
        ApiError::Core(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::Json(err)
    }
}

/// HTTP status for a library error.
pub fn status_for(err: &DocConvError) -> StatusCode {
    match err {
        DocConvError::Validation(_)
        | DocConvError::MissingArtifact { .. }
        | DocConvError::NoChunks { .. } => StatusCode::BAD_REQUEST,
        DocConvError::AlreadyAssembled { .. } => StatusCode::CONFLICT,
        DocConvError::Storage { .. }
        | DocConvError::Unavailable { .. }
        | DocConvError::Rasterization(_)
        | DocConvError::Conversion(_)
        | DocConvError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Core(err) => (status_for(err), err.code(), err.to_string()),
            ApiError::Multipart(err) => {
                let status = err.status();
                let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "payload_too_large"
                } else {
                    "invalid_multipart"
                };
                (status, code, format!("Multipart error: {}", err.body_text()))
            }
            ApiError::Json(err) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("Invalid JSON body: {}", err.body_text()),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            error!("{} ({}): {}", status, code, message);
        } else {
            debug!("{} ({}): {}", status, code, message);
        }

        let body = Json(serde_json::json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_for(&DocConvError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DocConvError::MissingArtifact { key: "k".into() }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DocConvError::NoChunks {
                upload_id: "u".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DocConvError::AlreadyAssembled {
                upload_id: "u".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&DocConvError::Unavailable {
                tool: "pdftoppm".into(),
                hint: String::new()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn body_shape() {
        let resp = ApiError::from(DocConvError::NoChunks {
            upload_id: "abc".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "no_chunks");
        assert!(json["error"]["message"].as_str().unwrap().contains("abc"));
    }
}
