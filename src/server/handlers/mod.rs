//! HTTP handlers for the server.
//!
//! Every response is JSON with a `success` flag. Failures carry the error
//! text and its kind; the status code follows the kind.

pub mod job;
pub mod printer;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::error::{PreconditionError, SlicerError, VinciError};

/// A failed request.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "request",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: message.into(),
        }
    }
}

/// Status code for an error kind.
pub fn status_for(err: &VinciError) -> StatusCode {
    match err {
        VinciError::Precondition(_) => StatusCode::CONFLICT,
        VinciError::Conversion(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VinciError::Slicer(SlicerError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        VinciError::Slicer(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VinciError::Transport(_)
        | VinciError::Protocol(_)
        | VinciError::Upload(_)
        | VinciError::Connect(_) => StatusCode::BAD_GATEWAY,
        VinciError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<VinciError> for ApiError {
    fn from(err: VinciError) -> Self {
        Self {
            status: status_for(&err),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<PreconditionError> for ApiError {
    fn from(err: PreconditionError) -> Self {
        VinciError::from(err).into()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("Task error: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "kind": self.kind, "error": self.message })),
        )
            .into_response()
    }
}

/// `{"success": true, ...fields}`
pub fn success(fields: Value) -> Json<Value> {
    let mut body = json!({ "success": true });
    if let (Some(body), Value::Object(fields)) = (body.as_object_mut(), fields) {
        body.extend(fields);
    }
    Json(body)
}
