//! The uniform `{status_code, data}` envelope returned by every operation

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};

/// Result of one dispatched operation, successful or not
///
/// `data` is a resolved-fields object, a list of them, a form error map or
/// form metadata. Errors recovered at the transport boundary produce the
/// same shape through [`ApiError::get_context`](crate::core::error::ApiError::get_context).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status_code: u16,
    pub data: Value,
}

impl Envelope {
    pub fn new(status: StatusCode, data: impl Into<Value>) -> Self {
        Self {
            status_code: status.as_u16(),
            data: data.into(),
        }
    }

    pub fn ok(data: impl Into<Value>) -> Self {
        Self::new(StatusCode::OK, data)
    }

    pub fn created(data: impl Into<Value>) -> Self {
        Self::new(StatusCode::CREATED, data)
    }

    pub fn bad_request(data: impl Into<Value>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, data)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "data": self.data }))).into_response()
    }
}
