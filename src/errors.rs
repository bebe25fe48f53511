use crate::services::{signing::SigningError, version_store::StorageError};
use axum::{
    Json,
    extract::rejection::{PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// The single adapter between domain errors and the wire error schema.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Overrides the reason derived from `status`.
    pub reason: Option<&'static str>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn reason(&self) -> &'static str {
        self.reason.unwrap_or_else(|| reason_for(self.status))
    }
}

fn reason_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "invalid",
        401 => "required",
        403 => "forbidden",
        404 => "notFound",
        405 => "methodNotAllowed",
        409 => "conflict",
        412 => "conditionNotMet",
        413 => "uploadTooLarge",
        _ => "backendError",
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let reason = self.reason();
        let body = Json(json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message,
                "errors": [{
                    "message": self.message,
                    "domain": "global",
                    "reason": reason,
                }],
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::BucketNotFound(_)
            | StorageError::ObjectNotFound { .. }
            | StorageError::VersionNotFound { .. }
            | StorageError::SessionNotFound(_) => AppError::not_found(err.to_string()),
            StorageError::BucketAlreadyExists(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string()).with_reason("alreadyExists")
            }
            StorageError::Conflict(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            StorageError::InvalidBucketName { .. }
            | StorageError::InvalidObjectName(_)
            | StorageError::InvalidArgument(_) => AppError::bad_request(err.to_string()),
            StorageError::PreconditionFailed(_) => {
                AppError::new(StatusCode::PRECONDITION_FAILED, err.to_string())
            }
            StorageError::Sqlx(_) | StorageError::Io(_) => {
                tracing::error!("storage backend failure: {}", err);
                AppError::internal(err.to_string())
            }
        }
    }
}

impl From<SigningError> for AppError {
    fn from(err: SigningError) -> Self {
        match &err {
            SigningError::Expired => AppError::bad_request(err.to_string()).with_reason("expired"),
            SigningError::BadSignature => AppError::new(StatusCode::FORBIDDEN, err.to_string()),
            SigningError::MissingParameter(_) | SigningError::InvalidParameter { .. } => {
                AppError::bad_request(err.to_string())
            }
            SigningError::Config(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::new(rejection.status(), rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn renders_fixed_error_schema() {
        let (status, body) = render(StorageError::PreconditionFailed("gen".into()).into()).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["error"]["code"], 412);
        assert_eq!(body["error"]["errors"][0]["domain"], "global");
        assert_eq!(body["error"]["errors"][0]["reason"], "conditionNotMet");
        assert_eq!(body["error"]["message"], body["error"]["errors"][0]["message"]);
    }

    #[tokio::test]
    async fn reasons_follow_error_kind() {
        let cases: Vec<(AppError, u16, &str)> = vec![
            (StorageError::InvalidArgument("x".into()).into(), 400, "invalid"),
            (StorageError::BucketNotFound("b".into()).into(), 404, "notFound"),
            (StorageError::BucketAlreadyExists("b".into()).into(), 409, "alreadyExists"),
            (StorageError::Conflict("busy".into()).into(), 409, "conflict"),
            (SigningError::Expired.into(), 400, "expired"),
            (SigningError::BadSignature.into(), 403, "forbidden"),
            (AppError::new(StatusCode::SERVICE_UNAVAILABLE, "down"), 503, "backendError"),
        ];
        for (err, code, reason) in cases {
            let (status, body) = render(err).await;
            assert_eq!(status.as_u16(), code);
            assert_eq!(body["error"]["errors"][0]["reason"], reason);
        }
    }
}
