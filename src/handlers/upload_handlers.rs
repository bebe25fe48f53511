//! Upload endpoints under `/upload/storage/v1/b/{bucket}/o`.
//!
//! - `POST ?uploadType=media|multipart|resumable` starts an upload
//! - `PUT ?upload_id=...` sends a resumable chunk or a status query
//! - `DELETE ?upload_id=...` cancels a resumable session

use crate::{
    errors::AppError,
    handlers::{
        params::{
            ApiPath, ApiQuery, PreconditionQuery, content_type, header_str, preconditions, read_body,
        },
        resources::{ObjectResource, resource_url},
    },
    models::object::ObjectVersion,
    services::upload::{ChunkOutcome, ContentRange, UploadMode, UploadOutcome, UploadRequest},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// Status returned when a resumable session is cancelled.
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "uploadType")]
    pub upload_type: Option<String>,
    pub name: Option<String>,
    pub upload_id: Option<String>,
}

/// POST `/upload/storage/v1/b/{bucket}/o`.
pub async fn start_upload(
    State(state): State<AppState>,
    ApiPath(bucket): ApiPath<String>,
    ApiQuery(q): ApiQuery<UploadQuery>,
    ApiQuery(pre): ApiQuery<PreconditionQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if let Some(upload_id) = q.upload_id {
        return put_chunk(&state, &bucket, &upload_id, &headers, body).await;
    }

    let mode: UploadMode = q
        .upload_type
        .as_deref()
        .ok_or_else(|| AppError::bad_request("uploadType is required"))?
        .parse()?;
    let conditions = preconditions(pre, &headers)?;
    let body = read_body(body, state.config.max_request_bytes).await?;

    let request = UploadRequest {
        name: q.name,
        content_type: content_type(&headers),
        upload_content_type: header_str(&headers, "x-upload-content-type").map(str::to_string),
        body,
    };

    match state.pipeline.upload(&bucket, mode, request, conditions).await? {
        UploadOutcome::Stored(version) => object_response(&state, &bucket, &version).await,
        UploadOutcome::SessionStarted { session_id } => {
            let location = format!(
                "{}?uploadType=resumable&upload_id={}",
                resource_url(
                    &state.config.public_url,
                    &["upload", "storage", "v1", "b", &bucket, "o"],
                ),
                session_id
            );
            let mut response = StatusCode::OK.into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&location) {
                headers.insert(header::LOCATION, value);
            }
            if let Ok(value) = HeaderValue::from_str(&session_id) {
                headers.insert(HeaderName::from_static("x-guploader-uploadid"), value);
            }
            Ok(response)
        }
    }
}

/// PUT `/upload/storage/v1/b/{bucket}/o?upload_id=...`.
pub async fn resume_upload(
    State(state): State<AppState>,
    ApiPath(bucket): ApiPath<String>,
    ApiQuery(q): ApiQuery<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let upload_id = q
        .upload_id
        .ok_or_else(|| AppError::bad_request("upload_id is required"))?;
    put_chunk(&state, &bucket, &upload_id, &headers, body).await
}

/// DELETE `/upload/storage/v1/b/{bucket}/o?upload_id=...`.
pub async fn cancel_upload(
    State(state): State<AppState>,
    ApiPath(bucket): ApiPath<String>,
    ApiQuery(q): ApiQuery<UploadQuery>,
) -> Result<Response, AppError> {
    let upload_id = q
        .upload_id
        .ok_or_else(|| AppError::bad_request("upload_id is required"))?;
    state.pipeline.cancel(&bucket, &upload_id)?;
    let status = StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::NO_CONTENT);
    Ok(status.into_response())
}

async fn put_chunk(
    state: &AppState,
    bucket: &str,
    upload_id: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let body = read_body(body, state.config.max_request_bytes).await?;
    let range = ContentRange::parse(
        header_str(headers, header::CONTENT_RANGE.as_str()),
        body.len() as u64,
    )?;

    match state.pipeline.upload_chunk(bucket, upload_id, range, body).await? {
        ChunkOutcome::Complete(version) => {
            let bucket = state.store.get_bucket_by_id(version.bucket_id).await?;
            let resource = ObjectResource::new(&state.config.public_url, &bucket, &version);
            Ok(Json(resource).into_response())
        }
        ChunkOutcome::Incomplete { received } => Ok(incomplete_response(received)),
    }
}

/// `308` with the confirmed byte range so the client knows where to resume.
fn incomplete_response(received: u64) -> Response {
    let mut response = StatusCode::PERMANENT_REDIRECT.into_response();
    let headers = response.headers_mut();
    if received > 0 {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes=0-{}", received - 1)) {
            headers.insert(header::RANGE, value);
        }
    }
    headers.insert(
        HeaderName::from_static("x-goog-upload-offset"),
        HeaderValue::from(received),
    );
    response
}

async fn object_response(
    state: &AppState,
    bucket: &str,
    version: &ObjectVersion,
) -> Result<Response, AppError> {
    let bucket_rec = state.store.get_bucket(bucket).await?;
    Ok(Json(ObjectResource::new(&state.config.public_url, &bucket_rec, version)).into_response())
}
