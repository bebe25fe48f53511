//! Signed URL issuance and signed GET/PUT access.

use crate::{
    errors::AppError,
    handlers::{
        object_handlers::stream_object,
        params::{ApiPath, ApiQuery, content_type, parse_json, read_body},
        resources::ObjectResource,
    },
    services::{
        preconditions::Preconditions,
        signing::{SignedMethod, SignedParams},
        upload::{UploadMode, UploadOutcome, UploadRequest},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

/// Request body for `POST /signed-urls`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUrlReq {
    pub method: String,
    pub bucket: String,
    pub object: String,
    pub expires_in: i64,
}

/// POST `/signed-urls`
pub async fn create_signed_url(
    State(state): State<AppState>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let raw = read_body(body, state.config.max_request_bytes).await?;
    let req: SignUrlReq = parse_json(&raw)?;
    let method: SignedMethod = req.method.parse()?;
    state.store.validate_name(&req.object)?;

    let signed = state
        .signer
        .generate(method, &req.bucket, &req.object, req.expires_in, Utc::now())?;
    debug!(
        "issued signed {} url for {}/{} until {}",
        method, req.bucket, req.object, signed.expires_at
    );
    Ok(Json(signed))
}

/// GET `/signed/{bucket}/{object}`
pub async fn signed_get(
    State(state): State<AppState>,
    ApiPath((bucket, object)): ApiPath<(String, String)>,
    ApiQuery(params): ApiQuery<SignedParams>,
) -> Result<Response, AppError> {
    state
        .signer
        .verify(SignedMethod::Get, &bucket, &object, &params, Utc::now())?;
    stream_object(&state, &bucket, &object, None).await
}

/// PUT `/signed/{bucket}/{object}`: single-shot upload of the body.
pub async fn signed_put(
    State(state): State<AppState>,
    ApiPath((bucket, object)): ApiPath<(String, String)>,
    ApiQuery(params): ApiQuery<SignedParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    state
        .signer
        .verify(SignedMethod::Put, &bucket, &object, &params, Utc::now())?;

    let body = read_body(body, state.config.max_request_bytes).await?;
    let request = UploadRequest {
        name: Some(object),
        content_type: content_type(&headers),
        upload_content_type: None,
        body,
    };
    let outcome = state
        .pipeline
        .upload(&bucket, UploadMode::Media, request, Preconditions::default())
        .await?;
    match outcome {
        UploadOutcome::Stored(version) => {
            let bucket_rec = state.store.get_bucket(&bucket).await?;
            let resource = ObjectResource::new(&state.config.public_url, &bucket_rec, &version);
            Ok(Json(resource).into_response())
        }
        UploadOutcome::SessionStarted { .. } => {
            Err(AppError::internal("single-shot upload opened a session"))
        }
    }
}
