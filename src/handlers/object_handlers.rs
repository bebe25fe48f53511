//! HTTP handlers for object and bucket operations on the JSON API
//! (`/storage/v1/...` and `/download/storage/v1/...`).
//! Downloads stream from disk; all storage concerns are delegated to
//! `VersionStore`.

use crate::{
    errors::AppError,
    handlers::{
        params::{ApiPath, ApiQuery, PreconditionQuery, parse_json, preconditions, read_body},
        resources::{BucketResource, ObjectList, ObjectResource},
    },
    models::{
        bucket::NewBucket,
        object::{ObjectPatch, ObjectVersion},
    },
    services::version_store::ListObjectsParams,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct ObjectQuery {
    pub alt: Option<String>,
    pub generation: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(default)]
    pub versions: bool,
    pub max_results: Option<usize>,
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VersioningReq {
    #[serde(default)]
    pub enabled: bool,
}

/// Request body for `POST /storage/v1/b`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBucketReq {
    pub name: String,
    pub location: Option<String>,
    pub storage_class: Option<String>,
    pub versioning: Option<VersioningReq>,
}

/// Request body for `PATCH /storage/v1/b/{bucket}/o/{object}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchObjectReq {
    pub content_type: Option<String>,
    pub metadata: Option<BTreeMap<String, Option<String>>>,
}

/// GET `/storage/v1/b/{bucket}/o/{object}`: JSON metadata, or bytes with `alt=media`.
pub async fn get_object(
    State(state): State<AppState>,
    ApiPath((bucket, object)): ApiPath<(String, String)>,
    ApiQuery(q): ApiQuery<ObjectQuery>,
) -> Result<Response, AppError> {
    match q.alt.as_deref() {
        None | Some("json") => {
            let bucket_rec = state.store.get_bucket(&bucket).await?;
            let version = state.store.get(&bucket, &object, q.generation).await?;
            Ok(Json(ObjectResource::new(&state.config.public_url, &bucket_rec, &version))
                .into_response())
        }
        Some("media") => stream_object(&state, &bucket, &object, q.generation).await,
        Some(other) => Err(AppError::bad_request(format!(
            "unsupported alt `{}`",
            other
        ))),
    }
}

/// GET `/download/storage/v1/b/{bucket}/o/{object}`: always streams bytes.
pub async fn download_object(
    State(state): State<AppState>,
    ApiPath((bucket, object)): ApiPath<(String, String)>,
    ApiQuery(q): ApiQuery<ObjectQuery>,
) -> Result<Response, AppError> {
    stream_object(&state, &bucket, &object, q.generation).await
}

pub(crate) async fn stream_object(
    state: &AppState,
    bucket: &str,
    object: &str,
    generation: Option<i64>,
) -> Result<Response, AppError> {
    let (version, file) = state.store.open(bucket, object, generation).await?;
    Ok(media_response(&version, file))
}

fn media_response(version: &ObjectVersion, file: File) -> Response {
    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), version);
    response
}

/// DELETE `/storage/v1/b/{bucket}/o/{object}` with an optional `generation`.
pub async fn delete_object(
    State(state): State<AppState>,
    ApiPath((bucket, object)): ApiPath<(String, String)>,
    ApiQuery(q): ApiQuery<ObjectQuery>,
    ApiQuery(pre): ApiQuery<PreconditionQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let conditions = preconditions(pre, &headers)?;
    state
        .store
        .delete(&bucket, &object, q.generation, &conditions)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH `/storage/v1/b/{bucket}/o/{object}`: metadata-only update.
pub async fn patch_object(
    State(state): State<AppState>,
    ApiPath((bucket, object)): ApiPath<(String, String)>,
    ApiQuery(pre): ApiQuery<PreconditionQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let conditions = preconditions(pre, &headers)?;
    let raw = read_body(body, state.config.max_request_bytes).await?;
    let req: PatchObjectReq = parse_json(&raw)?;

    let bucket_rec = state.store.get_bucket(&bucket).await?;
    let patch = ObjectPatch {
        content_type: req.content_type,
        metadata: req.metadata,
    };
    let version = state
        .store
        .update_metadata(&bucket, &object, patch, &conditions)
        .await?;
    Ok(Json(ObjectResource::new(
        &state.config.public_url,
        &bucket_rec,
        &version,
    )))
}

/// GET `/storage/v1/b/{bucket}/o`: list objects, supports
/// `?prefix=&delimiter=&versions=&maxResults=&pageToken=`.
pub async fn list_objects(
    State(state): State<AppState>,
    ApiPath(bucket): ApiPath<String>,
    ApiQuery(q): ApiQuery<ListObjectsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page_token = q
        .page_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(decode_page_token)
        .transpose()?;

    let bucket_rec = state.store.get_bucket(&bucket).await?;
    let result = state
        .store
        .list_objects(
            &bucket,
            ListObjectsParams {
                prefix: q.prefix,
                delimiter: q.delimiter,
                versions: q.versions,
                page_token,
                max_results: q.max_results.unwrap_or(1000),
            },
        )
        .await?;

    let items = result
        .items
        .iter()
        .map(|version| ObjectResource::new(&state.config.public_url, &bucket_rec, version))
        .collect();
    Ok(Json(ObjectList {
        kind: "storage#objects",
        items,
        prefixes: result.prefixes,
        next_page_token: result.next_page_token.as_deref().map(encode_page_token),
    }))
}

/// POST `/storage/v1/b?project=`: create bucket.
pub async fn create_bucket(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ProjectQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let raw = read_body(body, state.config.max_request_bytes).await?;
    let req: CreateBucketReq = parse_json(&raw)?;

    let bucket = state
        .store
        .create_bucket(NewBucket {
            name: req.name,
            project: q.project.unwrap_or_else(|| "local".into()),
            location: req.location.unwrap_or_else(|| "US".into()),
            storage_class: req.storage_class.unwrap_or_else(|| "STANDARD".into()),
            versioning_enabled: req.versioning.map(|v| v.enabled).unwrap_or(false),
        })
        .await?;
    Ok(Json(BucketResource::new(&state.config.public_url, &bucket)))
}

/// GET `/storage/v1/b/{bucket}`.
pub async fn get_bucket(
    State(state): State<AppState>,
    ApiPath(bucket): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let bucket = state.store.get_bucket(&bucket).await?;
    Ok(Json(BucketResource::new(&state.config.public_url, &bucket)))
}

/// DELETE `/storage/v1/b/{bucket}`: delete bucket and everything in it.
pub async fn delete_bucket(
    State(state): State<AppState>,
    ApiPath(bucket): ApiPath<String>,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_object_headers(headers: &mut HeaderMap, version: &ObjectVersion) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&version.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(version.size_bytes.max(0) as u64),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", version.etag)) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(
        HeaderName::from_static("x-goog-generation"),
        HeaderValue::from(version.generation),
    );
    headers.insert(
        HeaderName::from_static("x-goog-metageneration"),
        HeaderValue::from(version.metageneration),
    );
    let hash = format!("crc32c={},md5={}", version.crc32c, version.md5_hash);
    if let Ok(value) = HeaderValue::from_str(&hash) {
        headers.insert(HeaderName::from_static("x-goog-hash"), value);
    }
}

fn encode_page_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

fn decode_page_token(token: &str) -> Result<String, AppError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::bad_request("invalid pageToken"))
}
