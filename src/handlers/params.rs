//! Request pieces shared by several handlers.

use crate::{errors::AppError, services::preconditions::Preconditions};
use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{FromRequestParts, Path, Query},
    http::{HeaderMap, header, request::Parts},
};
use serde::{Deserialize, de::DeserializeOwned};

/// `Query` whose rejection renders as an [`AppError`].
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// `Path` whose rejection renders as an [`AppError`].
#[derive(Debug)]
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Precondition query parameters (`?ifGenerationMatch=...`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconditionQuery {
    pub if_generation_match: Option<i64>,
    pub if_generation_not_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
    pub if_metageneration_not_match: Option<i64>,
}

const GENERATION_MATCH: &str = "x-goog-if-generation-match";
const GENERATION_NOT_MATCH: &str = "x-goog-if-generation-not-match";
const METAGENERATION_MATCH: &str = "x-goog-if-metageneration-match";
const METAGENERATION_NOT_MATCH: &str = "x-goog-if-metageneration-not-match";

/// Merge query and header preconditions; the query parameter wins when both are set.
pub fn preconditions(query: PreconditionQuery, headers: &HeaderMap) -> Result<Preconditions, AppError> {
    Ok(Preconditions {
        if_generation_match: query
            .if_generation_match
            .map_or_else(|| header_i64(headers, GENERATION_MATCH), |v| Ok(Some(v)))?,
        if_generation_not_match: query
            .if_generation_not_match
            .map_or_else(|| header_i64(headers, GENERATION_NOT_MATCH), |v| Ok(Some(v)))?,
        if_metageneration_match: query
            .if_metageneration_match
            .map_or_else(|| header_i64(headers, METAGENERATION_MATCH), |v| Ok(Some(v)))?,
        if_metageneration_not_match: query
            .if_metageneration_not_match
            .map_or_else(|| header_i64(headers, METAGENERATION_NOT_MATCH), |v| Ok(Some(v)))?,
    })
}

fn header_i64(headers: &HeaderMap, name: &str) -> Result<Option<i64>, AppError> {
    match header_str(headers, name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| AppError::bad_request(format!("header {} must be an integer", name))),
    }
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Buffer a request body up to `limit` bytes.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, AppError> {
    to_bytes(body, limit).await.map_err(|err| {
        AppError::bad_request(format!(
            "could not read request body (limit {} bytes): {}",
            limit, err
        ))
    })
}

pub fn parse_json<T: DeserializeOwned>(raw: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(raw)
        .map_err(|err| AppError::bad_request(format!("invalid JSON body: {}", err)))
}
