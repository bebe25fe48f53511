//! Defines routes for the JSON object-storage API.
//!
//! ## Structure
//! - **Bucket endpoints**
//!   - `POST   /storage/v1/b`: create bucket
//!   - `GET    /storage/v1/b/{bucket}`: bucket metadata
//!   - `DELETE /storage/v1/b/{bucket}`: delete bucket and all its versions
//!   - `GET    /storage/v1/b/{bucket}/o`: list objects
//!
//! - **Object endpoints**
//!   - `GET    /storage/v1/b/{bucket}/o/{*object}`: metadata, or bytes with `alt=media`
//!   - `PATCH  /storage/v1/b/{bucket}/o/{*object}`: metadata-only update
//!   - `DELETE /storage/v1/b/{bucket}/o/{*object}`: delete one or all generations
//!   - `GET    /download/storage/v1/b/{bucket}/o/{*object}`: bytes
//!
//! - **Uploads**: `POST|PUT|DELETE /upload/storage/v1/b/{bucket}/o`
//! - **Signed URLs**: `POST /signed-urls`, `GET|PUT /signed/{bucket}/{*object}`
//!
//! Unknown paths and unsupported methods answer with the JSON error body too.

use crate::{
    errors::AppError,
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, download_object, get_bucket, get_object,
            list_objects, patch_object,
        },
        signed_handlers::{create_signed_url, signed_get, signed_put},
        upload_handlers::{cancel_upload, resume_upload, start_upload},
    },
    state::AppState,
};
use axum::{
    Router,
    http::{Method, StatusCode, Uri},
    routing::{get, post},
};

/// Build the router for every API route.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Buckets
        .route("/storage/v1/b", post(create_bucket))
        .route("/storage/v1/b/{bucket}", get(get_bucket).delete(delete_bucket))
        // Objects
        .route("/storage/v1/b/{bucket}/o", get(list_objects))
        .route(
            "/storage/v1/b/{bucket}/o/{*object}",
            get(get_object).patch(patch_object).delete(delete_object),
        )
        .route(
            "/download/storage/v1/b/{bucket}/o/{*object}",
            get(download_object),
        )
        // Uploads
        .route(
            "/upload/storage/v1/b/{bucket}/o",
            post(start_upload).put(resume_upload).delete(cancel_upload),
        )
        // Signed URLs
        .route("/signed-urls", post(create_signed_url))
        .route("/signed/{bucket}/{*object}", get(signed_get).put(signed_put))
        .fallback(unknown_route)
        .method_not_allowed_fallback(method_not_allowed)
}

async fn unknown_route(uri: Uri) -> AppError {
    AppError::not_found(format!("no route for {}", uri.path()))
}

async fn method_not_allowed(method: Method, uri: Uri) -> AppError {
    AppError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("{} is not supported on {}", method, uri.path()),
    )
}
