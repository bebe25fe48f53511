//! Upload pipeline: single-shot, multipart and resumable uploads all end in
//! [`VersionStore::put`].

use crate::{
    models::object::{ObjectVersion, UserMetadata},
    services::{
        multipart,
        preconditions::Preconditions,
        sessions::SessionStore,
        version_store::{NewObject, StorageError, StorageResult, VersionStore},
    },
};
use bytes::Bytes;
use serde::Deserialize;
use chrono::Utc;
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info};

/// The `uploadType` of an inbound upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Raw body, name in the query string.
    Media,
    /// Two-part `multipart/related` body: JSON metadata then content.
    Multipart,
    /// Session initiation; content follows in chunks.
    Resumable,
}

impl FromStr for UploadMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "media" => Ok(Self::Media),
            "multipart" => Ok(Self::Multipart),
            "resumable" => Ok(Self::Resumable),
            other => Err(StorageError::InvalidArgument(format!(
                "unsupported uploadType `{}`",
                other
            ))),
        }
    }
}

/// Everything the pipeline needs from an upload request.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// `name` query parameter.
    pub name: Option<String>,
    /// The request's own Content-Type header.
    pub content_type: Option<String>,
    /// `X-Upload-Content-Type`, declared when initiating a resumable upload.
    pub upload_content_type: Option<String>,
    pub body: Bytes,
}

/// Object resource fields accepted in JSON upload metadata.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub name: Option<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<UserMetadata>,
}

/// The object a request describes plus its content (empty for resumable initiation).
#[derive(Debug, Clone)]
pub struct AssembledPayload {
    pub object: NewObject,
    pub content: Bytes,
}

impl UploadMode {
    /// Turn a request of this shape into an [`AssembledPayload`].
    pub fn parse(self, request: UploadRequest) -> StorageResult<AssembledPayload> {
        match self {
            Self::Media => parse_media(request),
            Self::Multipart => parse_multipart(request),
            Self::Resumable => parse_initiation(request),
        }
    }
}

fn parse_media(request: UploadRequest) -> StorageResult<AssembledPayload> {
    let name = request
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StorageError::InvalidArgument("name query parameter is required".into()))?;
    Ok(AssembledPayload {
        object: NewObject {
            name,
            content_type: request.content_type,
            metadata: UserMetadata::new(),
        },
        content: request.body,
    })
}

fn parse_metadata_json(raw: &[u8]) -> StorageResult<UploadMetadata> {
    serde_json::from_slice(raw)
        .map_err(|err| StorageError::InvalidArgument(format!("invalid object metadata JSON: {}", err)))
}

fn parse_multipart(request: UploadRequest) -> StorageResult<AssembledPayload> {
    let header = request
        .content_type
        .as_deref()
        .ok_or_else(|| StorageError::InvalidArgument("multipart upload requires a Content-Type".into()))?;
    let boundary = multipart::boundary(header)?;
    let parts = multipart::parse_parts(&request.body, &boundary)?;
    if parts.len() != 2 {
        return Err(StorageError::InvalidArgument(format!(
            "multipart upload must contain exactly two parts, found {}",
            parts.len()
        )));
    }

    let metadata = parse_metadata_json(&parts[0].body)?;
    let name = metadata
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StorageError::InvalidArgument("object metadata must include `name`".into()))?;
    let content_type = parts[1]
        .header("content-type")
        .map(str::to_string)
        .or(metadata.content_type);

    Ok(AssembledPayload {
        object: NewObject {
            name,
            content_type,
            metadata: metadata.metadata.unwrap_or_default(),
        },
        content: parts[1].body.clone(),
    })
}

fn parse_initiation(request: UploadRequest) -> StorageResult<AssembledPayload> {
    let metadata = if request.body.iter().all(u8::is_ascii_whitespace) {
        UploadMetadata::default()
    } else {
        parse_metadata_json(&request.body)?
    };
    let name = metadata
        .name
        .or(request.name)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StorageError::InvalidArgument("resumable upload requires an object name".into()))?;

    Ok(AssembledPayload {
        object: NewObject {
            name,
            content_type: metadata.content_type.or(request.upload_content_type),
            metadata: metadata.metadata.unwrap_or_default(),
        },
        content: Bytes::new(),
    })
}

/// A parsed `Content-Range` header for a resumable chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// `bytes {start}-{end}/{total|*}`
    Chunk {
        start: u64,
        end: u64,
        total: Option<u64>,
    },
    /// `bytes */{total|*}`: no data, asks for the confirmed offset.
    Status { total: Option<u64> },
}

impl ContentRange {
    /// Parse the header; a missing header means the body is the whole object.
    pub fn parse(header: Option<&str>, body_len: u64) -> StorageResult<Self> {
        let Some(header) = header else {
            return Ok(if body_len == 0 {
                Self::Status { total: Some(0) }
            } else {
                Self::Chunk {
                    start: 0,
                    end: body_len - 1,
                    total: Some(body_len),
                }
            });
        };

        let bad = || StorageError::InvalidArgument(format!("invalid Content-Range `{}`", header));
        let unit_range = header.trim().strip_prefix("bytes").ok_or_else(bad)?.trim_start();
        let (range, total) = unit_range.split_once('/').ok_or_else(bad)?;
        let total = match total.trim() {
            "*" => None,
            value => Some(value.parse::<u64>().map_err(|_| bad())?),
        };

        if range.trim() == "*" {
            return Ok(Self::Status { total });
        }
        let (start, end) = range.split_once('-').ok_or_else(bad)?;
        let start = start.trim().parse::<u64>().map_err(|_| bad())?;
        let end = end.trim().parse::<u64>().map_err(|_| bad())?;
        if end < start || end == u64::MAX {
            return Err(bad());
        }
        Ok(Self::Chunk { start, end, total })
    }
}

/// Result of a chunk or status request on a resumable session.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// More bytes are expected; `received` is the confirmed offset.
    Incomplete { received: u64 },
    /// The upload committed as a new version.
    Complete(ObjectVersion),
}

/// The result of an upload request.
#[derive(Debug)]
pub enum UploadOutcome {
    Stored(ObjectVersion),
    SessionStarted { session_id: String },
}

#[derive(Clone)]
pub struct UploadPipeline {
    store: VersionStore,
    sessions: Arc<SessionStore>,
}

impl UploadPipeline {
    pub fn new(store: VersionStore, sessions: Arc<SessionStore>) -> Self {
        Self { store, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle a single-shot, multipart or resumable-initiation request.
    pub async fn upload(
        &self,
        bucket: &str,
        mode: UploadMode,
        request: UploadRequest,
        preconditions: Preconditions,
    ) -> StorageResult<UploadOutcome> {
        let payload = mode.parse(request)?;
        match mode {
            UploadMode::Media | UploadMode::Multipart => {
                let version = self
                    .store
                    .put(bucket, payload.object, &preconditions, payload.content)
                    .await?;
                Ok(UploadOutcome::Stored(version))
            }
            UploadMode::Resumable => {
                self.store.validate_name(&payload.object.name)?;
                self.store.ensure_bucket_exists(bucket).await?;
                let name = payload.object.name.clone();
                let session_id = self.sessions.create(bucket, payload.object, preconditions);
                info!("started resumable upload {} for {}/{}", session_id, bucket, name);
                Ok(UploadOutcome::SessionStarted { session_id })
            }
        }
    }

    /// Apply one chunk (or status query) to a resumable session of `bucket`.
    ///
    /// A chunk must start exactly at the confirmed offset; anything else is
    /// rejected without touching the session. When the offset reaches the
    /// declared total the buffer is committed and the session discarded.
    pub async fn upload_chunk(
        &self,
        bucket: &str,
        session_id: &str,
        range: ContentRange,
        body: Bytes,
    ) -> StorageResult<ChunkOutcome> {
        let mut session = self.sessions.acquire(session_id)?;
        if session.bucket != bucket {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        let previous_len = session.buffer.len();
        let previous_received = session.received_bytes;

        let total = match range {
            ContentRange::Status { total } => {
                if !body.is_empty() {
                    return Err(StorageError::InvalidArgument(
                        "status requests must not carry a body".into(),
                    ));
                }
                if total.is_some_and(|total| total < session.received_bytes) {
                    return Err(StorageError::InvalidArgument(format!(
                        "declared total {:?} is below the {} bytes already received",
                        total, session.received_bytes
                    )));
                }
                total
            }
            ContentRange::Chunk { start, end, total } => {
                if start != session.received_bytes {
                    return Err(StorageError::InvalidArgument(format!(
                        "offset mismatch: expected {}, got {}",
                        session.received_bytes, start
                    )));
                }
                let declared = end
                    .checked_sub(start)
                    .and_then(|span| span.checked_add(1))
                    .ok_or_else(|| {
                        StorageError::InvalidArgument(format!("invalid chunk range {}-{}", start, end))
                    })?;
                if body.len() as u64 != declared {
                    return Err(StorageError::InvalidArgument(format!(
                        "chunk declares {} bytes but carries {}",
                        declared,
                        body.len()
                    )));
                }
                if total.is_some_and(|total| end >= total) {
                    return Err(StorageError::InvalidArgument(
                        "chunk extends past the declared total".into(),
                    ));
                }
                session.buffer.extend_from_slice(&body);
                session.received_bytes = start + declared;
                total
            }
        };

        if total != Some(session.received_bytes) {
            debug!(
                "session {} confirmed {} bytes",
                session_id, session.received_bytes
            );
            return Ok(ChunkOutcome::Incomplete {
                received: session.received_bytes,
            });
        }

        let content = Bytes::from(std::mem::take(&mut session.buffer));
        let object = NewObject {
            name: session.name.clone(),
            content_type: Some(session.content_type.clone()).filter(|ct| !ct.is_empty()),
            metadata: session.metadata.clone(),
        };
        let started = session.created_at;

        match self
            .store
            .put(bucket, object, &session.preconditions, content.clone())
            .await
        {
            Ok(version) => {
                self.sessions.remove(session_id);
                info!(
                    "resumable upload {} finalized as {}/{} generation {} after {}s",
                    session_id,
                    bucket,
                    version.name,
                    version.generation,
                    (Utc::now() - started).num_seconds()
                );
                Ok(ChunkOutcome::Complete(version))
            }
            Err(err) => {
                let mut restored = content.to_vec();
                restored.truncate(previous_len);
                session.buffer = restored;
                session.received_bytes = previous_received;
                Err(err)
            }
        }
    }

    /// Abandon a resumable session of `bucket`; its bytes never become a version.
    pub fn cancel(&self, bucket: &str, session_id: &str) -> StorageResult<()> {
        let session = self.sessions.acquire(session_id)?;
        if session.bucket != bucket {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        self.sessions.remove(session_id);
        drop(session);
        info!("cancelled resumable upload {}", session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::version_store::tests::test_store;

    fn pipeline(store: &VersionStore) -> UploadPipeline {
        UploadPipeline::new(store.clone(), Arc::new(SessionStore::new(3600)))
    }

    fn multipart_body(boundary: &str, metadata: &str, media_type: Option<&str>, content: &[u8]) -> Bytes {
        let mut body = format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\n"
        )
        .into_bytes();
        if let Some(media_type) = media_type {
            body.extend_from_slice(format!("Content-Type: {media_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
        Bytes::from(body)
    }

    async fn start_session(pipeline: &UploadPipeline, name: &str) -> String {
        let outcome = pipeline
            .upload(
                "test-bucket",
                UploadMode::Resumable,
                UploadRequest {
                    name: Some(name.into()),
                    upload_content_type: Some("application/octet-stream".into()),
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await
            .unwrap();
        match outcome {
            UploadOutcome::SessionStarted { session_id } => session_id,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn upload_mode_from_str() {
        assert_eq!("media".parse::<UploadMode>().unwrap(), UploadMode::Media);
        assert_eq!("multipart".parse::<UploadMode>().unwrap(), UploadMode::Multipart);
        assert_eq!("resumable".parse::<UploadMode>().unwrap(), UploadMode::Resumable);
        assert!("simple".parse::<UploadMode>().is_err());
    }

    #[test]
    fn content_range_forms() {
        assert_eq!(
            ContentRange::parse(Some("bytes 0-9/20"), 10).unwrap(),
            ContentRange::Chunk { start: 0, end: 9, total: Some(20) }
        );
        assert_eq!(
            ContentRange::parse(Some("bytes 10-19/*"), 10).unwrap(),
            ContentRange::Chunk { start: 10, end: 19, total: None }
        );
        assert_eq!(
            ContentRange::parse(Some("bytes */20"), 0).unwrap(),
            ContentRange::Status { total: Some(20) }
        );
        assert_eq!(
            ContentRange::parse(None, 4).unwrap(),
            ContentRange::Chunk { start: 0, end: 3, total: Some(4) }
        );
        assert!(ContentRange::parse(Some("bytes 9-0/20"), 0).is_err());
        assert!(ContentRange::parse(Some("items 0-1/2"), 2).is_err());
    }

    #[tokio::test]
    async fn multipart_upload_creates_object() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let body = multipart_body("foo_bar_baz", r#"{"name":"x.txt"}"#, None, b"hello");

        let outcome = pipeline
            .upload(
                "test-bucket",
                UploadMode::Multipart,
                UploadRequest {
                    content_type: Some("multipart/related; boundary=foo_bar_baz".into()),
                    body,
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await
            .unwrap();
        let UploadOutcome::Stored(version) = outcome else {
            panic!("expected a stored version");
        };
        assert_eq!(version.name, "x.txt");
        assert_eq!(version.size_bytes, 5);
        assert_eq!(std::fs::read(&version.storage_path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn multipart_part_content_type_wins() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let body = multipart_body(
            "b",
            r#"{"name":"img.png","contentType":"text/plain","metadata":{"k":"v"}}"#,
            Some("image/png"),
            b"\x89PNG",
        );
        let outcome = pipeline
            .upload(
                "test-bucket",
                UploadMode::Multipart,
                UploadRequest {
                    content_type: Some("multipart/related; boundary=\"b\"".into()),
                    body,
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await
            .unwrap();
        let UploadOutcome::Stored(version) = outcome else {
            panic!("expected a stored version");
        };
        assert_eq!(version.content_type, "image/png");
        assert_eq!(version.metadata.0.get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn multipart_without_name_creates_nothing() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let body = multipart_body("b", r#"{"contentType":"text/plain"}"#, None, b"hello");
        let result = pipeline
            .upload(
                "test-bucket",
                UploadMode::Multipart,
                UploadRequest {
                    content_type: Some("multipart/related; boundary=b".into()),
                    body,
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));

        let listed = store
            .list_objects(
                "test-bucket",
                crate::services::version_store::ListObjectsParams {
                    versions: true,
                    max_results: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(listed.items.is_empty());
    }

    #[tokio::test]
    async fn multipart_requires_exactly_two_parts() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let body = Bytes::from_static(b"--b\r\n\r\n{\"name\":\"a\"}\r\n--b--");
        let result = pipeline
            .upload(
                "test-bucket",
                UploadMode::Multipart,
                UploadRequest {
                    content_type: Some("multipart/related; boundary=b".into()),
                    body,
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));

        let missing_boundary = pipeline
            .upload(
                "test-bucket",
                UploadMode::Multipart,
                UploadRequest {
                    content_type: Some("multipart/related".into()),
                    body: Bytes::from_static(b"irrelevant"),
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await;
        assert!(matches!(missing_boundary, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn media_upload_requires_name() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let result = pipeline
            .upload(
                "test-bucket",
                UploadMode::Media,
                UploadRequest {
                    body: Bytes::from_static(b"data"),
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn resumable_chunks_in_order_finalize() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let id = start_session(&pipeline, "big.bin").await;

        let first = pipeline
            .upload_chunk(
                "test-bucket",
                &id,
                ContentRange::Chunk { start: 0, end: 4, total: Some(10) },
                Bytes::from_static(b"01234"),
            )
            .await
            .unwrap();
        assert!(matches!(first, ChunkOutcome::Incomplete { received: 5 }));

        let last = pipeline
            .upload_chunk(
                "test-bucket",
                &id,
                ContentRange::Chunk { start: 5, end: 9, total: Some(10) },
                Bytes::from_static(b"56789"),
            )
            .await
            .unwrap();
        let ChunkOutcome::Complete(version) = last else {
            panic!("expected completion");
        };
        assert_eq!(version.size_bytes, 10);
        assert_eq!(std::fs::read(&version.storage_path).unwrap(), b"0123456789");
        assert_eq!(pipeline.sessions().len(), 0);
    }

    #[tokio::test]
    async fn resumable_offset_mismatch_leaves_session_untouched() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let id = start_session(&pipeline, "big.bin").await;

        pipeline
            .upload_chunk(
                "test-bucket",
                &id,
                ContentRange::Chunk { start: 0, end: 2, total: Some(6) },
                Bytes::from_static(b"abc"),
            )
            .await
            .unwrap();

        for start in [0u64, 4] {
            let result = pipeline
                .upload_chunk(
                    "test-bucket",
                    &id,
                    ContentRange::Chunk { start, end: start + 1, total: Some(6) },
                    Bytes::from_static(b"zz"),
                )
                .await;
            assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
        }

        {
            let session = pipeline.sessions().acquire(&id).unwrap();
            assert_eq!(session.received_bytes, 3);
            assert_eq!(session.buffer, b"abc");
        }

        let status = pipeline
            .upload_chunk("test-bucket", &id, ContentRange::Status { total: None }, Bytes::new())
            .await
            .unwrap();
        assert!(matches!(status, ChunkOutcome::Incomplete { received: 3 }));

        let done = pipeline
            .upload_chunk(
                "test-bucket",
                &id,
                ContentRange::Chunk { start: 3, end: 5, total: Some(6) },
                Bytes::from_static(b"def"),
            )
            .await
            .unwrap();
        assert!(matches!(done, ChunkOutcome::Complete(_)));
        let stored = store.get("test-bucket", "big.bin", None).await.unwrap();
        assert_eq!(std::fs::read(&stored.storage_path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn unfinished_session_creates_no_version() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let id = start_session(&pipeline, "partial.bin").await;
        pipeline
            .upload_chunk(
                "test-bucket",
                &id,
                ContentRange::Chunk { start: 0, end: 1, total: None },
                Bytes::from_static(b"ab"),
            )
            .await
            .unwrap();
        pipeline.cancel("test-bucket", &id).unwrap();

        assert!(store.get("test-bucket", "partial.bin", None).await.is_err());
        assert!(matches!(
            pipeline
                .upload_chunk("test-bucket", &id, ContentRange::Status { total: None }, Bytes::new())
                .await,
            Err(StorageError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_finalize_rolls_back_last_chunk() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        store
            .put(
                "test-bucket",
                NewObject::named("taken.bin"),
                &Preconditions::default(),
                Bytes::from_static(b"old"),
            )
            .await
            .unwrap();

        let outcome = pipeline
            .upload(
                "test-bucket",
                UploadMode::Resumable,
                UploadRequest {
                    name: Some("taken.bin".into()),
                    ..Default::default()
                },
                Preconditions {
                    if_generation_match: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let UploadOutcome::SessionStarted { session_id } = outcome else {
            panic!("expected a session");
        };

        let result = pipeline
            .upload_chunk(
                "test-bucket",
                &session_id,
                ContentRange::Chunk { start: 0, end: 2, total: Some(3) },
                Bytes::from_static(b"new"),
            )
            .await;
        assert!(matches!(result, Err(StorageError::PreconditionFailed(_))));

        let session = pipeline.sessions().acquire(&session_id).unwrap();
        assert_eq!(session.received_bytes, 0);
        assert!(session.buffer.is_empty());
    }

    #[tokio::test]
    async fn zero_length_resumable_upload() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let id = start_session(&pipeline, "empty.bin").await;
        let outcome = pipeline
            .upload_chunk("test-bucket", &id, ContentRange::Status { total: Some(0) }, Bytes::new())
            .await
            .unwrap();
        let ChunkOutcome::Complete(version) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(version.size_bytes, 0);
        assert_eq!(version.crc32c, "AAAAAA==");
    }

    #[tokio::test]
    async fn resumable_initiation_validates_name_and_bucket() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let bad_name = pipeline
            .upload(
                "test-bucket",
                UploadMode::Resumable,
                UploadRequest {
                    name: Some("../up".into()),
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await;
        assert!(matches!(bad_name, Err(StorageError::InvalidObjectName(_))));

        let bad_bucket = pipeline
            .upload(
                "missing-bucket",
                UploadMode::Resumable,
                UploadRequest {
                    name: Some("ok".into()),
                    ..Default::default()
                },
                Preconditions::default(),
            )
            .await;
        assert!(matches!(bad_bucket, Err(StorageError::BucketNotFound(_))));
        assert_eq!(pipeline.sessions().len(), 0);
    }

    #[tokio::test]
    async fn range_ending_at_u64_max_is_rejected() {
        assert!(ContentRange::parse(Some("bytes 0-18446744073709551615/*"), 0).is_err());

        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let id = start_session(&pipeline, "huge.bin").await;
        let result = pipeline
            .upload_chunk(
                "test-bucket",
                &id,
                ContentRange::Chunk { start: 0, end: u64::MAX, total: None },
                Bytes::new(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));

        let session = pipeline.sessions().acquire(&id).unwrap();
        assert_eq!(session.received_bytes, 0);
        assert!(session.buffer.is_empty());
    }

    #[tokio::test]
    async fn session_is_bound_to_its_bucket() {
        let (store, _dir) = test_store().await;
        let pipeline = pipeline(&store);
        let id = start_session(&pipeline, "bound.bin").await;

        let elsewhere = pipeline
            .upload_chunk(
                "other-bucket",
                &id,
                ContentRange::Chunk { start: 0, end: 1, total: Some(2) },
                Bytes::from_static(b"ab"),
            )
            .await;
        assert!(matches!(elsewhere, Err(StorageError::SessionNotFound(_))));
        assert!(matches!(
            pipeline.cancel("other-bucket", &id),
            Err(StorageError::SessionNotFound(_))
        ));

        let done = pipeline
            .upload_chunk(
                "test-bucket",
                &id,
                ContentRange::Chunk { start: 0, end: 1, total: Some(2) },
                Bytes::from_static(b"ab"),
            )
            .await
            .unwrap();
        assert!(matches!(done, ChunkOutcome::Complete(_)));
    }
}
