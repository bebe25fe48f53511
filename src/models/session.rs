//! A resumable upload session: a single-owner buffer filled chunk by chunk.

use crate::{models::object::UserMetadata, services::preconditions::Preconditions};
use chrono::{DateTime, Utc};

/// State of one in-progress resumable upload.
#[derive(Debug)]
pub struct ResumableSession {
    /// Opaque id handed back to the client inside the session URL.
    pub id: String,

    pub bucket: String,

    pub name: String,

    pub content_type: String,

    pub metadata: UserMetadata,

    /// Conditions captured at initiation, evaluated when the upload commits.
    pub preconditions: Preconditions,

    /// Bytes accepted so far; the next chunk must start here.
    pub received_bytes: u64,

    pub buffer: Vec<u8>,

    pub created_at: DateTime<Utc>,

    /// Last time a chunk or status request touched the session.
    pub last_activity: DateTime<Utc>,
}
