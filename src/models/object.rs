//! One immutable generation of an object, as persisted in `object_versions`.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;
use uuid::Uuid;

/// User-defined key/value metadata attached to a version.
pub type UserMetadata = BTreeMap<String, String>;

/// A single generation of an object.
///
/// The row flagged `is_latest` (and not `deleted`) is the object's current
/// state; an object with no such row is absent.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectVersion {
    pub id: Uuid,

    /// Owning bucket's internal id.
    pub bucket_id: Uuid,

    pub name: String,

    /// Strictly increasing per (bucket, name), starting at 1.
    pub generation: i64,

    /// Starts at 1 and increments on metadata-only updates.
    pub metageneration: i64,

    pub size_bytes: i64,

    pub content_type: String,

    /// Base64 MD5 digest of the content.
    pub md5_hash: String,

    /// Base64 big-endian CRC32C (Castagnoli) of the content.
    pub crc32c: String,

    pub etag: String,

    /// Physical location of the bytes.
    pub storage_path: String,

    pub metadata: Json<UserMetadata>,

    pub is_latest: bool,

    pub deleted: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Column list shared by every query that materialises an [`ObjectVersion`].
pub const VERSION_COLUMNS: &str = "id, bucket_id, name, generation, metageneration, size_bytes, \
     content_type, md5_hash, crc32c, etag, storage_path, metadata, is_latest, deleted, \
     created_at, updated_at";

/// Metadata-only changes applied by a patch.
#[derive(Debug, Clone, Default)]
pub struct ObjectPatch {
    pub content_type: Option<String>,
    /// `None` values remove the key.
    pub metadata: Option<BTreeMap<String, Option<String>>>,
}

#[cfg(test)]
pub fn test_version(generation: i64, metageneration: i64) -> ObjectVersion {
    let now = Utc::now();
    ObjectVersion {
        id: Uuid::new_v4(),
        bucket_id: Uuid::new_v4(),
        name: "file.txt".into(),
        generation,
        metageneration,
        size_bytes: 0,
        content_type: "text/plain".into(),
        md5_hash: String::new(),
        crc32c: String::new(),
        etag: String::new(),
        storage_path: String::new(),
        metadata: Json(UserMetadata::new()),
        is_latest: true,
        deleted: false,
        created_at: now,
        updated_at: now,
    }
}
