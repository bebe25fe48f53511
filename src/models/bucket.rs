//! Represents a bucket, the namespace that owns objects and their versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket.
///
/// The `id` names the bucket's directory on disk; clients only ever see `name`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal identifier, also the on-disk directory name.
    pub id: Uuid,

    /// Globally unique bucket name.
    pub name: String,

    /// Owning project reference.
    pub project: String,

    /// Location constraint (e.g. "US", "EUROPE-WEST1").
    pub location: String,

    /// Default storage class for new objects.
    pub storage_class: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    pub versioning_enabled: bool,
}

/// Attributes supplied when creating a bucket.
#[derive(Debug, Clone)]
pub struct NewBucket {
    pub name: String,
    pub project: String,
    pub location: String,
    pub storage_class: String,
    pub versioning_enabled: bool,
}
