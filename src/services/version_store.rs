//! src/services/version_store.rs
//!
//! VersionStore: the authoritative per-(bucket, name) version ledger.
//! Metadata lives in SQLite; payloads live on disk beneath
//! `base_path/{bucket_id}/{object_name}/v{generation}`.

use crate::{
    models::{
        bucket::{Bucket, NewBucket},
        object::{ObjectPatch, ObjectVersion, UserMetadata, VERSION_COLUMNS},
    },
    services::{
        hasher::ContentHasher,
        locks::KeyLocks,
        path_guard::{self, SafeName},
        preconditions::Preconditions,
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{name}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, name: String },
    #[error("generation {generation} of object `{name}` not found in bucket `{bucket}`")]
    VersionNotFound {
        bucket: String,
        name: String,
        generation: i64,
    },
    #[error("invalid object name: {0}")]
    InvalidObjectName(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Attributes of a version about to be written.
#[derive(Debug, Clone, Default)]
pub struct NewObject {
    pub name: String,
    pub content_type: Option<String>,
    pub metadata: UserMetadata,
}

impl NewObject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    /// Include every surviving generation, not only the latest.
    pub versions: bool,
    /// Decoded cursor returned by a previous page.
    pub page_token: Option<String>,
    pub max_results: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub items: Vec<ObjectVersion>,
    pub prefixes: Vec<String>,
    pub next_page_token: Option<String>,
}

/// VersionStore provides the versioned object operations:
/// - put: assign the next generation and commit a new version
/// - get / open: read the latest or a specific generation
/// - delete: soft-delete one or all generations, promoting survivors
/// - update_metadata: bump the metageneration of the latest version
///
/// All writers to one (bucket, name) are serialized through [`KeyLocks`];
/// preconditions are evaluated while that lock is held.
#[derive(Clone)]
pub struct VersionStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    locks: Arc<KeyLocks>,
}

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

impl VersionStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            locks: KeyLocks::new(),
        }
    }

    /// Validate bucket name format.
    ///
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens, underscores
    /// - must start and end with a letter or digit
    /// - cannot contain consecutive dots or look like an IPv4 address
    fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, hyphens and underscores",
            ));
        }

        let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Directory holding every object of `bucket`. Named after the internal id.
    fn bucket_root(&self, bucket: &Bucket) -> PathBuf {
        self.base_path.join(bucket.id.to_string())
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        Self::ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, project, location, storage_class, created_at, versioning_enabled
             FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
    }

    async fn fetch_latest(&self, bucket: &Bucket, name: &str) -> StorageResult<Option<ObjectVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket_id = ? AND name = ? AND is_latest = 1 AND deleted = 0"
        );
        Ok(sqlx::query_as::<_, ObjectVersion>(&sql)
            .bind(bucket.id)
            .bind(name)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn fetch_generation(
        &self,
        bucket: &Bucket,
        name: &str,
        generation: i64,
    ) -> StorageResult<Option<ObjectVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket_id = ? AND name = ? AND generation = ? AND deleted = 0"
        );
        Ok(sqlx::query_as::<_, ObjectVersion>(&sql)
            .bind(bucket.id)
            .bind(name)
            .bind(generation)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Highest generation ever assigned, including soft-deleted rows.
    async fn max_generation(&self, bucket: &Bucket, name: &str) -> StorageResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(generation), 0) FROM object_versions
             WHERE bucket_id = ? AND name = ?",
        )
        .bind(bucket.id)
        .bind(name)
        .fetch_one(&*self.db)
        .await?)
    }

    fn object_not_found(bucket: &str, name: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        }
    }

    /// Commit a fully buffered payload as a new version.
    pub async fn put(
        &self,
        bucket: &str,
        object: NewObject,
        preconditions: &Preconditions,
        content: Bytes,
    ) -> StorageResult<ObjectVersion> {
        let body = stream::once(async move { Ok::<_, io::Error>(content) });
        self.put_stream(bucket, object, preconditions, body).await
    }

    /// Stream a payload into a new version.
    ///
    /// Under the object's key lock:
    /// - evaluates `preconditions` against the current latest version
    /// - assigns `max(generation) + 1`
    /// - writes a temp file, fsyncs it and renames it to `v{generation}`
    /// - in one transaction clears the previous `is_latest` and inserts the row
    ///
    /// The file is removed again if the transaction fails, so no version is
    /// ever visible without its bytes.
    pub async fn put_stream<S>(
        &self,
        bucket: &str,
        object: NewObject,
        preconditions: &Preconditions,
        body: S,
    ) -> StorageResult<ObjectVersion>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let name = path_guard::sanitize(&object.name)?;
        Self::ensure_bucket_name_safe(bucket)?;
        let _guard = self.locks.lock_object(bucket, name.as_str()).await;

        let bucket_rec = self.fetch_bucket(bucket).await?;
        let latest = self.fetch_latest(&bucket_rec, name.as_str()).await?;
        preconditions.check(latest.as_ref())?;

        let generation = self.max_generation(&bucket_rec, name.as_str()).await? + 1;
        let object_dir = path_guard::resolve(&self.bucket_root(&bucket_rec), &name)?;
        let final_path = object_dir.join(path_guard::version_file_name(generation));

        let hasher = write_atomically(&object_dir, &final_path, body)
            .await
            .map_err(|err| layout_collision(err, &name))?;
        let size_bytes = hasher.len() as i64;
        let digest = hasher.finalize();

        let now = Utc::now();
        let row = ObjectVersion {
            id: Uuid::new_v4(),
            bucket_id: bucket_rec.id,
            name: name.to_string(),
            generation,
            metageneration: 1,
            size_bytes,
            content_type: object
                .content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            md5_hash: digest.md5_base64,
            crc32c: digest.crc32c_base64,
            etag: digest.md5_hex,
            storage_path: final_path.display().to_string(),
            metadata: Json(object.metadata),
            is_latest: true,
            deleted: false,
            created_at: now,
            updated_at: now,
        };

        match self.commit_new_version(&row).await {
            Ok(version) => {
                info!(
                    "committed {}/{} generation {} ({} bytes)",
                    bucket, version.name, version.generation, version.size_bytes
                );
                Ok(version)
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&final_path).await {
                    warn!(
                        "failed to remove {} after aborted commit: {}",
                        final_path.display(),
                        cleanup
                    );
                }
                Err(err)
            }
        }
    }

    async fn commit_new_version(&self, row: &ObjectVersion) -> StorageResult<ObjectVersion> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "UPDATE object_versions SET is_latest = 0
             WHERE bucket_id = ? AND name = ? AND is_latest = 1",
        )
        .bind(row.bucket_id)
        .bind(&row.name)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "INSERT INTO object_versions ({VERSION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {VERSION_COLUMNS}"
        );
        let version = sqlx::query_as::<_, ObjectVersion>(&sql)
            .bind(row.id)
            .bind(row.bucket_id)
            .bind(&row.name)
            .bind(row.generation)
            .bind(row.metageneration)
            .bind(row.size_bytes)
            .bind(&row.content_type)
            .bind(&row.md5_hash)
            .bind(&row.crc32c)
            .bind(&row.etag)
            .bind(&row.storage_path)
            .bind(&row.metadata)
            .bind(row.is_latest)
            .bind(row.deleted)
            .bind(row.created_at)
            .bind(row.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }

    /// Fetch the latest version, or an exact generation when one is given.
    pub async fn get(
        &self,
        bucket: &str,
        name: &str,
        generation: Option<i64>,
    ) -> StorageResult<ObjectVersion> {
        let safe = path_guard::sanitize(name)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        match generation {
            Some(generation) => self
                .fetch_generation(&bucket_rec, safe.as_str(), generation)
                .await?
                .ok_or_else(|| StorageError::VersionNotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                    generation,
                }),
            None => self
                .fetch_latest(&bucket_rec, safe.as_str())
                .await?
                .ok_or_else(|| Self::object_not_found(bucket, name)),
        }
    }

    /// Fetch a version together with an open handle on its bytes.
    pub async fn open(
        &self,
        bucket: &str,
        name: &str,
        generation: Option<i64>,
    ) -> StorageResult<(ObjectVersion, File)> {
        let version = self.get(bucket, name, generation).await?;
        let file = File::open(&version.storage_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                // Deleted between the lookup and the open.
                Self::object_not_found(bucket, name)
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((version, file))
    }

    /// Delete one generation, or every surviving generation when `generation` is `None`.
    ///
    /// Rows are soft-deleted and their files removed. Deleting the latest
    /// generation promotes the highest surviving one, keeping its
    /// metageneration; with no survivors the object becomes absent.
    pub async fn delete(
        &self,
        bucket: &str,
        name: &str,
        generation: Option<i64>,
        preconditions: &Preconditions,
    ) -> StorageResult<()> {
        let safe = path_guard::sanitize(name)?;
        Self::ensure_bucket_name_safe(bucket)?;
        let _guard = self.locks.lock_object(bucket, safe.as_str()).await;

        let bucket_rec = self.fetch_bucket(bucket).await?;
        let latest = self.fetch_latest(&bucket_rec, safe.as_str()).await?;

        let removed_paths = match generation {
            Some(generation) => {
                let target = self
                    .fetch_generation(&bucket_rec, safe.as_str(), generation)
                    .await?
                    .ok_or_else(|| StorageError::VersionNotFound {
                        bucket: bucket.to_string(),
                        name: name.to_string(),
                        generation,
                    })?;
                preconditions.check(latest.as_ref())?;
                self.soft_delete_generation(&bucket_rec, &target).await?;
                vec![target.storage_path]
            }
            None => {
                if latest.is_none() {
                    return Err(Self::object_not_found(bucket, name));
                }
                preconditions.check(latest.as_ref())?;
                self.soft_delete_all(&bucket_rec, safe.as_str()).await?
            }
        };

        let bucket_root = self.bucket_root(&bucket_rec);
        for path in removed_paths {
            self.remove_payload(Path::new(&path), &bucket_root).await;
        }
        Ok(())
    }

    async fn soft_delete_generation(
        &self,
        bucket: &Bucket,
        target: &ObjectVersion,
    ) -> StorageResult<()> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "UPDATE object_versions SET deleted = 1, is_latest = 0, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(target.id)
        .execute(&mut *tx)
        .await?;

        let promoted = if target.is_latest {
            sqlx::query_scalar::<_, i64>(
                "UPDATE object_versions SET is_latest = 1
                 WHERE id = (
                     SELECT id FROM object_versions
                     WHERE bucket_id = ? AND name = ? AND deleted = 0
                     ORDER BY generation DESC LIMIT 1
                 )
                 RETURNING generation",
            )
            .bind(bucket.id)
            .bind(&target.name)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            None
        };

        tx.commit().await?;

        match (target.is_latest, promoted) {
            (true, Some(promoted)) => info!(
                "deleted {}/{} generation {}; promoted generation {}",
                bucket.name, target.name, target.generation, promoted
            ),
            (true, None) => info!(
                "deleted {}/{} generation {}; object now absent",
                bucket.name, target.name, target.generation
            ),
            (false, _) => info!(
                "deleted non-current {}/{} generation {}",
                bucket.name, target.name, target.generation
            ),
        }
        Ok(())
    }

    async fn soft_delete_all(&self, bucket: &Bucket, name: &str) -> StorageResult<Vec<String>> {
        let mut tx = self.db.begin().await?;
        let paths = sqlx::query_scalar::<_, String>(
            "UPDATE object_versions SET deleted = 1, is_latest = 0, updated_at = ?
             WHERE bucket_id = ? AND name = ? AND deleted = 0
             RETURNING storage_path",
        )
        .bind(Utc::now())
        .bind(bucket.id)
        .bind(name)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        info!("deleted all {} generations of {}/{}", paths.len(), bucket.name, name);
        Ok(paths)
    }

    /// Apply a metadata-only patch to the latest version and bump its metageneration.
    pub async fn update_metadata(
        &self,
        bucket: &str,
        name: &str,
        patch: ObjectPatch,
        preconditions: &Preconditions,
    ) -> StorageResult<ObjectVersion> {
        let safe = path_guard::sanitize(name)?;
        Self::ensure_bucket_name_safe(bucket)?;
        let _guard = self.locks.lock_object(bucket, safe.as_str()).await;

        let bucket_rec = self.fetch_bucket(bucket).await?;
        let latest = self
            .fetch_latest(&bucket_rec, safe.as_str())
            .await?
            .ok_or_else(|| Self::object_not_found(bucket, name))?;
        preconditions.check(Some(&latest))?;

        let mut metadata = latest.metadata.0.clone();
        if let Some(changes) = patch.metadata {
            for (key, value) in changes {
                match value {
                    Some(value) => {
                        metadata.insert(key, value);
                    }
                    None => {
                        metadata.remove(&key);
                    }
                }
            }
        }
        let content_type = patch
            .content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or(latest.content_type);

        let sql = format!(
            "UPDATE object_versions
             SET metageneration = metageneration + 1, content_type = ?, metadata = ?, updated_at = ?
             WHERE id = ?
             RETURNING {VERSION_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, ObjectVersion>(&sql)
            .bind(content_type)
            .bind(Json(metadata))
            .bind(Utc::now())
            .bind(latest.id)
            .fetch_one(&*self.db)
            .await?;

        debug!(
            "patched {}/{} generation {} to metageneration {}",
            bucket, updated.name, updated.generation, updated.metageneration
        );
        Ok(updated)
    }

    /// List objects in name order (then generation when listing versions).
    ///
    /// With a delimiter, names containing it after the prefix are folded into
    /// `prefixes`. Items and prefixes together fill at most `max_results`
    /// entries, and a page never ends inside a prefix group, so a prefix is
    /// reported on one page only. Page tokens have the form `{generation}:{name}`.
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_results = params.max_results.clamp(1, 1000);
        let batch_size = max_results + 1;
        let delimiter = params.delimiter.as_deref().filter(|d| !d.is_empty());

        let mut cursor = params.page_token.as_deref().map(parse_page_token).transpose()?;
        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();
        let mut next_page_token = None;

        'scan: loop {
            let rows = self
                .fetch_listing_batch(&bucket_rec, &params, cursor.as_ref(), batch_size)
                .await?;
            let exhausted = rows.len() < batch_size;

            for version in rows {
                let group = delimiter.and_then(|delim| {
                    compute_common_prefix(&version.name, params.prefix.as_deref(), delim)
                });
                let opens_entry = group.as_ref().is_none_or(|p| !prefixes.contains(p));
                if opens_entry && items.len() + prefixes.len() == max_results {
                    next_page_token = cursor
                        .as_ref()
                        .map(|(generation, name)| format!("{}:{}", generation, name));
                    break 'scan;
                }

                cursor = Some((version.generation, version.name.clone()));
                match group {
                    Some(prefix) => {
                        prefixes.insert(prefix);
                    }
                    None => items.push(version),
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(ListObjectsResult {
            items,
            prefixes: prefixes.into_iter().collect(),
            next_page_token,
        })
    }

    /// One ordered slice of the listing, strictly after `after`.
    async fn fetch_listing_batch(
        &self,
        bucket: &Bucket,
        params: &ListObjectsParams,
        after: Option<&(i64, String)>,
        limit: usize,
    ) -> StorageResult<Vec<ObjectVersion>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions WHERE bucket_id = "
        ));
        builder.push_bind(bucket.id);
        builder.push(" AND deleted = 0");
        if !params.versions {
            builder.push(" AND is_latest = 1");
        }

        if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
            builder.push(" AND substr(name, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix.to_string());
        }

        if let Some((generation, name)) = after {
            builder.push(" AND (name > ");
            builder.push_bind(name.clone());
            builder.push(" OR (name = ");
            builder.push_bind(name.clone());
            builder.push(" AND generation > ");
            builder.push_bind(*generation);
            builder.push("))");
        }

        builder.push(" ORDER BY name ASC, generation ASC LIMIT ");
        builder.push_bind(limit as i64);

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    /// Create a bucket and its directory.
    ///
    /// Returns BucketAlreadyExists if the name is taken.
    pub async fn create_bucket(&self, new: NewBucket) -> StorageResult<Bucket> {
        Self::ensure_bucket_name_safe(&new.name)?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: new.name,
            project: new.project,
            location: new.location.to_uppercase(),
            storage_class: new.storage_class.to_uppercase(),
            created_at: Utc::now(),
            versioning_enabled: new.versioning_enabled,
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, project, location, storage_class, created_at, versioning_enabled)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(&bucket.project)
        .bind(&bucket.location)
        .bind(&bucket.storage_class)
        .bind(bucket.created_at)
        .bind(bucket.versioning_enabled)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StorageError::BucketAlreadyExists(bucket.name));
            }
            Err(err) => return Err(StorageError::Sqlx(err)),
        }

        fs::create_dir_all(self.bucket_root(&bucket)).await?;
        info!("created bucket {} ({})", bucket.name, bucket.id);
        Ok(bucket)
    }

    pub async fn get_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.fetch_bucket(name).await
    }

    /// Resolve the bucket that owns a version row.
    pub async fn get_bucket_by_id(&self, id: Uuid) -> StorageResult<Bucket> {
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, project, location, storage_class, created_at, versioning_enabled
             FROM buckets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::BucketNotFound(id.to_string()))
    }

    /// Delete a bucket, every version it owns, and its directory tree.
    ///
    /// Waits for in-flight writers in the bucket and blocks new ones until
    /// done. Filesystem cleanup failures are logged; the database is the
    /// record of existence.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        Self::ensure_bucket_name_safe(name)?;
        let _guard = self.locks.lock_bucket(name).await;
        let bucket = self.fetch_bucket(name).await?;

        let mut tx = self.db.begin().await?;
        let versions = sqlx::query("DELETE FROM object_versions WHERE bucket_id = ?")
            .bind(bucket.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let bucket_path = self.bucket_root(&bucket);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }

        info!("deleted bucket {} with {} version rows", name, versions);
        Ok(())
    }

    /// Remove one payload file and prune the directories it leaves empty.
    async fn remove_payload(&self, path: &Path, bucket_root: &Path) {
        match fs::remove_file(path).await {
            Ok(_) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
            }
            Err(err) => warn!("failed to remove {}: {}", path.display(), err),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent, bucket_root).await;
        }
    }

    /// Recursively remove empty directories up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Names are validated before they reach here; exposed for callers that
    /// need the same check ahead of time (e.g. resumable initiation).
    pub fn validate_name(&self, name: &str) -> StorageResult<SafeName> {
        path_guard::sanitize(name)
    }

    pub async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<()> {
        self.fetch_bucket(bucket).await.map(|_| ())
    }
}

/// Attempts at creating a temp file whose directory a concurrent prune removed.
const CREATE_ATTEMPTS: usize = 8;

/// Create `dir` and a fresh temp file inside it.
///
/// Deleting another object may prune a parent directory between the two
/// steps, so a NotFound restarts from `create_dir_all`.
async fn create_temp_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut attempt = 1;
    loop {
        let created = match fs::create_dir_all(dir).await {
            Ok(()) => File::create(&tmp_path).await,
            Err(err) => Err(err),
        };
        match created {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == ErrorKind::NotFound && attempt < CREATE_ATTEMPTS => {
                debug!("{} vanished while creating a temp file, retrying", dir.display());
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Report a name whose path runs into another object's file or directory
/// (`a/v1` is both generation 1 of `a` and the directory of object `a/v1`).
fn layout_collision(err: io::Error, name: &SafeName) -> StorageError {
    match err.kind() {
        ErrorKind::AlreadyExists
        | ErrorKind::NotADirectory
        | ErrorKind::IsADirectory
        | ErrorKind::DirectoryNotEmpty => StorageError::Conflict(format!(
            "object name `{}` collides with the stored layout of another object",
            name
        )),
        _ => StorageError::Io(err),
    }
}

/// Write `body` to a temp file inside `dir`, fsync it and rename it to `target`.
///
/// Returns the hasher fed with every byte written. The temp file is removed
/// on any failure.
async fn write_atomically<S>(dir: &Path, target: &Path, body: S) -> io::Result<ContentHasher>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let (tmp_path, mut file) = create_temp_file(dir).await?;
    let mut hasher = ContentHasher::new();

    let result: io::Result<()> = async {
        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, target).await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    Ok(hasher)
}

fn parse_page_token(token: &str) -> StorageResult<(i64, String)> {
    token
        .split_once(':')
        .and_then(|(generation, name)| Some((generation.parse().ok()?, name.to_string())))
        .ok_or_else(|| StorageError::InvalidArgument("invalid page token".into()))
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Compute the grouped prefix for delimiter listings.
///
/// Returns Some(prefix) if the name continues past the requested prefix with
/// the delimiter, otherwise None.
fn compute_common_prefix(
    name: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    let prefix = requested_prefix.unwrap_or("");
    let after_prefix = name.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!("{}{}", prefix, &after_prefix[..pos + delimiter.len()]))
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
