//! JSON resource representations returned by the API.
//!
//! Numeric counters are string-encoded and timestamps carry millisecond
//! precision with a `Z` suffix, matching the emulated API.

use crate::models::{bucket::Bucket, object::ObjectVersion};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Join `segments` onto `base`, percent-encoding each one (including `/`
/// inside object names).
pub fn resource_url(base: &str, segments: &[&str]) -> String {
    match Url::parse(base) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(segments);
            }
            url.into()
        }
        _ => format!("{}/{}", base.trim_end_matches('/'), segments.join("/")),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResource {
    pub kind: &'static str,
    pub id: String,
    pub self_link: String,
    pub media_link: String,
    pub name: String,
    pub bucket: String,
    pub generation: String,
    pub metageneration: String,
    pub content_type: String,
    pub storage_class: String,
    pub size: String,
    pub md5_hash: String,
    pub crc32c: String,
    pub etag: String,
    pub time_created: String,
    pub updated: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectResource {
    /// `bucket` is the public bucket; the version's internal bucket id never leaves the server.
    pub fn new(public_url: &str, bucket: &Bucket, version: &ObjectVersion) -> Self {
        let self_link = resource_url(
            public_url,
            &["storage", "v1", "b", &bucket.name, "o", &version.name],
        );
        let media_link = format!(
            "{}?generation={}&alt=media",
            resource_url(
                public_url,
                &["download", "storage", "v1", "b", &bucket.name, "o", &version.name],
            ),
            version.generation
        );
        Self {
            kind: "storage#object",
            id: format!("{}/{}/{}", bucket.name, version.name, version.generation),
            self_link,
            media_link,
            name: version.name.clone(),
            bucket: bucket.name.clone(),
            generation: version.generation.to_string(),
            metageneration: version.metageneration.to_string(),
            content_type: version.content_type.clone(),
            storage_class: bucket.storage_class.clone(),
            size: version.size_bytes.to_string(),
            md5_hash: version.md5_hash.clone(),
            crc32c: version.crc32c.clone(),
            etag: version.etag.clone(),
            time_created: timestamp(&version.created_at),
            updated: timestamp(&version.updated_at),
            metadata: version.metadata.0.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Versioning {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketResource {
    pub kind: &'static str,
    pub id: String,
    pub self_link: String,
    pub name: String,
    pub project_number: String,
    pub location: String,
    pub storage_class: String,
    pub time_created: String,
    pub updated: String,
    pub versioning: Versioning,
}

impl BucketResource {
    pub fn new(public_url: &str, bucket: &Bucket) -> Self {
        Self {
            kind: "storage#bucket",
            id: bucket.name.clone(),
            self_link: resource_url(public_url, &["storage", "v1", "b", &bucket.name]),
            name: bucket.name.clone(),
            project_number: bucket.project.clone(),
            location: bucket.location.clone(),
            storage_class: bucket.storage_class.clone(),
            time_created: timestamp(&bucket.created_at),
            updated: timestamp(&bucket.created_at),
            versioning: Versioning {
                enabled: bucket.versioning_enabled,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ObjectResource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prefixes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}
