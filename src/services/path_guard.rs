//! Object-name validation and on-disk path resolution.
//!
//! Object names arrive from clients; before any of them touches the
//! filesystem the name is checked lexically and the resolved path is
//! verified to stay under the bucket root.

use crate::services::version_store::{StorageError, StorageResult};
use std::{
    fmt,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

const MAX_OBJECT_NAME_LEN: usize = 1024;

/// An object name that passed [`sanitize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeName(String);

impl SafeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn invalid(reason: &str) -> StorageError {
    StorageError::InvalidObjectName(reason.to_string())
}

/// Validate a caller-supplied object name.
///
/// Rejects empty names, `..` anywhere, backslashes, a leading `/`, drive
/// prefixes such as `C:`, control characters, and empty or `.` segments
/// (those would collapse onto another name's directory).
pub fn sanitize(name: &str) -> StorageResult<SafeName> {
    if name.is_empty() {
        return Err(invalid("object name must not be empty"));
    }
    if name.len() > MAX_OBJECT_NAME_LEN {
        return Err(invalid("object name exceeds 1024 bytes"));
    }
    if name.contains("..") {
        return Err(invalid("object name must not contain `..`"));
    }
    if name.contains('\\') {
        return Err(invalid("object name must not contain backslashes"));
    }
    if name.starts_with('/') {
        return Err(invalid("object name must not start with `/`"));
    }
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(invalid("object name must not start with a drive prefix"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("object name must not contain control characters"));
    }
    if name.split('/').any(|segment| segment.is_empty() || segment == ".") {
        return Err(invalid("object name must not contain empty or `.` segments"));
    }
    Ok(SafeName(name.to_string()))
}

/// Resolve the directory holding every generation of `name` under `bucket_root`.
///
/// The joined path is normalised component by component and, for the part
/// that already exists on disk, canonicalised and compared against the
/// canonical bucket root so that symlinks cannot lead outside it.
pub fn resolve(bucket_root: &Path, name: &SafeName) -> StorageResult<PathBuf> {
    let mut resolved = bucket_root.to_path_buf();
    for component in Path::new(name.as_str()).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            _ => return Err(invalid("object name resolves outside the bucket")),
        }
    }

    let root = match bucket_root.canonicalize() {
        Ok(root) => root,
        // Nothing exists yet, so nothing can be a symlink.
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(resolved),
        Err(err) => return Err(StorageError::Io(err)),
    };

    let mut probe = resolved.as_path();
    loop {
        match probe.canonicalize() {
            Ok(real) => {
                if !real.starts_with(&root) {
                    return Err(invalid("object name resolves outside the bucket"));
                }
                break;
            }
            // A file in the middle of the path is checked like any existing ancestor.
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                match probe.parent() {
                    Some(parent) => probe = parent,
                    None => break,
                }
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
    }

    Ok(resolved)
}

/// File name of a single generation inside an object's directory.
pub fn version_file_name(generation: i64) -> String {
    format!("v{}", generation)
}
