//! In-process serialization for writers.
//!
//! Every mutation of an object holds its bucket's lock shared and the
//! object's own mutex exclusively; deleting a bucket holds the bucket lock
//! exclusively. Unrelated (bucket, name) pairs never contend. Entries are
//! dropped from the tables once nobody holds or waits for them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type ObjectKey = (String, String);

#[derive(Debug, Default)]
pub struct KeyLocks {
    buckets: DashMap<String, Arc<RwLock<()>>>,
    objects: DashMap<ObjectKey, Arc<Mutex<()>>>,
}

/// Held while a single object is being mutated.
pub struct ObjectGuard {
    locks: Arc<KeyLocks>,
    key: ObjectKey,
    object: Option<OwnedMutexGuard<()>>,
    bucket: Option<OwnedRwLockReadGuard<()>>,
}

/// Held while a whole bucket is being torn down.
pub struct BucketGuard {
    locks: Arc<KeyLocks>,
    bucket_name: String,
    guard: Option<OwnedRwLockWriteGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bucket_lock(&self, bucket: &str) -> Arc<RwLock<()>> {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Lock one (bucket, name) pair for writing.
    pub async fn lock_object(self: &Arc<Self>, bucket: &str, name: &str) -> ObjectGuard {
        let bucket_guard = self.bucket_lock(bucket).read_owned().await;

        let key = (bucket.to_string(), name.to_string());
        let object_lock = self.objects.entry(key.clone()).or_default().value().clone();
        let object_guard = object_lock.lock_owned().await;

        ObjectGuard {
            locks: Arc::clone(self),
            key,
            object: Some(object_guard),
            bucket: Some(bucket_guard),
        }
    }

    /// Lock an entire bucket, waiting for in-flight object writers to finish.
    pub async fn lock_bucket(self: &Arc<Self>, bucket: &str) -> BucketGuard {
        let guard = self.bucket_lock(bucket).write_owned().await;
        BucketGuard {
            locks: Arc::clone(self),
            bucket_name: bucket.to_string(),
            guard: Some(guard),
        }
    }

    fn prune_bucket(&self, bucket: &str) {
        self.buckets
            .remove_if(bucket, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn tracked(&self) -> (usize, usize) {
        (self.buckets.len(), self.objects.len())
    }
}

impl Drop for ObjectGuard {
    fn drop(&mut self) {
        self.object.take();
        self.bucket.take();
        self.locks
            .objects
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
        self.locks.prune_bucket(&self.key.0);
    }
}

impl Drop for BucketGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune_bucket(&self.bucket_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyLocks::new();
        let first = locks.lock_object("b", "k").await;

        let blocked = timeout(Duration::from_millis(50), locks.lock_object("b", "k")).await;
        assert!(blocked.is_err());

        drop(first);
        let second = timeout(Duration::from_millis(50), locks.lock_object("b", "k")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyLocks::new();
        let _a = locks.lock_object("b", "one").await;
        let other = timeout(Duration::from_millis(50), locks.lock_object("b", "two")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn bucket_lock_waits_for_object_writers() {
        let locks = KeyLocks::new();
        let writer = locks.lock_object("b", "k").await;

        let blocked = timeout(Duration::from_millis(50), locks.lock_bucket("b")).await;
        assert!(blocked.is_err());

        drop(writer);
        let bucket = timeout(Duration::from_millis(50), locks.lock_bucket("b")).await;
        assert!(bucket.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = KeyLocks::new();
        {
            let _guard = locks.lock_object("b", "k").await;
            assert_eq!(locks.tracked(), (1, 1));
        }
        assert_eq!(locks.tracked(), (0, 0));
    }
}
