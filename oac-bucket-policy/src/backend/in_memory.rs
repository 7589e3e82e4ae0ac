use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{BucketLookup, DistributionLookup, PolicyStore};
use crate::aws::{AwsError, AwsResult};
use crate::error::RemoteWriteError;
use crate::types::{BucketDescriptor, DistributionDescriptor};

/// In-process stand-in for S3 and CloudFront.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    buckets: Mutex<HashMap<String, BucketDescriptor>>,
    distributions: Mutex<HashMap<String, DistributionDescriptor>>,
    policies: Mutex<HashMap<String, String>>,
    pending_failure: Mutex<Option<RemoteWriteError>>,
    writes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, bucket: BucketDescriptor) -> Self {
        lock(&self.buckets).insert(bucket.name.clone(), bucket);
        self
    }

    pub fn with_distribution(self, distribution: DistributionDescriptor) -> Self {
        lock(&self.distributions).insert(distribution.id.clone(), distribution);
        self
    }

    pub fn with_policy(self, bucket: impl Into<String>, policy: impl Into<String>) -> Self {
        lock(&self.policies).insert(bucket.into(), policy.into());
        self
    }

    /// Make the next `replace_policy` call fail with `error`.
    pub fn fail_next_write(&self, error: RemoteWriteError) {
        *lock(&self.pending_failure) = Some(error);
    }

    /// Policy text currently stored for `bucket`.
    pub fn policy(&self, bucket: &str) -> Option<String> {
        lock(&self.policies).get(bucket).cloned()
    }

    /// Number of successful policy writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BucketLookup for InMemoryBackend {
    async fn describe_bucket(&self, name: &str) -> AwsResult<BucketDescriptor> {
        lock(&self.buckets)
            .get(name)
            .cloned()
            .ok_or_else(|| AwsError::BucketNotFound(name.to_string()))
    }
}

#[async_trait]
impl DistributionLookup for InMemoryBackend {
    async fn describe_distribution(&self, id: &str) -> AwsResult<DistributionDescriptor> {
        lock(&self.distributions)
            .get(id)
            .cloned()
            .ok_or_else(|| AwsError::DistributionNotFound(id.to_string()))
    }
}

#[async_trait]
impl PolicyStore for InMemoryBackend {
    async fn fetch_policy(&self, bucket: &str) -> AwsResult<Option<String>> {
        if !lock(&self.buckets).contains_key(bucket) {
            return Err(AwsError::BucketNotFound(bucket.to_string()));
        }
        Ok(lock(&self.policies).get(bucket).cloned())
    }

    async fn replace_policy(&self, bucket: &str, policy: &str) -> Result<(), RemoteWriteError> {
        if let Some(error) = lock(&self.pending_failure).take() {
            return Err(error);
        }
        if !lock(&self.buckets).contains_key(bucket) {
            return Err(RemoteWriteError::NotFound(bucket.to_string()));
        }
        lock(&self.policies).insert(bucket.to_string(), policy.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
