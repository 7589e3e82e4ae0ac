//! Collaborator seams: bucket lookup, distribution lookup, and the bucket policy slot.
//!
//! The service layer only talks to these traits. AWS-backed implementations
//! live in [`crate::aws`]; [`InMemoryBackend`] serves tests and dry runs.

mod in_memory;

pub use in_memory::InMemoryBackend;

use async_trait::async_trait;

use crate::aws::AwsResult;
use crate::error::RemoteWriteError;
use crate::types::{BucketDescriptor, DistributionDescriptor};

/// Read-only lookup of an existing bucket. Never creates or modifies it.
#[async_trait]
pub trait BucketLookup: Send + Sync {
    async fn describe_bucket(&self, name: &str) -> AwsResult<BucketDescriptor>;
}

/// Lookup of a CloudFront distribution by id.
#[async_trait]
pub trait DistributionLookup: Send + Sync {
    async fn describe_distribution(&self, id: &str) -> AwsResult<DistributionDescriptor>;
}

/// The bucket's policy slot. Writes replace the whole document; there is no
/// version check, so concurrent writers race and the last one wins.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Current policy text, or `None` when the bucket has no policy.
    async fn fetch_policy(&self, bucket: &str) -> AwsResult<Option<String>>;

    async fn replace_policy(&self, bucket: &str, policy: &str) -> Result<(), RemoteWriteError>;
}
