//! Bucket policy service layer
//!
//! The service holds the bucket, distribution and policy collaborators and
//! exposes the high-level operations (plan, apply) used by the CLI.

use std::sync::Arc;

use aws_sdk_cloudfront::Client as CloudFrontClient;

use crate::aws::{CloudFrontDistributionClient, S3BucketClient};
use crate::backend::{BucketLookup, DistributionLookup, InMemoryBackend, PolicyStore};

/// Main service struct that holds the collaborators and provides plan/apply
pub struct BucketPolicyService {
    pub(crate) buckets: Arc<dyn BucketLookup>,
    pub(crate) distributions: Arc<dyn DistributionLookup>,
    pub(crate) policies: Arc<dyn PolicyStore>,
}

impl BucketPolicyService {
    /// Create a service backed by S3 and CloudFront.
    ///
    /// Credentials and region come from the default provider chain; `region`
    /// overrides the configured region.
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        let s3 = Arc::new(S3BucketClient::new(&config));
        Self {
            buckets: s3.clone(),
            distributions: Arc::new(CloudFrontDistributionClient::new(CloudFrontClient::new(
                &config,
            ))),
            policies: s3,
        }
    }

    /// Create a service from explicit collaborators.
    pub fn with_backends(
        buckets: Arc<dyn BucketLookup>,
        distributions: Arc<dyn DistributionLookup>,
        policies: Arc<dyn PolicyStore>,
    ) -> Self {
        Self {
            buckets,
            distributions,
            policies,
        }
    }

    /// Create a service where one in-memory backend plays every role.
    pub fn in_memory(backend: Arc<InMemoryBackend>) -> Self {
        Self::with_backends(backend.clone(), backend.clone(), backend)
    }

    // plan() method implementation is in plan.rs
    // apply() method implementation is in apply.rs
}
