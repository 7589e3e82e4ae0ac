//! This crate provides the core logic for attaching a CloudFront distribution
//! to an existing S3 bucket through Origin Access Control:
//! - Lossless bucket policy parsing and rendering
//! - Merging a distribution-scoped read grant without weakening existing statements
//! - Policy evaluation
//! - Bucket/distribution lookup and whole-document policy writes (plan/apply)
//!

pub mod aws;
pub mod backend;
pub mod commands;
mod error;
pub mod evaluation;
mod parsing;
pub mod policy;
mod synthesis;
mod types;

// Re-exports for a small, focused public API
pub use aws::arn::{bucket_arn, partition_for_region};
pub use aws::AwsError;
pub use backend::{BucketLookup, DistributionLookup, InMemoryBackend, PolicyStore};
pub use commands::BucketPolicyService;
pub use error::{OacPolicyError, OacPolicyResult, PolicyError, RemoteWriteError};
pub use evaluation::{Caller, Decision, PolicyEvaluator, RequestContext};
pub use parsing::{parse_policy, render_policy, render_policy_compact};
pub use policy::{Condition, Effect, OneOrMany, PolicyDocument, Principal, Statement};
pub use synthesis::merge::{append_statement, MAX_SID_ATTEMPTS};
pub use synthesis::{build_grant_statement, merge_grant, normalize_resource_prefix, validate_grant};
pub use types::{
    ApplyError, ApplyOptions, ApplyResult, BucketDescriptor, DistributionDescriptor,
    DistributionGrant, GrantSettings, MergeOutcome, MergeStatus, OriginDescriptor, PlanRequest,
    PlanResult, CLOUDFRONT_SERVICE_PRINCIPAL,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sample_policy() {
        let existing = parse_policy(
            r#"{"Version":"2012-10-17","Statement":[{"Sid":"IPAllow","Effect":"Allow","Principal":"*","Action":"s3:GetObject","Resource":"arn:aws:s3:::my-bucket/*","Condition":{"IpAddress":{"aws:SourceIp":"203.0.113.10/32"}}}]}"#,
        )
        .expect("should parse");
        let grant = DistributionGrant::new(
            CLOUDFRONT_SERVICE_PRINCIPAL,
            "arn:aws:cloudfront::123456789012:distribution/EDFDVBD6EXAMPLE",
            bucket_arn("aws", "my-bucket"),
        );

        let merged = merge_grant(Some(&existing), &grant, &GrantSettings::default())
            .expect("should merge");
        assert_eq!(merged.document.statements().len(), 2);
        assert_eq!(merged.document.statements()[0], existing.statements()[0]);
    }
}
