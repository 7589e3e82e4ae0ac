//! Shared request/response types for planning and applying bucket policy grants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{PolicyError, RemoteWriteError};
use crate::policy::PolicyDocument;

/// Service principal CloudFront uses when it signs origin requests with OAC
pub const CLOUDFRONT_SERVICE_PRINCIPAL: &str = "cloudfront.amazonaws.com";

/// Read access for one named service, scoped to one distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionGrant {
    /// Service principal, e.g. `cloudfront.amazonaws.com`
    pub principal_service: String,
    /// ARN of the single distribution allowed to read
    pub distribution_identity: String,
    /// Bucket ARN (or a path under it); `/*` is appended
    pub resource_prefix: String,
}

impl DistributionGrant {
    pub fn new(
        principal_service: impl Into<String>,
        distribution_identity: impl Into<String>,
        resource_prefix: impl Into<String>,
    ) -> Self {
        Self {
            principal_service: principal_service.into(),
            distribution_identity: distribution_identity.into(),
            resource_prefix: resource_prefix.into(),
        }
    }
}

/// Shape of the statement a grant renders to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSettings {
    /// Preferred statement id; a numeric suffix is added on collision
    pub sid: String,
    pub actions: Vec<String>,
    pub condition_operator: String,
    pub condition_key: String,
}

impl Default for GrantSettings {
    fn default() -> Self {
        Self {
            sid: "AllowCloudFrontServicePrincipal".to_string(),
            actions: vec!["s3:GetObject".to_string()],
            condition_operator: "StringEquals".to_string(),
            condition_key: "AWS:SourceArn".to_string(),
        }
    }
}

/// What the merge did to the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "sid")]
pub enum MergeStatus {
    /// A new statement was appended under this Sid
    Added(String),
    /// An equivalent grant already existed; the Sid is `None` if it had none
    Unchanged(Option<String>),
}

/// Result of merging a grant into a document.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub document: PolicyDocument,
    pub status: MergeStatus,
}

impl MergeOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self.status, MergeStatus::Added(_))
    }
}

/// Read-only facts about the origin bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDescriptor {
    pub name: String,
    pub arn: String,
    pub region: String,
    /// `{bucket}.s3.{region}.amazonaws.com`
    pub regional_domain_name: String,
}

/// One origin of a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginDescriptor {
    pub domain_name: String,
    pub origin_access_control_id: Option<String>,
}

/// Identity of a CloudFront distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionDescriptor {
    pub id: String,
    pub arn: String,
    pub domain_name: String,
    pub origins: Vec<OriginDescriptor>,
}

impl DistributionDescriptor {
    /// OAC id attached to the origin pointing at `domain_name`, if any.
    pub fn origin_access_control_for(&self, domain_name: &str) -> Option<&str> {
        self.origins
            .iter()
            .find(|origin| origin.domain_name.eq_ignore_ascii_case(domain_name))
            .and_then(|origin| origin.origin_access_control_id.as_deref())
    }
}

/// Input to the plan step.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub bucket: String,
    pub distribution_id: String,
    pub service_principal: String,
    pub settings: GrantSettings,
}

impl PlanRequest {
    pub fn new(bucket: impl Into<String>, distribution_id: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            distribution_id: distribution_id.into(),
            service_principal: CLOUDFRONT_SERVICE_PRINCIPAL.to_string(),
            settings: GrantSettings::default(),
        }
    }
}

/// A computed, not yet written, bucket policy change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanResult {
    pub bucket: BucketDescriptor,
    pub distribution: DistributionDescriptor,
    pub grant: DistributionGrant,
    pub settings: GrantSettings,
    /// Policy currently attached to the bucket, if any
    pub existing: Option<PolicyDocument>,
    pub proposed: PolicyDocument,
    pub status: MergeStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Write even when the plan found nothing to change
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub bucket: String,
    pub written: bool,
    pub status: MergeStatus,
    pub statement_count: usize,
    /// Time of the write; `None` when nothing was written
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Returned as reported by the store. Not retried.
    #[error("Remote policy write failed: {0}")]
    RemoteWrite(#[from] RemoteWriteError),
}

impl ApplyError {
    pub fn is_insecure_grant(&self) -> bool {
        matches!(self, Self::Policy(err) if err.is_insecure_grant())
    }
}

pub type ApplyResultWithError = Result<ApplyResult, ApplyError>;
