//! Plan creation for the bucket policy service

use log::{debug, warn};

use crate::error::OacPolicyResult;
use crate::parsing::parse_policy;
use crate::synthesis::merge_grant;
use crate::types::{DistributionGrant, PlanRequest, PlanResult};

impl super::service::BucketPolicyService {
    /// Create an execution plan for granting a distribution read access.
    ///
    /// Looks up the bucket and distribution, reads the bucket's current policy
    /// and merges the scoped grant into it. Nothing is written.
    pub async fn plan(&self, request: &PlanRequest) -> OacPolicyResult<PlanResult> {
        let bucket = self.buckets.describe_bucket(&request.bucket).await?;
        let distribution = self
            .distributions
            .describe_distribution(&request.distribution_id)
            .await?;

        match distribution.origin_access_control_for(&bucket.regional_domain_name) {
            Some(oac_id) => debug!(
                "Distribution {} reaches {} through OAC {oac_id}",
                distribution.id, bucket.regional_domain_name
            ),
            None if distribution
                .origins
                .iter()
                .any(|o| o.domain_name.eq_ignore_ascii_case(&bucket.regional_domain_name)) =>
            {
                warn!(
                    "Distribution {} has an origin for {} but no origin access control; it will not sign requests to the bucket",
                    distribution.id, bucket.regional_domain_name
                )
            }
            None => warn!(
                "Distribution {} has no origin pointing at {}",
                distribution.id, bucket.regional_domain_name
            ),
        }

        let existing = match self.policies.fetch_policy(&bucket.name).await? {
            Some(text) => Some(parse_policy(&text)?),
            None => None,
        };

        let grant = DistributionGrant::new(
            request.service_principal.clone(),
            distribution.arn.clone(),
            bucket.arn.clone(),
        );
        let outcome = merge_grant(existing.as_ref(), &grant, &request.settings)?;

        Ok(PlanResult {
            bucket,
            distribution,
            grant,
            settings: request.settings.clone(),
            existing,
            proposed: outcome.document,
            status: outcome.status,
        })
    }
}
