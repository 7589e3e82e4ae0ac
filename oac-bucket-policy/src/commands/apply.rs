//! Apply logic for the bucket policy service

use log::info;

use crate::parsing::render_policy_compact;
use crate::synthesis::validate_grant;
use crate::types::{ApplyOptions, ApplyResult, ApplyResultWithError, MergeStatus, PlanResult};

impl super::service::BucketPolicyService {
    /// Write a plan's proposed policy to the bucket.
    ///
    /// The grant and its condition settings are validated again so an
    /// unscoped grant can never reach the bucket. The write replaces the whole policy and is not retried; a
    /// failure is returned exactly as the store reported it.
    pub async fn apply(&self, plan: &PlanResult, options: ApplyOptions) -> ApplyResultWithError {
        validate_grant(&plan.grant, &plan.settings)?;

        let statement_count = plan.proposed.statements().len();
        if matches!(plan.status, MergeStatus::Unchanged(_)) && !options.force {
            info!(
                "Bucket '{}' already grants {}; nothing to write",
                plan.bucket.name, plan.grant.distribution_identity
            );
            return Ok(ApplyResult {
                bucket: plan.bucket.name.clone(),
                written: false,
                status: plan.status.clone(),
                statement_count,
                applied_at: None,
            });
        }

        let body = render_policy_compact(&plan.proposed)?;
        self.policies
            .replace_policy(&plan.bucket.name, &body)
            .await?;
        info!(
            "Granted {} read access to '{}' ({} statements)",
            plan.grant.distribution_identity, plan.bucket.name, statement_count
        );

        Ok(ApplyResult {
            bucket: plan.bucket.name.clone(),
            written: true,
            status: plan.status.clone(),
            statement_count,
            applied_at: Some(chrono::Utc::now()),
        })
    }
}
