//! CloudFront client wrapper for distribution lookup

use async_trait::async_trait;
use aws_sdk_cloudfront::Client as CloudFrontClient;

use crate::aws::{AwsError, AwsResult};
use crate::backend::DistributionLookup;
use crate::types::{DistributionDescriptor, OriginDescriptor};

pub struct CloudFrontDistributionClient {
    client: CloudFrontClient,
}

impl CloudFrontDistributionClient {
    pub fn new(client: CloudFrontClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DistributionLookup for CloudFrontDistributionClient {
    async fn describe_distribution(&self, id: &str) -> AwsResult<DistributionDescriptor> {
        let output = self
            .client
            .get_distribution()
            .id(id)
            .send()
            .await
            .map_err(|e| {
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_no_such_distribution())
                {
                    AwsError::DistributionNotFound(id.to_string())
                } else {
                    AwsError::CloudFrontError(format!(
                        "Failed to get distribution '{id}': {e:?}"
                    ))
                }
            })?;

        let distribution = output.distribution().ok_or_else(|| {
            AwsError::CloudFrontError(format!("GetDistribution returned no body for '{id}'"))
        })?;

        let origins = distribution
            .distribution_config()
            .and_then(|config| config.origins())
            .map(|origins| origins.items())
            .unwrap_or_default()
            .iter()
            .map(|origin| OriginDescriptor {
                domain_name: origin.domain_name().to_string(),
                origin_access_control_id: origin
                    .origin_access_control_id()
                    .filter(|oac| !oac.is_empty())
                    .map(str::to_string),
            })
            .collect();

        Ok(DistributionDescriptor {
            id: distribution.id().to_string(),
            arn: distribution.arn().to_string(),
            domain_name: distribution.domain_name().to_string(),
            origins,
        })
    }
}
