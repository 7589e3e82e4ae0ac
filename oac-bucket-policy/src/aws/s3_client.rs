//! S3 client wrapper for bucket lookup and bucket policy reads/writes

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client as S3Client;
use log::{debug, info};

use crate::aws::arn::{bucket_arn, partition_for_region, regional_domain_name};
use crate::aws::{AwsError, AwsResult};
use crate::backend::{BucketLookup, PolicyStore};
use crate::error::RemoteWriteError;
use crate::types::BucketDescriptor;

/// Header S3 sets to the bucket's real region on a wrong-region response
const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Error codes S3 returns when a request reaches the wrong regional endpoint
const WRONG_REGION_CODES: [&str; 3] = [
    "PermanentRedirect",
    "AuthorizationHeaderMalformed",
    "IllegalLocationConstraintException",
];

pub struct S3BucketClient {
    config: SdkConfig,
    client: S3Client,
    /// Region used when HeadBucket does not report one
    default_region: Option<String>,
    /// Clients for buckets that live outside the configured region, by bucket name
    regional: Mutex<HashMap<String, S3Client>>,
}

impl S3BucketClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            config: config.clone(),
            client: S3Client::new(config),
            default_region: config.region().map(|r| r.as_ref().to_string()),
            regional: Mutex::new(HashMap::new()),
        }
    }

    fn client_for_region(&self, region: &str) -> S3Client {
        let config = aws_sdk_s3::config::Builder::from(&self.config)
            .region(Region::new(region.to_string()))
            .build();
        S3Client::from_conf(config)
    }

    /// Route later calls for `bucket` to `region` when it is not the default.
    fn remember_region(&self, bucket: &str, region: &str) {
        if self.default_region.as_deref() == Some(region) {
            return;
        }
        debug!("Bucket '{bucket}' is outside the configured region; using {region}");
        let client = self.client_for_region(region);
        self.regional
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bucket.to_string(), client);
    }

    fn client_for(&self, bucket: &str) -> S3Client {
        self.regional
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .cloned()
            .unwrap_or_else(|| self.client.clone())
    }
}

fn is_wrong_region(code: Option<&str>, status: Option<u16>) -> bool {
    status == Some(301) || code.is_some_and(|c| WRONG_REGION_CODES.contains(&c))
}

fn wrong_region_message(action: &str, bucket: &str) -> String {
    format!(
        "{action} for bucket '{bucket}' reached the wrong region; pass --region with the bucket's region"
    )
}

#[async_trait]
impl BucketLookup for S3BucketClient {
    async fn describe_bucket(&self, name: &str) -> AwsResult<BucketDescriptor> {
        let head = |client: S3Client| async move { client.head_bucket().bucket(name).send().await };

        let output = match head(self.client.clone()).await {
            Ok(output) => output,
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                let hinted_region = e
                    .raw_response()
                    .and_then(|r| r.headers().get(BUCKET_REGION_HEADER))
                    .map(str::to_string);
                match hinted_region {
                    Some(region) if self.default_region.as_deref() != Some(region.as_str()) => {
                        debug!("HeadBucket for '{name}' redirected to {region}");
                        let output = head(self.client_for_region(&region))
                            .await
                            .map_err(|e| {
                                AwsError::S3Error(format!(
                                    "Failed to describe bucket '{name}' in {region}: {e:?}"
                                ))
                            })?;
                        self.remember_region(name, &region);
                        output
                    }
                    _ if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                        return Err(AwsError::BucketNotFound(name.to_string()))
                    }
                    _ if is_wrong_region(e.code(), status) => {
                        return Err(AwsError::ConfigError(wrong_region_message(
                            "HeadBucket",
                            name,
                        )))
                    }
                    _ => {
                        return Err(AwsError::S3Error(format!(
                            "Failed to describe bucket '{name}': {e:?}"
                        )))
                    }
                }
            }
        };

        let region = output
            .bucket_region()
            .map(str::to_string)
            .or_else(|| self.default_region.clone())
            .ok_or_else(|| {
                AwsError::ConfigError(format!(
                    "could not determine the region of bucket '{name}'; pass --region"
                ))
            })?;
        debug!("Bucket '{name}' is in region {region}");
        self.remember_region(name, &region);

        Ok(BucketDescriptor {
            name: name.to_string(),
            arn: bucket_arn(partition_for_region(&region), name),
            regional_domain_name: regional_domain_name(name, &region),
            region,
        })
    }
}

#[async_trait]
impl PolicyStore for S3BucketClient {
    async fn fetch_policy(&self, bucket: &str) -> AwsResult<Option<String>> {
        let client = self.client_for(bucket);
        match client.get_bucket_policy().bucket(bucket).send().await {
            Ok(output) => Ok(output.policy().map(str::to_string)),
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                match e.code() {
                    Some("NoSuchBucketPolicy") => {
                        debug!("Bucket '{bucket}' has no policy yet");
                        Ok(None)
                    }
                    Some("NoSuchBucket") => Err(AwsError::BucketNotFound(bucket.to_string())),
                    code if is_wrong_region(code, status) => Err(AwsError::ConfigError(
                        wrong_region_message("GetBucketPolicy", bucket),
                    )),
                    _ => Err(AwsError::S3Error(format!(
                        "Failed to get bucket policy for '{bucket}': {e:?}"
                    ))),
                }
            }
        }
    }

    async fn replace_policy(&self, bucket: &str, policy: &str) -> Result<(), RemoteWriteError> {
        let client = self.client_for(bucket);
        client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                let message = e
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{e:?}"));
                match e.code() {
                    Some("MalformedPolicy") => RemoteWriteError::MalformedDocument(message),
                    Some("AccessDenied") => RemoteWriteError::PermissionDenied(message),
                    Some("NoSuchBucket") => RemoteWriteError::NotFound(message),
                    code if is_wrong_region(code, status) => RemoteWriteError::Other(format!(
                        "{message} ({})",
                        wrong_region_message("PutBucketPolicy", bucket)
                    )),
                    _ => RemoteWriteError::Other(message),
                }
            })?;
        info!("Replaced bucket policy on '{bucket}'");
        Ok(())
    }
}
