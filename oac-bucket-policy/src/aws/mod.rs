//! AWS SDK integration: S3 bucket/policy client, CloudFront distribution lookup, ARN helpers.

pub mod arn;
pub(crate) mod cloudfront_client;
pub(crate) mod s3_client;

pub use cloudfront_client::CloudFrontDistributionClient;
pub use s3_client::S3BucketClient;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("AWS configuration error: {0}")]
    ConfigError(String),
    #[error("S3 client error: {0}")]
    S3Error(String),
    #[error("CloudFront client error: {0}")]
    CloudFrontError(String),
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),
    #[error("Distribution not found: {0}")]
    DistributionNotFound(String),
}

pub type AwsResult<T> = Result<T, AwsError>;
