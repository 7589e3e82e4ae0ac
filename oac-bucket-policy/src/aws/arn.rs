//! ARN and endpoint helpers for S3 buckets and CloudFront distributions

/// Partition a region belongs to.
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    }
}

/// `arn:{partition}:s3:::{bucket}`
pub fn bucket_arn(partition: &str, bucket: &str) -> String {
    format!("arn:{partition}:s3:::{bucket}")
}

/// Regional REST endpoint CloudFront uses as the origin domain for an S3 bucket.
pub fn regional_domain_name(bucket: &str, region: &str) -> String {
    let suffix = if partition_for_region(region) == "aws-cn" {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    format!("{bucket}.s3.{region}.{suffix}")
}

/// Extract the 12-digit account id (field 5 of a colon-delimited ARN).
pub fn extract_account_from_arn(arn: &str) -> Option<String> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() < 6 || parts[0] != "arn" {
        return None;
    }
    let account_id = parts[4];
    if account_id.len() == 12 && account_id.chars().all(|c| c.is_ascii_digit()) {
        Some(account_id.to_string())
    } else {
        None
    }
}
