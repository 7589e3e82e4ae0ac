//! Request context for policy evaluation

use std::collections::HashMap;
use std::net::IpAddr;

/// The identity making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Unauthenticated request
    Anonymous,
    /// An AWS service principal, e.g. `cloudfront.amazonaws.com`
    Service(String),
    /// An IAM user, role or account root, by ARN
    Aws(String),
}

/// A single access request. Condition keys are stored lower-cased since
/// IAM condition keys are case-insensitive.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub caller: Caller,
    pub action: String,
    pub resource: String,
    keys: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(caller: Caller, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            caller,
            action: action.into(),
            resource: resource.into(),
            keys: HashMap::new(),
        }
    }

    pub fn with_source_ip(self, ip: IpAddr) -> Self {
        self.with_key("aws:SourceIp", ip.to_string())
    }

    pub fn with_source_arn(self, arn: impl Into<String>) -> Self {
        self.with_key("aws:SourceArn", arn)
    }

    pub fn with_secure_transport(self, secure: bool) -> Self {
        self.with_key("aws:SecureTransport", secure.to_string())
    }

    /// Add an arbitrary condition key.
    pub fn with_key(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.keys
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a condition key, ignoring case.
    pub fn key(&self, key: &str) -> Option<&str> {
        self.keys
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }
}
