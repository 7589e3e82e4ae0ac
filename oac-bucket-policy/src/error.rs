//! Error types for bucket policy operations

use crate::aws::AwsError;
use thiserror::Error;

/// Errors raised by the pure policy layer (codec, grant builder, merge).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The grant would not be scoped to a single distribution. Blocks the write.
    #[error("Insecure grant: {0}")]
    InsecureGrant(String),

    /// A generated statement id collides with an existing one.
    #[error("Statement id '{0}' already exists in the policy")]
    DuplicateStatementId(String),

    #[error("Resource prefix must not be empty")]
    EmptyResourcePrefix,

    #[error("Grant must name at least one action")]
    NoActions,

    /// The policy text could not be decoded or violates the document structure.
    #[error("Malformed policy document: {0}")]
    MalformedPolicy(String),
}

impl PolicyError {
    pub fn insecure(reason: impl Into<String>) -> Self {
        Self::InsecureGrant(reason.into())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPolicy(reason.into())
    }

    pub fn is_insecure_grant(&self) -> bool {
        matches!(self, Self::InsecureGrant(_))
    }
}

/// Failure reported by the remote policy write, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteWriteError {
    #[error("remote rejected the policy document: {0}")]
    MalformedDocument(String),
    #[error("insufficient permission to write the bucket policy: {0}")]
    PermissionDenied(String),
    #[error("bucket not found: {0}")]
    NotFound(String),
    #[error("bucket policy write failed: {0}")]
    Other(String),
}

/// Top-level error for the plan step.
#[derive(Debug, Error)]
pub enum OacPolicyError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Aws(#[from] AwsError),
}

impl OacPolicyError {
    pub fn is_insecure_grant(&self) -> bool {
        matches!(self, Self::Policy(err) if err.is_insecure_grant())
    }
}

pub type OacPolicyResult<T> = Result<T, OacPolicyError>;
