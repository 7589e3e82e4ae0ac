//! Commands module - service layer for planning and applying bucket policy grants

mod apply;
mod plan;
pub(crate) mod service;

pub use service::BucketPolicyService;
