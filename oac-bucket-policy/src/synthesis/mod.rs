//! Grant synthesis and policy merging (pure, deterministic)

pub mod merge;
pub mod policy_builder;

pub use merge::merge_grant;
pub use policy_builder::{build_grant_statement, normalize_resource_prefix, validate_grant};
