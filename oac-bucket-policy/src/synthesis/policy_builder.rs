//! Grant validation and statement construction

use serde_json::Value;

use crate::error::PolicyError;
use crate::policy::{Condition, Principal, Statement};
use crate::types::{DistributionGrant, GrantSettings};

/// Characters that make an ARN match more than one distribution
const WILDCARD_CHARS: [char; 2] = ['*', '?'];

/// Operators that only match the named ARN. Negated and `IfExists` forms are
/// excluded: they let other distributions, or unsigned requests, through.
const SCOPING_OPERATORS: [&str; 4] = ["StringEquals", "StringLike", "ArnEquals", "ArnLike"];

/// Condition keys carrying the calling distribution's ARN
const SOURCE_ARN_KEYS: [&str; 2] = ["aws:SourceArn", "SourceArn"];

/// Reject grants that are not scoped to exactly one distribution.
pub fn validate_grant(grant: &DistributionGrant, settings: &GrantSettings) -> Result<(), PolicyError> {
    if grant.principal_service.trim().is_empty() {
        return Err(PolicyError::insecure("principal service must not be empty"));
    }

    let identity = grant.distribution_identity.trim();
    if identity.is_empty() {
        return Err(PolicyError::insecure(
            "distribution identity is empty; the grant would let any distribution in any account read the bucket",
        ));
    }
    if identity.contains(&WILDCARD_CHARS[..]) {
        return Err(PolicyError::insecure(format!(
            "distribution identity '{identity}' contains a wildcard; the grant must name a single distribution"
        )));
    }

    let operator = settings.condition_operator.trim();
    if !SCOPING_OPERATORS.contains(&operator) {
        return Err(PolicyError::insecure(format!(
            "condition operator '{operator}' does not restrict access to the named distribution; use one of {}",
            SCOPING_OPERATORS.join(", ")
        )));
    }
    let key = settings.condition_key.trim();
    if !SOURCE_ARN_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
        return Err(PolicyError::insecure(format!(
            "condition key '{key}' does not identify the calling distribution; use aws:SourceArn"
        )));
    }

    if settings.actions.iter().all(|action| action.trim().is_empty()) {
        return Err(PolicyError::NoActions);
    }

    normalize_resource_prefix(&grant.resource_prefix).map(|_| ())
}

/// Trim the prefix and strip a trailing `/` or `/*`.
pub fn normalize_resource_prefix(prefix: &str) -> Result<&str, PolicyError> {
    let trimmed = prefix.trim();
    let trimmed = trimmed.strip_suffix("/*").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(PolicyError::EmptyResourcePrefix);
    }
    Ok(trimmed)
}

/// Build the statement a grant renders to, with the given Sid.
pub fn build_grant_statement(
    grant: &DistributionGrant,
    settings: &GrantSettings,
    sid: &str,
) -> Result<Statement, PolicyError> {
    validate_grant(grant, settings)?;
    let prefix = normalize_resource_prefix(&grant.resource_prefix)?;

    Ok(Statement::allow(Principal::service(grant.principal_service.trim()))
        .with_sid(sid)
        .with_actions(grant_actions(settings))
        .with_resources(vec![format!("{prefix}/*")])
        .with_condition(grant_condition(grant, settings)))
}

/// Non-blank actions, trimmed.
pub(crate) fn grant_actions(settings: &GrantSettings) -> Vec<String> {
    settings
        .actions
        .iter()
        .map(|action| action.trim())
        .filter(|action| !action.is_empty())
        .map(str::to_string)
        .collect()
}

/// `{operator: {key: distribution_identity}}`
pub(crate) fn grant_condition(grant: &DistributionGrant, settings: &GrantSettings) -> Condition {
    Condition::single(
        settings.condition_operator.trim(),
        settings.condition_key.trim(),
        Value::String(grant.distribution_identity.trim().to_string()),
    )
}
