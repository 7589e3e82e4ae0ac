//! Bucket policy evaluation
//!
//! Effective access is the union of satisfied `Allow` statements minus
//! anything an applicable `Deny` matches. Condition operators this evaluator
//! does not know never match, so an unknown operator cannot widen access.

use std::net::IpAddr;

use serde_json::Value;

use super::context::{Caller, RequestContext};
use super::matching::{ip_in_cidr, wildcard_match};
use crate::aws::arn::extract_account_from_arn;
use crate::policy::{Condition, Effect, OneOrMany, PolicyDocument, Principal, Statement};

/// Outcome of evaluating a document against one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    ExplicitDeny,
    /// No statement matched
    ImplicitDeny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    StringEquals,
    StringEqualsIgnoreCase,
    StringLike,
    Arn,
    IpAddress,
    Bool,
    Null,
}

/// A parsed condition operator, e.g. `ArnNotLikeIfExists`.
#[derive(Debug, Clone, Copy)]
struct Operator {
    comparison: Comparison,
    negated: bool,
    if_exists: bool,
}

impl Operator {
    fn parse(name: &str) -> Option<Self> {
        let (base, if_exists) = match name.strip_suffix("IfExists") {
            Some(base) => (base, true),
            None => (name, false),
        };
        let (comparison, negated) = match base {
            "StringEquals" => (Comparison::StringEquals, false),
            "StringNotEquals" => (Comparison::StringEquals, true),
            "StringEqualsIgnoreCase" => (Comparison::StringEqualsIgnoreCase, false),
            "StringNotEqualsIgnoreCase" => (Comparison::StringEqualsIgnoreCase, true),
            "StringLike" => (Comparison::StringLike, false),
            "StringNotLike" => (Comparison::StringLike, true),
            "ArnEquals" | "ArnLike" => (Comparison::Arn, false),
            "ArnNotEquals" | "ArnNotLike" => (Comparison::Arn, true),
            "IpAddress" => (Comparison::IpAddress, false),
            "NotIpAddress" => (Comparison::IpAddress, true),
            "Bool" => (Comparison::Bool, false),
            "Null" if !if_exists => (Comparison::Null, false),
            _ => return None,
        };
        Some(Self {
            comparison,
            negated,
            if_exists,
        })
    }

    fn matches_one(self, actual: &str, expected: &str) -> bool {
        match self.comparison {
            Comparison::StringEquals => actual == expected,
            Comparison::StringEqualsIgnoreCase => actual.eq_ignore_ascii_case(expected),
            Comparison::StringLike | Comparison::Arn => wildcard_match(expected, actual, false),
            Comparison::IpAddress => actual
                .parse::<IpAddr>()
                .map(|ip| ip_in_cidr(ip, expected))
                .unwrap_or(false),
            Comparison::Bool => actual.eq_ignore_ascii_case(expected),
            Comparison::Null => false,
        }
    }
}

/// Evaluates bucket policies against request contexts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, document: &PolicyDocument, context: &RequestContext) -> Decision {
        let mut allowed = false;
        for statement in document.statements() {
            if !statement_applies(statement, context) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return Decision::ExplicitDeny,
                Effect::Allow => allowed = true,
            }
        }
        if allowed {
            Decision::Allow
        } else {
            Decision::ImplicitDeny
        }
    }
}

/// Whether every part of a statement (principal, action, resource, conditions)
/// matches the request.
pub fn statement_applies(statement: &Statement, context: &RequestContext) -> bool {
    let principal_ok = match (&statement.principal, &statement.not_principal) {
        (Some(principal), _) => principal_matches(principal, &context.caller),
        (None, Some(not_principal)) => !principal_matches(not_principal, &context.caller),
        (None, None) => false,
    };

    principal_ok
        && list_matches(&statement.action, &statement.not_action, &context.action, true)
        && list_matches(
            &statement.resource,
            &statement.not_resource,
            &context.resource,
            false,
        )
        && conditions_hold(statement.condition.as_ref(), context)
}

fn principal_matches(principal: &Principal, caller: &Caller) -> bool {
    if principal == &Principal::Any || principal.identifiers("AWS").iter().any(|id| id == "*") {
        return true;
    }
    match caller {
        Caller::Anonymous => false,
        Caller::Service(service) => principal
            .identifiers("Service")
            .iter()
            .any(|id| id.eq_ignore_ascii_case(service)),
        Caller::Aws(arn) => {
            let account = extract_account_from_arn(arn);
            principal.identifiers("AWS").iter().any(|id| {
                id == arn
                    || account.as_deref().is_some_and(|account| {
                        id == account
                            || (id.ends_with(":root")
                                && extract_account_from_arn(id).as_deref() == Some(account))
                    })
            })
        }
    }
}

fn list_matches(
    include: &Option<OneOrMany<String>>,
    exclude: &Option<OneOrMany<String>>,
    value: &str,
    case_insensitive: bool,
) -> bool {
    let any = |patterns: &OneOrMany<String>| {
        patterns
            .iter()
            .any(|pattern| wildcard_match(pattern, value, case_insensitive))
    };
    match (include, exclude) {
        (Some(patterns), _) => any(patterns),
        (None, Some(patterns)) => !any(patterns),
        (None, None) => false,
    }
}

/// Operators are AND'ed; values under one key are OR'ed (NOR for negated
/// operators).
fn conditions_hold(condition: Option<&Condition>, context: &RequestContext) -> bool {
    let Some(condition) = condition else {
        return true;
    };

    condition.iter().all(|(operator_name, block)| {
        let Some(operator) = Operator::parse(operator_name) else {
            return false;
        };
        block
            .iter()
            .all(|(key, expected)| key_holds(operator, context.key(key), expected))
    })
}

fn key_holds(operator: Operator, actual: Option<&str>, expected: &OneOrMany<Value>) -> bool {
    let expected: Vec<String> = expected.iter().map(condition_value_text).collect();

    if operator.comparison == Comparison::Null {
        let wants_absent = expected.iter().any(|v| v.eq_ignore_ascii_case("true"));
        return wants_absent == actual.is_none();
    }

    let Some(actual) = actual else {
        return operator.if_exists || operator.negated;
    };

    let any_match = expected
        .iter()
        .any(|value| operator.matches_one(actual, value));
    any_match != operator.negated
}

/// Condition values compare as text; `true` and `"true"` are the same value.
pub(crate) fn condition_value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
