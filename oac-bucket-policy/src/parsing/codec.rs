//! Parse and render bucket policy documents.
//!
//! Parsing is strict about structure (a statement must name a principal, an
//! action and a resource, and Sids must be unique) but lenient about content:
//! unknown fields are carried through so that `parse(render(doc)) == doc`.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::PolicyError;
use crate::policy::{OneOrMany, PolicyDocument, Statement};

/// Parse policy text into a document, rejecting anything structurally unsound.
pub fn parse_policy(text: &str) -> Result<PolicyDocument, PolicyError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| PolicyError::malformed(format!("invalid JSON: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(PolicyError::malformed("policy document must be a JSON object"));
    };
    let Some(raw_statements) = object.get("Statement") else {
        return Err(PolicyError::malformed("policy document has no Statement"));
    };

    let document: PolicyDocument = match serde_json::from_value(value.clone()) {
        Ok(document) => document,
        Err(e) => {
            return Err(locate_statement_error(raw_statements)
                .unwrap_or_else(|| PolicyError::malformed(e.to_string())))
        }
    };

    validate_document(&document)?;
    Ok(document)
}

/// Render a document as indented JSON.
pub fn render_policy(document: &PolicyDocument) -> Result<String, PolicyError> {
    serde_json::to_string_pretty(document)
        .map_err(|e| PolicyError::malformed(format!("failed to serialize policy: {e}")))
}

/// Render a document as single-line JSON, the form sent to the bucket.
pub fn render_policy_compact(document: &PolicyDocument) -> Result<String, PolicyError> {
    serde_json::to_string(document)
        .map_err(|e| PolicyError::malformed(format!("failed to serialize policy: {e}")))
}

/// Decode statements one at a time to name the one that broke.
fn locate_statement_error(raw: &Value) -> Option<PolicyError> {
    let candidates: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![raw],
        _ => return Some(PolicyError::malformed("Statement must be an object or a list")),
    };

    candidates.into_iter().enumerate().find_map(|(index, item)| {
        serde_json::from_value::<Statement>(item.clone())
            .err()
            .map(|e| PolicyError::malformed(format!("statement {index}: {e}")))
    })
}

fn validate_document(document: &PolicyDocument) -> Result<(), PolicyError> {
    let mut seen_sids = HashSet::new();

    for (index, statement) in document.statements().iter().enumerate() {
        let label = statement
            .sid
            .clone()
            .unwrap_or_else(|| format!("#{index}"));

        if statement.principal.is_some() == statement.not_principal.is_some() {
            return Err(PolicyError::malformed(format!(
                "statement {label}: exactly one of Principal or NotPrincipal is required"
            )));
        }
        if statement.action.is_some() == statement.not_action.is_some() {
            return Err(PolicyError::malformed(format!(
                "statement {label}: exactly one of Action or NotAction is required"
            )));
        }
        if statement.resource.is_some() == statement.not_resource.is_some() {
            return Err(PolicyError::malformed(format!(
                "statement {label}: exactly one of Resource or NotResource is required"
            )));
        }

        for (field, values) in [
            ("Action", &statement.action),
            ("NotAction", &statement.not_action),
            ("Resource", &statement.resource),
            ("NotResource", &statement.not_resource),
        ] {
            if values.as_ref().is_some_and(OneOrMany::is_empty) {
                return Err(PolicyError::malformed(format!(
                    "statement {label}: {field} must not be empty"
                )));
            }
        }

        if let Some(sid) = &statement.sid {
            if !seen_sids.insert(sid.as_str()) {
                return Err(PolicyError::malformed(format!(
                    "duplicate statement id '{sid}'"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Effect, Principal};
    use serde_json::json;

    const IP_ALLOW_POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Id": "IpRestriction",
        "Statement": [
            {
                "Sid": "IPAllow",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "s3:GetObject",
                "Resource": "arn:aws:s3:::static-assets/*",
                "Condition": {
                    "IpAddress": {"aws:SourceIp": ["203.0.113.10/32", "198.51.100.0/24"]}
                }
            }
        ]
    }"#;

    #[test]
    fn test_parse_ip_allow_policy() {
        let document = parse_policy(IP_ALLOW_POLICY).unwrap();
        assert_eq!(document.id.as_deref(), Some("IpRestriction"));

        let statement = &document.statements()[0];
        assert_eq!(statement.sid.as_deref(), Some("IPAllow"));
        assert_eq!(statement.effect, Effect::Allow);
        assert_eq!(statement.principal, Some(Principal::Any));
        assert_eq!(
            statement.action,
            Some(OneOrMany::One("s3:GetObject".to_string()))
        );
        let condition = statement.condition.as_ref().unwrap();
        assert_eq!(condition.0["IpAddress"]["aws:SourceIp"].len(), 2);
    }

    #[test]
    fn test_round_trip_keeps_unmodeled_fields() {
        let text = json!({
            "Version": "2012-10-17",
            "x-owner": {"team": "web"},
            "Statement": [{
                "Sid": "DenyInsecure",
                "Effect": "Deny",
                "Principal": {"AWS": "*"},
                "NotAction": ["s3:ListBucket"],
                "Resource": ["arn:aws:s3:::static-assets", "arn:aws:s3:::static-assets/*"],
                "Condition": {"Bool": {"aws:SecureTransport": false}},
                "Comment": "added by hand"
            }]
        })
        .to_string();

        let document = parse_policy(&text).unwrap();
        assert_eq!(document.extra["x-owner"], json!({"team": "web"}));
        assert_eq!(document.statements()[0].extra["Comment"], json!("added by hand"));

        let pretty = parse_policy(&render_policy(&document).unwrap()).unwrap();
        let compact = parse_policy(&render_policy_compact(&document).unwrap()).unwrap();
        assert_eq!(pretty, document);
        assert_eq!(compact, document);

        let rendered: Value = serde_json::from_str(&render_policy(&document).unwrap()).unwrap();
        assert_eq!(rendered, serde_json::from_str::<Value>(&text).unwrap());
    }

    #[test]
    fn test_single_statement_object_keeps_its_shape() {
        let text = r#"{"Version":"2012-10-17","Statement":{"Effect":"Allow","Principal":"*","Action":"s3:GetObject","Resource":"arn:aws:s3:::b/*"}}"#;
        let document = parse_policy(text).unwrap();
        assert!(matches!(document.statement, OneOrMany::One(_)));

        let rendered: Value = serde_json::from_str(&render_policy_compact(&document).unwrap()).unwrap();
        assert!(rendered["Statement"].is_object());
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = parse_policy("{\"Statement\": [").unwrap_err();
        assert!(matches!(err, PolicyError::MalformedPolicy(ref msg) if msg.contains("invalid JSON")));
    }

    #[test]
    fn test_missing_statement_is_malformed() {
        let err = parse_policy(r#"{"Version": "2012-10-17"}"#).unwrap_err();
        assert_eq!(
            err,
            PolicyError::malformed("policy document has no Statement")
        );
    }

    #[test]
    fn test_bad_statement_is_located() {
        let text = r#"{"Statement": [
            {"Effect": "Allow", "Principal": "*", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::b/*"},
            {"Effect": "Maybe", "Principal": "*", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::b/*"}
        ]}"#;
        let err = parse_policy(text).unwrap_err();
        assert!(
            matches!(err, PolicyError::MalformedPolicy(ref msg) if msg.starts_with("statement 1:")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_statement_without_principal_is_malformed() {
        let text = r#"{"Statement": [{"Sid": "NoOne", "Effect": "Allow", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::b/*"}]}"#;
        let err = parse_policy(text).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedPolicy(ref msg) if msg.contains("NoOne")));
    }

    #[test]
    fn test_action_and_not_action_together_is_malformed() {
        let text = r#"{"Statement": [{"Effect": "Allow", "Principal": "*", "Action": "s3:GetObject", "NotAction": "s3:PutObject", "Resource": "arn:aws:s3:::b/*"}]}"#;
        assert!(parse_policy(text).is_err());
    }

    #[test]
    fn test_duplicate_sids_are_malformed() {
        let text = r#"{"Statement": [
            {"Sid": "Same", "Effect": "Allow", "Principal": "*", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::b/*"},
            {"Sid": "Same", "Effect": "Deny", "Principal": "*", "Action": "s3:PutObject", "Resource": "arn:aws:s3:::b/*"}
        ]}"#;
        let err = parse_policy(text).unwrap_err();
        assert_eq!(err, PolicyError::malformed("duplicate statement id 'Same'"));
    }

    #[test]
    fn test_empty_action_or_resource_list_is_malformed() {
        for (field, text) in [
            ("Action", r#"{"Statement": [{"Sid": "Empty", "Effect": "Allow", "Principal": "*", "Action": [], "Resource": "arn:aws:s3:::b/*"}]}"#),
            ("Resource", r#"{"Statement": [{"Sid": "Empty", "Effect": "Allow", "Principal": "*", "Action": "s3:GetObject", "Resource": []}]}"#),
            ("NotResource", r#"{"Statement": [{"Sid": "Empty", "Effect": "Deny", "Principal": "*", "Action": "s3:GetObject", "NotResource": []}]}"#),
        ] {
            let err = parse_policy(text).unwrap_err();
            assert_eq!(
                err,
                PolicyError::malformed(format!("statement Empty: {field} must not be empty"))
            );
        }
    }
}
