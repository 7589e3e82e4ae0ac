//! Merge a distribution grant into an existing bucket policy.
//!
//! Existing statements are never altered, reordered or removed; the grant is
//! only ever appended. Policy statements are OR'ed by the evaluator, so an
//! appended `Allow` adds a path to access and cannot narrow an existing one.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::policy_builder::{
    build_grant_statement, grant_actions, grant_condition, normalize_resource_prefix,
    validate_grant,
};
use crate::error::PolicyError;
use crate::evaluation::evaluator::condition_value_text;
use crate::evaluation::matching::wildcard_match;
use crate::policy::{Condition, Effect, PolicyDocument, Principal, Statement};
use crate::types::{DistributionGrant, GrantSettings, MergeOutcome, MergeStatus};

/// Upper bound on Sid regeneration before the collision is surfaced
pub const MAX_SID_ATTEMPTS: usize = 100;

/// Principal kind -> identifiers, ignoring shape and order. `None` is `"*"`.
type PrincipalKey = Option<BTreeMap<String, BTreeSet<String>>>;

/// Operator -> lower-cased key -> values, ignoring shape and order.
type ConditionKey = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// What an existing statement must grant to stand in for the new one.
struct GrantShape {
    principal: PrincipalKey,
    condition: ConditionKey,
    actions: Vec<String>,
    resource: String,
}

/// Merge `grant` into `existing` (or into a fresh document when there is none).
///
/// Re-applying a grant that is already present returns the document unchanged.
pub fn merge_grant(
    existing: Option<&PolicyDocument>,
    grant: &DistributionGrant,
    settings: &GrantSettings,
) -> Result<MergeOutcome, PolicyError> {
    validate_grant(grant, settings)?;

    let mut document = existing.cloned().unwrap_or_default();

    let wanted = GrantShape {
        principal: principal_key(&Principal::service(grant.principal_service.trim())),
        condition: condition_key(Some(&grant_condition(grant, settings))),
        actions: grant_actions(settings),
        resource: format!("{}/*", normalize_resource_prefix(&grant.resource_prefix)?),
    };
    if let Some(found) = document
        .statements()
        .iter()
        .find(|statement| grants_same_access(statement, &wanted))
    {
        debug!(
            "Equivalent grant already present (sid: {:?}); leaving policy unchanged",
            found.sid
        );
        let sid = found.sid.clone();
        return Ok(MergeOutcome {
            document,
            status: MergeStatus::Unchanged(sid),
        });
    }

    let base_sid = match settings.sid.trim() {
        "" => GrantSettings::default().sid,
        sid => sid.to_string(),
    };

    for attempt in 0..MAX_SID_ATTEMPTS {
        let sid = candidate_sid(&base_sid, attempt);
        let statement = build_grant_statement(grant, settings, &sid)?;
        match append_statement(&mut document, statement) {
            Ok(()) => {
                debug!("Appended grant statement '{sid}'");
                return Ok(MergeOutcome {
                    document,
                    status: MergeStatus::Added(sid),
                });
            }
            Err(PolicyError::DuplicateStatementId(taken)) => {
                debug!("Statement id '{taken}' is taken, regenerating");
            }
            Err(other) => return Err(other),
        }
    }

    Err(PolicyError::DuplicateStatementId(base_sid))
}

/// Append a statement, refusing a Sid that is already in use.
pub fn append_statement(
    document: &mut PolicyDocument,
    statement: Statement,
) -> Result<(), PolicyError> {
    if let Some(sid) = &statement.sid {
        if document.contains_sid(sid) {
            return Err(PolicyError::DuplicateStatementId(sid.clone()));
        }
    }
    document.statement.push(statement);
    Ok(())
}

/// `Base`, `Base2`, `Base3`, ...
fn candidate_sid(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{base}{}", attempt + 1)
    }
}

/// Same principal and scoping condition, and at least the wanted actions on
/// the wanted objects.
fn grants_same_access(statement: &Statement, wanted: &GrantShape) -> bool {
    if statement.effect != Effect::Allow
        || statement.not_action.is_some()
        || statement.not_resource.is_some()
    {
        return false;
    }
    let (Some(principal), Some(actions), Some(resources)) = (
        statement.principal.as_ref(),
        statement.action.as_ref(),
        statement.resource.as_ref(),
    ) else {
        return false;
    };

    principal_key(principal) == wanted.principal
        && condition_key(statement.condition.as_ref()) == wanted.condition
        && wanted.actions.iter().all(|action| {
            actions
                .iter()
                .any(|pattern| wildcard_match(pattern, action, true))
        })
        && resources
            .iter()
            .any(|pattern| wildcard_match(pattern, &wanted.resource, false))
}

fn principal_key(principal: &Principal) -> PrincipalKey {
    match principal {
        Principal::Any => None,
        Principal::Specific(map) => Some(
            map.iter()
                .map(|(kind, ids)| {
                    let ids = ids.iter().map(|id| id.trim().to_ascii_lowercase()).collect();
                    (kind.clone(), ids)
                })
                .collect(),
        ),
    }
}

fn condition_key(condition: Option<&Condition>) -> ConditionKey {
    let Some(condition) = condition else {
        return ConditionKey::new();
    };
    condition
        .iter()
        .map(|(operator, block)| {
            let block = block
                .iter()
                .map(|(key, values)| {
                    let values = values.iter().map(condition_value_text).collect();
                    (key.to_ascii_lowercase(), values)
                })
                .collect();
            (operator.clone(), block)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{Caller, PolicyEvaluator, RequestContext};
    use crate::parsing::{parse_policy, render_policy};
    use crate::policy::OneOrMany;
    use proptest::prelude::*;
    use serde_json::json;

    const BUCKET_ARN: &str = "arn:aws:s3:::static-assets";
    const DISTRIBUTION_ARN: &str = "arn:aws:cloudfront::111122223333:distribution/E1A2B3";

    fn ip_allow_policy() -> PolicyDocument {
        parse_policy(
            &json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Sid": "IPAllow",
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": "read-object",
                    "Resource": "arn:aws:s3:::static-assets/*",
                    "Condition": {"IpAddress": {"aws:SourceIp": ["203.0.113.10/32"]}}
                }]
            })
            .to_string(),
        )
        .unwrap()
    }

    fn cdn_settings() -> GrantSettings {
        GrantSettings {
            sid: "AllowCDN".to_string(),
            actions: vec!["read-object".to_string()],
            condition_operator: "ArnLike".to_string(),
            condition_key: "SourceArn".to_string(),
        }
    }

    fn cdn_grant(identity: &str) -> DistributionGrant {
        DistributionGrant::new("cdn.example", identity, BUCKET_ARN)
    }

    #[test]
    fn test_example_scenario() {
        let existing = ip_allow_policy();
        let outcome = merge_grant(Some(&existing), &cdn_grant(DISTRIBUTION_ARN), &cdn_settings())
            .unwrap();

        assert_eq!(outcome.status, MergeStatus::Added("AllowCDN".to_string()));
        let statements = outcome.document.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], existing.statements()[0]);
        assert_eq!(
            serde_json::to_value(&statements[1]).unwrap(),
            json!({
                "Sid": "AllowCDN",
                "Effect": "Allow",
                "Principal": {"Service": "cdn.example"},
                "Action": "read-object",
                "Resource": "arn:aws:s3:::static-assets/*",
                "Condition": {"ArnLike": {"SourceArn": DISTRIBUTION_ARN}}
            })
        );
    }

    #[test]
    fn test_rejection_scenario_leaves_input_untouched() {
        let existing = ip_allow_policy();
        let snapshot = existing.clone();

        let err = merge_grant(Some(&existing), &cdn_grant("*"), &cdn_settings()).unwrap_err();

        assert!(err.is_insecure_grant());
        assert_eq!(existing, snapshot);
    }

    #[test]
    fn test_empty_identity_rejected() {
        let err = merge_grant(None, &cdn_grant(""), &GrantSettings::default()).unwrap_err();
        assert!(err.is_insecure_grant());
    }

    #[test]
    fn test_empty_resource_prefix_rejected() {
        let grant = DistributionGrant::new("cdn.example", DISTRIBUTION_ARN, "");
        let err = merge_grant(None, &grant, &GrantSettings::default()).unwrap_err();
        assert_eq!(err, PolicyError::EmptyResourcePrefix);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let grant = cdn_grant(DISTRIBUTION_ARN);
        let first = merge_grant(Some(&ip_allow_policy()), &grant, &cdn_settings()).unwrap();
        let second = merge_grant(Some(&first.document), &grant, &cdn_settings()).unwrap();

        assert_eq!(
            second.status,
            MergeStatus::Unchanged(Some("AllowCDN".to_string()))
        );
        assert!(!second.is_changed());
        assert_eq!(second.document, first.document);

        let grant_statements = second
            .document
            .statements()
            .iter()
            .filter(|s| s.principal == Some(Principal::service("cdn.example")))
            .count();
        assert_eq!(grant_statements, 1);
    }

    #[test]
    fn test_equivalent_grant_written_in_another_shape_is_recognized() {
        let existing = parse_policy(
            &json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Service": ["cloudfront.amazonaws.com"]},
                    "Action": ["s3:GetObject"],
                    "Resource": ["arn:aws:s3:::static-assets/*"],
                    "Condition": {"StringEquals": {"aws:sourcearn": [DISTRIBUTION_ARN]}}
                }]
            })
            .to_string(),
        )
        .unwrap();
        let grant = DistributionGrant::new("cloudfront.amazonaws.com", DISTRIBUTION_ARN, BUCKET_ARN);

        let outcome = merge_grant(Some(&existing), &grant, &GrantSettings::default()).unwrap();
        assert_eq!(outcome.status, MergeStatus::Unchanged(None));
        assert_eq!(outcome.document, existing);
    }

    #[test]
    fn test_same_distribution_on_other_resource_is_not_the_grant() {
        let existing = parse_policy(
            &json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Sid": "ListOther",
                    "Effect": "Allow",
                    "Principal": {"Service": "cloudfront.amazonaws.com"},
                    "Action": "s3:ListBucket",
                    "Resource": "arn:aws:s3:::other-bucket",
                    "Condition": {"StringEquals": {"AWS:SourceArn": DISTRIBUTION_ARN}}
                }]
            })
            .to_string(),
        )
        .unwrap();
        let grant = DistributionGrant::new("cloudfront.amazonaws.com", DISTRIBUTION_ARN, BUCKET_ARN);

        let outcome = merge_grant(Some(&existing), &grant, &GrantSettings::default()).unwrap();

        assert_eq!(
            outcome.status,
            MergeStatus::Added("AllowCloudFrontServicePrincipal".to_string())
        );
        let read = RequestContext::new(
            Caller::Service("cloudfront.amazonaws.com".to_string()),
            "s3:GetObject",
            "arn:aws:s3:::static-assets/index.html",
        )
        .with_source_arn(DISTRIBUTION_ARN);
        assert!(!PolicyEvaluator::new().evaluate(&existing, &read).is_allowed());
        assert!(PolicyEvaluator::new()
            .evaluate(&outcome.document, &read)
            .is_allowed());
    }

    #[test]
    fn test_narrower_existing_grant_does_not_cover_new_one() {
        let existing = parse_policy(
            &json!({
                "Statement": [{
                    "Sid": "ImagesOnly",
                    "Effect": "Allow",
                    "Principal": {"Service": "cdn.example"},
                    "Action": "read-object",
                    "Resource": "arn:aws:s3:::static-assets/img/*",
                    "Condition": {"ArnLike": {"SourceArn": DISTRIBUTION_ARN}}
                }]
            })
            .to_string(),
        )
        .unwrap();

        let outcome =
            merge_grant(Some(&existing), &cdn_grant(DISTRIBUTION_ARN), &cdn_settings()).unwrap();
        assert_eq!(outcome.status, MergeStatus::Added("AllowCDN".to_string()));

        let mut settings = cdn_settings();
        settings.actions.push("list-objects".to_string());
        let outcome =
            merge_grant(Some(&outcome.document), &cdn_grant(DISTRIBUTION_ARN), &settings).unwrap();
        assert_eq!(outcome.status, MergeStatus::Added("AllowCDN2".to_string()));
    }

    #[test]
    fn test_broader_existing_grant_covers_new_one() {
        let existing = parse_policy(
            &json!({
                "Statement": [{
                    "Sid": "AllS3",
                    "Effect": "Allow",
                    "Principal": {"Service": "cloudfront.amazonaws.com"},
                    "Action": ["s3:Get*", "s3:ListBucket"],
                    "Resource": ["arn:aws:s3:::static-assets", "arn:aws:s3:::static-assets/*"],
                    "Condition": {"StringEquals": {"AWS:SourceArn": DISTRIBUTION_ARN}}
                }]
            })
            .to_string(),
        )
        .unwrap();
        let grant = DistributionGrant::new("cloudfront.amazonaws.com", DISTRIBUTION_ARN, BUCKET_ARN);

        let outcome = merge_grant(Some(&existing), &grant, &GrantSettings::default()).unwrap();
        assert_eq!(outcome.status, MergeStatus::Unchanged(Some("AllS3".to_string())));
    }

    #[test]
    fn test_negated_condition_operator_never_reaches_the_document() {
        let existing = ip_allow_policy();
        for operator in ["StringNotEquals", "ArnNotLike", "ArnLikeIfExists"] {
            let settings = GrantSettings {
                condition_operator: operator.to_string(),
                ..cdn_settings()
            };
            let err = merge_grant(Some(&existing), &cdn_grant(DISTRIBUTION_ARN), &settings)
                .unwrap_err();
            assert!(err.is_insecure_grant(), "{operator} should be rejected");
        }
    }

    #[test]
    fn test_grant_without_actions_is_rejected() {
        let settings = GrantSettings {
            actions: vec![],
            ..cdn_settings()
        };
        let err = merge_grant(None, &cdn_grant(DISTRIBUTION_ARN), &settings).unwrap_err();
        assert_eq!(err, PolicyError::NoActions);
    }

    #[test]
    fn test_deny_with_same_scope_is_not_a_grant() {
        let existing = parse_policy(
            &json!({
                "Statement": [{
                    "Sid": "DenyCdn",
                    "Effect": "Deny",
                    "Principal": {"Service": "cdn.example"},
                    "Action": "read-object",
                    "Resource": "arn:aws:s3:::static-assets/private/*",
                    "Condition": {"ArnLike": {"SourceArn": DISTRIBUTION_ARN}}
                }]
            })
            .to_string(),
        )
        .unwrap();

        let outcome =
            merge_grant(Some(&existing), &cdn_grant(DISTRIBUTION_ARN), &cdn_settings()).unwrap();
        assert!(outcome.is_changed());
        assert_eq!(outcome.document.statements().len(), 2);
    }

    #[test]
    fn test_other_distribution_gets_its_own_statement() {
        let first = merge_grant(
            Some(&ip_allow_policy()),
            &cdn_grant(DISTRIBUTION_ARN),
            &cdn_settings(),
        )
        .unwrap();
        let second = merge_grant(
            Some(&first.document),
            &cdn_grant("arn:aws:cloudfront::111122223333:distribution/E9Z8Y7"),
            &cdn_settings(),
        )
        .unwrap();

        assert_eq!(second.status, MergeStatus::Added("AllowCDN2".to_string()));
        assert_eq!(second.document.statements().len(), 3);
    }

    #[test]
    fn test_sid_collision_regenerates() {
        let mut existing = ip_allow_policy();
        for sid in ["AllowCDN", "AllowCDN2"] {
            let unrelated = Statement::allow(Principal::Any)
                .with_sid(sid)
                .with_actions(vec!["list-objects".to_string()])
                .with_resources(vec![BUCKET_ARN.to_string()]);
            append_statement(&mut existing, unrelated).unwrap();
        }

        let outcome =
            merge_grant(Some(&existing), &cdn_grant(DISTRIBUTION_ARN), &cdn_settings()).unwrap();
        assert_eq!(outcome.status, MergeStatus::Added("AllowCDN3".to_string()));
    }

    #[test]
    fn test_append_statement_refuses_duplicate_sid() {
        let mut document = ip_allow_policy();
        let clash = Statement::allow(Principal::Any)
            .with_sid("IPAllow")
            .with_actions(vec!["read-object".to_string()])
            .with_resources(vec![BUCKET_ARN.to_string()]);

        assert_eq!(
            append_statement(&mut document, clash),
            Err(PolicyError::DuplicateStatementId("IPAllow".to_string()))
        );
        assert_eq!(document.statements().len(), 1);
    }

    #[test]
    fn test_sid_space_exhausted_is_surfaced() {
        let mut existing = PolicyDocument::new();
        for attempt in 0..MAX_SID_ATTEMPTS {
            let filler = Statement::allow(Principal::Any)
                .with_sid(candidate_sid("AllowCDN", attempt))
                .with_actions(vec!["list-objects".to_string()])
                .with_resources(vec![BUCKET_ARN.to_string()]);
            append_statement(&mut existing, filler).unwrap();
        }

        let err = merge_grant(Some(&existing), &cdn_grant(DISTRIBUTION_ARN), &cdn_settings())
            .unwrap_err();
        assert_eq!(err, PolicyError::DuplicateStatementId("AllowCDN".to_string()));
    }

    #[test]
    fn test_no_existing_policy_creates_document() {
        let outcome = merge_grant(
            None,
            &DistributionGrant::new("cloudfront.amazonaws.com", DISTRIBUTION_ARN, BUCKET_ARN),
            &GrantSettings::default(),
        )
        .unwrap();

        assert_eq!(outcome.document.version.as_deref(), Some("2012-10-17"));
        assert_eq!(outcome.document.statements().len(), 1);
        assert_eq!(
            outcome.status,
            MergeStatus::Added("AllowCloudFrontServicePrincipal".to_string())
        );
    }

    #[test]
    fn test_single_statement_document_is_promoted_to_list() {
        let existing = parse_policy(
            r#"{"Version":"2012-10-17","Statement":{"Sid":"IPAllow","Effect":"Allow","Principal":"*","Action":"s3:GetObject","Resource":"arn:aws:s3:::static-assets/*","Condition":{"IpAddress":{"aws:SourceIp":"203.0.113.10/32"}}}}"#,
        )
        .unwrap();

        let outcome = merge_grant(
            Some(&existing),
            &DistributionGrant::new("cloudfront.amazonaws.com", DISTRIBUTION_ARN, BUCKET_ARN),
            &GrantSettings::default(),
        )
        .unwrap();

        assert!(matches!(outcome.document.statement, OneOrMany::Many(ref s) if s.len() == 2));
    }

    #[test]
    fn test_merged_document_round_trips_with_unmodeled_fields() {
        let existing = parse_policy(
            &json!({
                "Version": "2012-10-17",
                "Id": "legacy",
                "x-audit": [1, 2, 3],
                "Statement": [{
                    "Sid": "IPAllow",
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": "s3:GetObject",
                    "Resource": "arn:aws:s3:::static-assets/*",
                    "Condition": {"IpAddress": {"aws:SourceIp": "203.0.113.10/32"}},
                    "Note": {"ticket": "OPS-1"}
                }]
            })
            .to_string(),
        )
        .unwrap();

        let merged = merge_grant(
            Some(&existing),
            &DistributionGrant::new("cloudfront.amazonaws.com", DISTRIBUTION_ARN, BUCKET_ARN),
            &GrantSettings::default(),
        )
        .unwrap()
        .document;

        let reparsed = parse_policy(&render_policy(&merged).unwrap()).unwrap();
        assert_eq!(reparsed, merged);
        assert_eq!(reparsed.extra["x-audit"], json!([1, 2, 3]));
        assert_eq!(reparsed.statements()[0].extra["Note"], json!({"ticket": "OPS-1"}));
    }

    #[test]
    fn test_cdn_can_read_only_through_its_own_distribution() {
        let merged = merge_grant(
            Some(&ip_allow_policy()),
            &DistributionGrant::new("cloudfront.amazonaws.com", DISTRIBUTION_ARN, BUCKET_ARN),
            &GrantSettings::default(),
        )
        .unwrap()
        .document;
        let evaluator = PolicyEvaluator::new();
        let read = |source_arn: &str| {
            RequestContext::new(
                Caller::Service("cloudfront.amazonaws.com".to_string()),
                "s3:GetObject",
                "arn:aws:s3:::static-assets/index.html",
            )
            .with_source_arn(source_arn)
        };

        assert!(evaluator.evaluate(&merged, &read(DISTRIBUTION_ARN)).is_allowed());
        assert!(!evaluator
            .evaluate(
                &merged,
                &read("arn:aws:cloudfront::999999999999:distribution/EATTACKER")
            )
            .is_allowed());
    }

    fn ipv4_cidr() -> impl Strategy<Value = (std::net::Ipv4Addr, String)> {
        (any::<u32>(), 8u8..=32).prop_map(|(bits, prefix)| {
            let ip = std::net::Ipv4Addr::from(bits);
            (ip, format!("{ip}/{prefix}"))
        })
    }

    proptest! {
        #[test]
        fn prop_merge_never_revokes_ip_access(
            (client_ip, cidr) in ipv4_cidr(),
            distribution in "E[A-Z0-9]{6,13}",
            account in "[0-9]{12}",
        ) {
            let existing = parse_policy(&json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Sid": "IPAllow",
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": "s3:GetObject",
                    "Resource": "arn:aws:s3:::static-assets/*",
                    "Condition": {"IpAddress": {"aws:SourceIp": [cidr]}}
                }]
            }).to_string()).unwrap();
            let grant = DistributionGrant::new(
                "cloudfront.amazonaws.com",
                format!("arn:aws:cloudfront::{account}:distribution/{distribution}"),
                BUCKET_ARN,
            );
            let merged = merge_grant(Some(&existing), &grant, &GrantSettings::default()).unwrap();

            let request = RequestContext::new(
                Caller::Anonymous,
                "s3:GetObject",
                "arn:aws:s3:::static-assets/img/logo.png",
            )
            .with_source_ip(client_ip.into());
            let evaluator = PolicyEvaluator::new();

            prop_assert!(evaluator.evaluate(&existing, &request).is_allowed());
            prop_assert!(evaluator.evaluate(&merged.document, &request).is_allowed());
            prop_assert_eq!(&merged.document.statements()[0], &existing.statements()[0]);
        }
    }
}
