//! Bucket policy document model
//!
//! The model keeps everything it reads: list-vs-scalar shapes, key order, and
//! any field it does not know about. Statements written by other tools (an IP
//! allow-list added in the console, for example) survive a read-modify-write
//! cycle unchanged.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Policy language version written into newly created documents
pub const POLICY_VERSION: &str = "2012-10-17";

/// A JSON value that may appear either as a scalar or as a list.
///
/// The variant remembers which form was read so rendering reproduces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Append an item, promoting a scalar to a list.
    pub fn push(&mut self, item: T) {
        match std::mem::replace(self, OneOrMany::Many(Vec::new())) {
            OneOrMany::One(first) => *self = OneOrMany::Many(vec![first, item]),
            OneOrMany::Many(mut items) => {
                items.push(item);
                *self = OneOrMany::Many(items);
            }
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(item: T) -> Self {
        OneOrMany::One(item)
    }
}

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Who a statement applies to.
///
/// `Any` is the bare `"*"` form. Everything else (`{"AWS": ...}`,
/// `{"Service": ...}`, `{"Federated": ...}`, `{"CanonicalUser": ...}`) is kept
/// as an ordered map from principal kind to identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPrincipal", into = "RawPrincipal")]
pub enum Principal {
    Any,
    Specific(IndexMap<String, OneOrMany<String>>),
}

impl Principal {
    /// `{"Service": "<service>"}`
    pub fn service(service: impl Into<String>) -> Self {
        let mut map = IndexMap::new();
        map.insert("Service".to_string(), OneOrMany::One(service.into()));
        Principal::Specific(map)
    }

    /// Identifiers listed under a principal kind, e.g. `"Service"`.
    pub fn identifiers(&self, kind: &str) -> &[String] {
        match self {
            Principal::Any => &[],
            Principal::Specific(map) => map.get(kind).map(OneOrMany::as_slice).unwrap_or(&[]),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPrincipal {
    Text(String),
    Map(IndexMap<String, OneOrMany<String>>),
}

impl TryFrom<RawPrincipal> for Principal {
    type Error = String;

    fn try_from(raw: RawPrincipal) -> Result<Self, Self::Error> {
        match raw {
            RawPrincipal::Text(text) if text == "*" => Ok(Principal::Any),
            RawPrincipal::Text(text) => Err(format!(
                "invalid principal string: expected \"*\", got \"{text}\""
            )),
            RawPrincipal::Map(map) => Ok(Principal::Specific(map)),
        }
    }
}

impl From<Principal> for RawPrincipal {
    fn from(principal: Principal) -> Self {
        match principal {
            Principal::Any => RawPrincipal::Text("*".to_string()),
            Principal::Specific(map) => RawPrincipal::Map(map),
        }
    }
}

/// Condition block: operator -> condition key -> expected value(s).
///
/// Values stay as raw JSON so that booleans, numbers and strings written by
/// other tools are reproduced exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition(pub IndexMap<String, IndexMap<String, OneOrMany<Value>>>);

impl Condition {
    /// A block holding a single `operator: { key: value }` entry.
    pub fn single(operator: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        let mut block = IndexMap::new();
        block.insert(key.into(), OneOrMany::One(value));
        let mut operators = IndexMap::new();
        operators.insert(operator.into(), block);
        Condition(operators)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(
        &self,
    ) -> indexmap::map::Iter<'_, String, IndexMap<String, OneOrMany<Value>>> {
        self.0.iter()
    }
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_principal: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_action: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_resource: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Fields this crate does not model, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Statement {
    /// An `Allow` statement for `principal` with nothing else set.
    pub fn allow(principal: Principal) -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: Some(principal),
            not_principal: None,
            action: None,
            not_action: None,
            resource: None,
            not_resource: None,
            condition: None,
            extra: Map::new(),
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.action = Some(collapse(actions));
        self
    }

    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resource = Some(collapse(resources));
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

fn collapse(mut items: Vec<String>) -> OneOrMany<String> {
    if items.len() == 1 {
        OneOrMany::One(items.remove(0))
    } else {
        OneOrMany::Many(items)
    }
}

/// A bucket policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub statement: OneOrMany<Statement>,
    /// Top-level fields this crate does not model, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PolicyDocument {
    /// An empty document at the current policy language version.
    pub fn new() -> Self {
        Self {
            version: Some(POLICY_VERSION.to_string()),
            id: None,
            statement: OneOrMany::Many(Vec::new()),
            extra: Map::new(),
        }
    }

    pub fn statements(&self) -> &[Statement] {
        self.statement.as_slice()
    }

    /// Statement ids in document order, skipping statements without one.
    pub fn sids(&self) -> impl Iterator<Item = &str> {
        self.statements().iter().filter_map(|s| s.sid.as_deref())
    }

    pub fn contains_sid(&self, sid: &str) -> bool {
        self.sids().any(|existing| existing == sid)
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_principal_wildcard_string() {
        let principal: Principal = serde_json::from_value(json!("*")).unwrap();
        assert_eq!(principal, Principal::Any);
        assert_eq!(serde_json::to_value(&principal).unwrap(), json!("*"));
    }

    #[test]
    fn test_principal_rejects_non_wildcard_string() {
        let result: Result<Principal, _> = serde_json::from_value(json!("cloudfront"));
        assert!(result.is_err());
    }

    #[test]
    fn test_principal_service_map() {
        let principal: Principal =
            serde_json::from_value(json!({"Service": "cloudfront.amazonaws.com"})).unwrap();
        assert_eq!(principal, Principal::service("cloudfront.amazonaws.com"));
        assert_eq!(
            principal.identifiers("Service"),
            &["cloudfront.amazonaws.com".to_string()]
        );
        assert!(principal.identifiers("AWS").is_empty());
    }

    #[test]
    fn test_one_or_many_push_promotes_scalar() {
        let mut values = OneOrMany::One("a".to_string());
        values.push("b".to_string());
        assert_eq!(
            values,
            OneOrMany::Many(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_condition_values_keep_json_types() {
        let condition: Condition = serde_json::from_value(json!({
            "Bool": {"aws:SecureTransport": false},
            "IpAddress": {"aws:SourceIp": ["203.0.113.0/24", "198.51.100.7/32"]}
        }))
        .unwrap();

        let secure = &condition.0["Bool"]["aws:SecureTransport"];
        assert_eq!(secure, &OneOrMany::One(json!(false)));
        assert_eq!(condition.0["IpAddress"]["aws:SourceIp"].len(), 2);
    }

    #[test]
    fn test_statement_builder_collapses_single_values() {
        let statement = Statement::allow(Principal::service("cloudfront.amazonaws.com"))
            .with_sid("AllowCloudFront")
            .with_actions(vec!["s3:GetObject".to_string()])
            .with_resources(vec!["arn:aws:s3:::assets/*".to_string()]);

        let value = serde_json::to_value(&statement).unwrap();
        assert_eq!(value["Action"], json!("s3:GetObject"));
        assert_eq!(value["Resource"], json!("arn:aws:s3:::assets/*"));
        assert!(value.get("Condition").is_none());
    }

    #[test]
    fn test_new_document_is_empty() {
        let document = PolicyDocument::new();
        assert_eq!(document.version.as_deref(), Some(POLICY_VERSION));
        assert!(document.statements().is_empty());
        assert_eq!(document.sids().count(), 0);
    }
}
