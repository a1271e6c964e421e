//! Policy CRD
//!
//! A governance policy. The controller treats `spec` as an opaque payload: it is
//! copied verbatim from the hub to the managed cluster and compared as a whole.

use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// API group shared by hub and managed policies
pub const POLICY_API_GROUP: &str = "policy.open-cluster-management.io";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "policy.open-cluster-management.io",
    version = "v1",
    kind = "Policy",
    plural = "policies",
    shortname = "plc",
    namespaced
)]
pub struct PolicySpec {
    /// Every top-level spec field, kept in key order.
    ///
    /// `serde_json::Map` is ordered by key, so two specs with the same content
    /// compare equal and serialize to the same bytes regardless of the field
    /// order the API server returned.
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl PolicySpec {
    /// Builds a spec from a JSON object. Non-object values yield an empty spec.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(content) => Self { content },
            _ => Self::default(),
        }
    }

    /// Returns the spec as a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.content.clone())
    }

    /// Canonical serialized form. Specs that compare equal serialize to the same bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // A map of JSON values always serializes.
        serde_json::to_vec(&self.content).unwrap_or_default()
    }

    /// Looks up a top-level field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.content.get(field)
    }
}

impl JsonSchema for PolicySpec {
    fn schema_name() -> Cow<'static, str> {
        "PolicySpec".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        })
    }
}
