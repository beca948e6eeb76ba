// Copyright 2025 The score-k8s Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The template provisioner: provisions a resource by evaluating a fixed
//! sequence of templates (init, state, shared, outputs, manifests), each of
//! which must render to YAML and sees the results of the previous stages.

use std::collections::BTreeMap;

use async_trait::async_trait;
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::state::ResourceUid;
use crate::infrastructure::kubernetes::validate_known_manifest;
use crate::infrastructure::template as template_env;
use crate::shared::{Object, Result, ScoreError};

use super::{patch_map, Input, NetworkService, ProvisionOutput, Provisioner};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateProvisioner {
    pub uri: String,

    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub class: Option<String>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Evaluated first into working-set data available to later stages.
    #[serde(default)]
    pub init: String,

    /// Becomes the resource's persisted state.
    #[serde(default)]
    pub state: String,

    /// Patched into the shared state; null values delete keys.
    #[serde(default)]
    pub shared: String,

    /// Becomes the resource outputs used by placeholder substitution.
    #[serde(default)]
    pub outputs: String,

    /// A YAML list of manifests to emit alongside the workloads.
    #[serde(default)]
    pub manifests: String,

    #[serde(default)]
    pub supported_params: Vec<String>,

    #[serde(default)]
    pub expected_outputs: Vec<String>,
}

/// The fields visible to each template stage.
#[derive(Debug, Serialize)]
struct TemplateData<'a> {
    #[serde(rename = "Guid")]
    guid: &'a str,
    #[serde(rename = "Uid")]
    uid: &'a str,
    #[serde(rename = "Type")]
    resource_type: &'a str,
    #[serde(rename = "Class")]
    class: &'a str,
    #[serde(rename = "Id")]
    id: &'a str,
    #[serde(rename = "Params")]
    params: &'a Object,
    #[serde(rename = "Metadata")]
    metadata: &'a Object,
    #[serde(rename = "Init")]
    init: Object,
    #[serde(rename = "State")]
    state: Object,
    #[serde(rename = "Shared")]
    shared: Object,
    #[serde(rename = "SourceWorkload")]
    source_workload: &'a str,
    #[serde(rename = "WorkloadServices")]
    workload_services: &'a BTreeMap<String, NetworkService>,
    #[serde(rename = "Namespace")]
    namespace: Option<&'a str>,
}

/// Render a template body and decode the output as YAML. Empty bodies and
/// empty render results yield the default value rather than an error.
fn render_and_decode<T: Default + serde::de::DeserializeOwned>(
    env: &Environment<'_>,
    body: &str,
    data: &TemplateData<'_>,
) -> Result<T> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    let rendered = template_env::render(env, body, data)?;
    if rendered.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&rendered).map_err(|err| {
        ScoreError::template_error(format!("failed to decode output: {err}"))
    })
}

impl TemplateProvisioner {
    pub fn parse(raw: &Value) -> Result<Self> {
        let provisioner: TemplateProvisioner = serde_json::from_value(raw.clone())
            .map_err(|err| ScoreError::config_error(err.to_string()))?;
        if provisioner.uri.is_empty() {
            return Err(ScoreError::config_error("uri not set"));
        }
        if provisioner.resource_type.is_empty() {
            return Err(ScoreError::config_error("type not set"));
        }
        Ok(provisioner)
    }
}

#[async_trait]
impl Provisioner for TemplateProvisioner {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn matches(&self, uid: &ResourceUid) -> bool {
        if uid.resource_type() != self.resource_type {
            return false;
        }
        if let Some(class) = &self.class {
            if uid.class() != class {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if uid.id() != id {
                return false;
            }
        }
        true
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn class_label(&self) -> String {
        self.class.clone().unwrap_or_else(|| "(any)".to_string())
    }

    fn supported_params(&self) -> Vec<String> {
        let mut params = self.supported_params.clone();
        params.sort();
        params
    }

    fn expected_outputs(&self) -> Vec<String> {
        let mut outputs = self.expected_outputs.clone();
        outputs.sort();
        outputs
    }

    async fn provision(&self, ctx: &CancellationToken, input: &Input) -> Result<ProvisionOutput> {
        if ctx.is_cancelled() {
            return Err(ScoreError::Cancelled);
        }
        let env = template_env::build_environment();
        let mut out = ProvisionOutput::default();

        let mut data = TemplateData {
            guid: &input.resource_guid,
            uid: &input.resource_uid,
            resource_type: &input.resource_type,
            class: &input.resource_class,
            id: &input.resource_id,
            params: &input.resource_params,
            metadata: &input.resource_metadata,
            init: Object::new(),
            state: input.resource_state.clone(),
            shared: input.shared_state.clone(),
            source_workload: &input.source_workload,
            workload_services: &input.workload_services,
            namespace: input.namespace.as_deref(),
        };

        data.init = render_and_decode(&env, &self.init, &data)
            .map_err(|e| e.with_context("init template failed"))?;

        out.resource_state = render_and_decode(&env, &self.state, &data)
            .map_err(|e| e.with_context("state template failed"))?;
        data.state = out.resource_state.clone();

        out.shared_state = render_and_decode(&env, &self.shared, &data)
            .map_err(|e| e.with_context("shared template failed"))?;
        data.shared = patch_map(&data.shared, &out.shared_state);

        out.resource_outputs = render_and_decode(&env, &self.outputs, &data)
            .map_err(|e| e.with_context("outputs template failed"))?;

        out.manifests = render_and_decode(&env, &self.manifests, &data)
            .map_err(|e| e.with_context("manifests template failed"))?;

        for (i, manifest) in out.manifests.iter().enumerate() {
            validate_known_manifest(manifest).map_err(|e| {
                e.with_context(format!("manifests.{i}: matched a known kind but was not valid"))
            })?;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Object {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn parse_provisioner(yaml: &str) -> TemplateProvisioner {
        let raw: Value = serde_yaml::from_str(yaml).unwrap();
        TemplateProvisioner::parse(&raw).unwrap()
    }

    fn basic_input() -> Input {
        Input {
            resource_guid: "00000000-0000-0000-0000-000000000000".into(),
            resource_uid: "thing.default#w.r".into(),
            resource_type: "thing".into(),
            resource_class: "default".into(),
            resource_id: "w.r".into(),
            resource_params: obj(json!({"pk": "pv"})),
            resource_metadata: obj(json!({"mk": "mv"})),
            source_workload: "w".into(),
            workload_services: BTreeMap::new(),
            resource_state: obj(json!({"sk": "sv"})),
            shared_state: obj(json!({"ssk": "ssv"})),
            namespace: None,
        }
    }

    #[tokio::test]
    async fn test_provision_staged_evaluation() {
        let provisioner = parse_provisioner(
            r#"
uri: template://example
type: thing
description: desc
expected_outputs: [b, c]
supported_params: [ptest]
init: |
  a: {{ Uid }}
  b: {{ Type }}
state: |
  a: {{ Init.a }}
  b: stuff
shared: |
  c: 1
outputs: |
  b: {{ State.b | upper }}
  c: {{ Shared.c }}
manifests: |
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: thing
    data:
      key: value
"#,
        );
        let out = provisioner
            .provision(&CancellationToken::new(), &basic_input())
            .await
            .unwrap();
        assert_eq!(
            Value::Object(out.resource_state),
            json!({"a": "thing.default#w.r", "b": "stuff"})
        );
        assert_eq!(Value::Object(out.shared_state), json!({"c": 1}));
        assert_eq!(
            Value::Object(out.resource_outputs),
            json!({"b": "STUFF", "c": 1})
        );
        assert_eq!(out.manifests.len(), 1);
        assert_eq!(provisioner.expected_outputs(), vec!["b", "c"]);
        assert_eq!(provisioner.supported_params(), vec!["ptest"]);
        assert_eq!(provisioner.class_label(), "(any)");
    }

    #[tokio::test]
    async fn test_empty_templates_yield_empty_maps() {
        let provisioner = parse_provisioner("uri: template://empty\ntype: thing\n");
        let out = provisioner
            .provision(&CancellationToken::new(), &basic_input())
            .await
            .unwrap();
        assert!(out.resource_state.is_empty());
        assert!(out.resource_outputs.is_empty());
        assert!(out.shared_state.is_empty());
        assert!(out.manifests.is_empty());
    }

    #[tokio::test]
    async fn test_non_yaml_output_is_an_error() {
        let provisioner = parse_provisioner(
            "uri: template://bad\ntype: thing\noutputs: |\n  : not yaml [\n",
        );
        let err = provisioner
            .provision(&CancellationToken::new(), &basic_input())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outputs template failed"));
    }

    #[tokio::test]
    async fn test_fail_helper_surfaces_error() {
        let provisioner = parse_provisioner(
            "uri: template://fails\ntype: thing\ninit: |\n  {{ fail(\"host param required\") }}\n",
        );
        let err = provisioner
            .provision(&CancellationToken::new(), &basic_input())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("init template failed"));
        assert!(err.to_string().contains("host param required"));
    }

    #[tokio::test]
    async fn test_invalid_known_manifest_rejected() {
        let provisioner = parse_provisioner(
            r#"
uri: template://bad-manifest
type: thing
manifests: |
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: thing
    data: a-string-not-a-map
"#,
        );
        let err = provisioner
            .provision(&CancellationToken::new(), &basic_input())
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("manifests.0: matched a known kind but was not valid"));
    }

    #[tokio::test]
    async fn test_shared_state_visible_after_patch() {
        let provisioner = parse_provisioner(
            r#"
uri: template://shares
type: thing
shared: |
  ssk: null
  added: true
outputs: |
  still_there: {{ Shared.added }}
  removed: {{ Shared.ssk | default("gone") }}
"#,
        );
        let out = provisioner
            .provision(&CancellationToken::new(), &basic_input())
            .await
            .unwrap();
        assert_eq!(out.resource_outputs["still_there"], true);
        assert_eq!(out.resource_outputs["removed"], "gone");
    }

    #[test]
    fn test_match_rules() {
        let provisioner = parse_provisioner(
            "uri: template://x\ntype: dns\nclass: external\nid: shared-dns\n",
        );
        assert!(provisioner.matches(&ResourceUid::from("dns.external#shared-dns".to_string())));
        assert!(!provisioner.matches(&ResourceUid::from("dns.external#other".to_string())));
        assert!(!provisioner.matches(&ResourceUid::from("dns.default#shared-dns".to_string())));
        assert!(!provisioner.matches(&ResourceUid::from("route.external#shared-dns".to_string())));

        let wildcard = parse_provisioner("uri: template://y\ntype: dns\n");
        assert!(wildcard.matches(&ResourceUid::from("dns.default#w.r".to_string())));
        assert!(wildcard.matches(&ResourceUid::from("dns.external#shared".to_string())));
    }

    #[test]
    fn test_parse_requires_uri_and_type() {
        let raw: Value = serde_yaml::from_str("type: thing\nuri: ''\n").unwrap();
        assert!(TemplateProvisioner::parse(&raw).is_err());
        let raw: Value = serde_yaml::from_str("uri: template://x\ntype: ''\n").unwrap();
        assert!(TemplateProvisioner::parse(&raw).is_err());
        let raw: Value = serde_yaml::from_str("uri: template://x\ntype: t\nbogus: 1\n").unwrap();
        assert!(TemplateProvisioner::parse(&raw).is_err());
    }
}
