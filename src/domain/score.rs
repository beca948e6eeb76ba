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

//! Typed view of the Score workload specification.
//!
//! Decoding is strict: unknown fields anywhere in a workload file are
//! rejected so that typos surface as validation errors rather than being
//! silently dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::{Object, Result, ScoreError};

pub const ANNOTATION_PREFIX: &str = "k8s.score.dev/";
pub const WORKLOAD_KIND_ANNOTATION: &str = "k8s.score.dev/kind";
pub const WORKLOAD_SERVICE_NAME_ANNOTATION: &str = "k8s.score.dev/service-name";
pub const WORKLOAD_NAME_ANNOTATION: &str = "k8s.score.dev/workload-name";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Free-form metadata mapping. Must contain a `name` key holding a valid
    /// Kubernetes name; `annotations` is an optional string mapping.
    pub metadata: Object,

    pub containers: BTreeMap<String, Container>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<WorkloadService>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Container {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,

    /// File mounts keyed by the target path inside the container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, ContainerFile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<ContainerVolume>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ContainerResources>,

    #[serde(
        rename = "livenessProbe",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub liveness_probe: Option<ContainerProbe>,

    #[serde(
        rename = "readinessProbe",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub readiness_probe: Option<ContainerProbe>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContainerFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(
        rename = "binaryContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub binary_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(rename = "noExpand", default, skip_serializing_if = "Option::is_none")]
    pub no_expand: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContainerVolume {
    pub source: String,
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(rename = "readOnly", default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContainerResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourcesLimits>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourcesLimits>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourcesLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContainerProbe {
    #[serde(rename = "httpGet", default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpProbe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecProbe>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HttpProbe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(
        rename = "httpHeaders",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub http_headers: Vec<HttpHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExecProbe {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkloadService {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, ServicePort>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServicePort {
    pub port: i32,

    #[serde(
        rename = "targetPort",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourceDeclaration {
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Object>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Object>,
}

impl WorkloadSpec {
    /// The workload name from `metadata.name`.
    pub fn name(&self) -> Result<&str> {
        match self.metadata.get("name") {
            Some(Value::String(s)) => Ok(s),
            _ => Err(ScoreError::validation_error(
                "metadata: name is required and must be a string",
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name()?;
        if !is_valid_k8s_name(name) {
            return Err(ScoreError::validation_error(format!(
                "metadata: name '{name}' is not a valid Kubernetes name"
            )));
        }
        if self.containers.is_empty() {
            return Err(ScoreError::validation_error(
                "containers: at least one container is required",
            ));
        }
        Ok(())
    }
}

/// Return the workload annotations as a string mapping. Non-string values
/// are skipped, matching the behavior of the annotation lookup.
pub fn get_annotations(metadata: &Object) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(Value::Object(annotations)) = metadata.get("annotations") {
        for (k, v) in annotations {
            if let Value::String(s) = v {
                out.insert(k.clone(), s.clone());
            }
        }
    }
    out
}

pub fn find_annotation(metadata: &Object, annotation: &str) -> Option<String> {
    if let Some(Value::Object(annotations)) = metadata.get("annotations") {
        if let Some(Value::String(s)) = annotations.get(annotation) {
            return Some(s.clone());
        }
    }
    None
}

pub(crate) fn is_valid_k8s_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    if !name.chars().next().unwrap_or(' ').is_ascii_alphanumeric() {
        return false;
    }
    if !name.chars().last().unwrap_or(' ').is_ascii_alphanumeric() {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}
