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

//! Resource provisioning: the provisioner contract and the dispatcher that
//! walks resources in dependency order, threading shared state forward.

pub mod command;
pub mod defaults;
pub mod loader;
pub mod template;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::score::{find_annotation, WORKLOAD_SERVICE_NAME_ANNOTATION};
use crate::domain::state::{ResourceUid, State};
use crate::domain::substitution::{build_substitution_function, substitute};
use crate::shared::{Object, Result, ScoreError};

/// Everything passed to a provisioner implementation: the resource
/// declaration, previous state, and the shared state used across resources.
/// This structure is also the stdin wire format of external-command
/// provisioners.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Input {
    pub resource_guid: String,
    pub resource_uid: String,
    pub resource_type: String,
    pub resource_class: String,
    pub resource_id: String,
    pub resource_params: Object,
    pub resource_metadata: Object,

    /// The workload that first defined this resource or carries its params.
    pub source_workload: String,
    /// Workload name to the network service it exposes.
    pub workload_services: BTreeMap<String, NetworkService>,

    pub resource_state: Object,
    pub shared_state: Object,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Describes how to contact the ports exposed by another workload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkService {
    pub service_name: String,
    pub ports: BTreeMap<String, ServicePort>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicePort {
    /// The port name from the workload specification.
    pub name: String,
    /// The numeric port intended to be published.
    pub port: i32,
    /// The port on the workload that hosts the actual traffic.
    pub target_port: i32,
    /// TCP or UDP.
    pub protocol: String,
}

/// The output returned from a provisioner implementation; also the stdout
/// wire format of external-command provisioners.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionOutput {
    #[serde(default)]
    pub resource_state: Object,
    #[serde(default)]
    pub resource_outputs: Object,
    #[serde(default)]
    pub shared_state: Object,
    #[serde(default)]
    pub manifests: Vec<Value>,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    fn uri(&self) -> &str;

    fn matches(&self, uid: &ResourceUid) -> bool;

    async fn provision(&self, ctx: &CancellationToken, input: &Input) -> Result<ProvisionOutput>;

    fn description(&self) -> &str {
        ""
    }

    fn resource_type(&self) -> &str;

    fn class_label(&self) -> String {
        "(any)".to_string()
    }

    fn supported_params(&self) -> Vec<String> {
        Vec::new()
    }

    fn expected_outputs(&self) -> Vec<String> {
        Vec::new()
    }
}

impl std::fmt::Debug for dyn Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("uri", &self.uri())
            .field("resource_type", &self.resource_type())
            .finish()
    }
}

/// Merge a patch mapping into a base mapping: keys with a null value are
/// deleted, nested mappings merge recursively, anything else overwrites.
pub fn patch_map(base: &Object, patch: &Object) -> Object {
    let mut out = base.clone();
    for (key, value) in patch {
        match value {
            Value::Null => {
                out.remove(key);
            }
            Value::Object(inner) => match out.get(key) {
                Some(Value::Object(existing)) => {
                    out.insert(key.clone(), Value::Object(patch_map(existing, inner)));
                }
                _ => {
                    out.insert(key.clone(), Value::Object(patch_map(&Object::new(), inner)));
                }
            },
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    out
}

impl ProvisionOutput {
    /// Apply the provisioning result to the resource's state. State,
    /// outputs, and manifests are always replaced; the shared state is
    /// patched.
    pub fn apply_to_state(
        &self,
        state: &mut State,
        uid: &ResourceUid,
        provisioner_uri: &str,
    ) -> Result<()> {
        debug!(
            resource = %uid,
            manifests = self.manifests.len(),
            "applying provisioner outputs"
        );
        let existing = state.resources.get_mut(uid).ok_or_else(|| {
            ScoreError::invariant_error(format!(
                "failed to apply provisioner output: unknown resource '{uid}'"
            ))
        })?;
        existing.provisioner_uri = provisioner_uri.to_string();
        existing.state = self.resource_state.clone();
        existing.outputs = self.resource_outputs.clone();
        existing.manifests = self.manifests.clone();
        state.shared_state = patch_map(&state.shared_state, &self.shared_state);
        Ok(())
    }
}

/// Describe how to contact the ports exposed by each workload. Every
/// numeric port is additionally indexed by its decimal string so templates
/// can name a port either way.
pub fn build_workload_services(state: &State) -> BTreeMap<String, NetworkService> {
    let mut out = BTreeMap::new();
    for (workload_name, workload) in &state.workloads {
        let mut service = NetworkService {
            service_name: find_annotation(&workload.spec.metadata, WORKLOAD_SERVICE_NAME_ANNOTATION)
                .unwrap_or_else(|| workload_name.clone()),
            ports: BTreeMap::new(),
        };
        if let Some(spec_service) = &workload.spec.service {
            for (port_name, port) in &spec_service.ports {
                service.ports.insert(
                    port_name.clone(),
                    ServicePort {
                        name: port_name.clone(),
                        port: port.port,
                        target_port: port.target_port.unwrap_or(port.port),
                        protocol: port
                            .protocol
                            .clone()
                            .unwrap_or_else(|| "TCP".to_string())
                            .to_uppercase(),
                    },
                );
            }
            for (port_name, port) in &spec_service.ports {
                let numeric = port.port.to_string();
                if !service.ports.contains_key(&numeric) {
                    let entry = service.ports[port_name].clone();
                    service.ports.insert(numeric, entry);
                }
            }
        }
        out.insert(workload_name.clone(), service);
    }
    out
}

/// Provision every resource in dependency order. The first matching
/// provisioner wins; a resource previously provisioned by a different
/// provisioner is refused.
pub async fn provision_resources(
    ctx: &CancellationToken,
    state: &mut State,
    provisioners: &[Box<dyn Provisioner>],
    namespace: Option<&str>,
) -> Result<()> {
    let ordered = state
        .sorted_resource_uids()
        .map_err(|e| e.with_context("failed to determine sort order for provisioning"))?;
    let workload_services = build_workload_services(state);

    for uid in ordered {
        if ctx.is_cancelled() {
            return Err(ScoreError::Cancelled);
        }
        let resource = state.resources[&uid].clone();
        let provisioner = provisioners
            .iter()
            .find(|p| p.matches(&uid))
            .ok_or_else(|| {
                ScoreError::config_error(format!(
                    "resource '{uid}' is not supported by any provisioner"
                ))
            })?;
        if !resource.provisioner_uri.is_empty() && resource.provisioner_uri != provisioner.uri() {
            return Err(ScoreError::config_error(format!(
                "resource '{uid}' was previously provisioned by a different provisioner \
                 ('{}') - undefined behavior",
                resource.provisioner_uri
            )));
        }

        let params = if resource.params.is_empty() {
            Object::new()
        } else {
            let outputs = state
                .resource_outputs_for_workload(&resource.source_workload)
                .map_err(|e| {
                    e.with_context(format!("failed to find params context for resource '{uid}'"))
                })?;
            let metadata = state.workloads[&resource.source_workload].spec.metadata.clone();
            let mut resolver = build_substitution_function(&metadata, &outputs);
            let substituted = substitute(&Value::Object(resource.params.clone()), &mut resolver)
                .map_err(|e| {
                    e.with_context(format!("failed to substitute params for resource '{uid}'"))
                })?;
            match substituted {
                Value::Object(map) => map,
                _ => Object::new(),
            }
        };

        let input = Input {
            resource_guid: resource.guid.clone(),
            resource_uid: uid.to_string(),
            resource_type: uid.resource_type().to_string(),
            resource_class: uid.class().to_string(),
            resource_id: uid.id().to_string(),
            resource_params: params,
            resource_metadata: resource.metadata.clone(),
            source_workload: resource.source_workload.clone(),
            workload_services: workload_services.clone(),
            resource_state: resource.state.clone(),
            shared_state: state.shared_state.clone(),
            namespace: namespace.map(str::to_string),
        };

        let output = provisioner
            .provision(ctx, &input)
            .await
            .map_err(|e| e.with_context(format!("resource '{uid}': failed to provision")))?;
        output
            .apply_to_state(state, &uid, provisioner.uri())
            .map_err(|e| e.with_context(format!("resource '{uid}': failed to apply outputs")))?;
        debug!(resource = %uid, provisioner = provisioner.uri(), "provisioned resource");
    }
    Ok(())
}
