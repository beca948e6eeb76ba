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

//! Workload conversion: each Score workload becomes a Deployment or
//! StatefulSet plus its Services and generated ConfigMaps.

pub mod files;
pub mod resources;
pub mod variables;
pub mod volumes;

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ExecAction, HTTPGetAction, HTTPHeader, Namespace,
    PersistentVolumeClaim, Pod, PodSpec, PodTemplateSpec, Probe, Secret, Service, ServicePort,
    ServiceSpec, Volume,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::score::{
    get_annotations, ContainerProbe, WORKLOAD_KIND_ANNOTATION, WORKLOAD_NAME_ANNOTATION,
    WORKLOAD_SERVICE_NAME_ANNOTATION,
};
use crate::domain::state::{ResourceUid, State};
use crate::domain::substitution::{build_substitution_function, split_ref_parts};
use crate::shared::{Object, Result, ScoreError};

pub const WORKLOAD_KIND_DEPLOYMENT: &str = "Deployment";
pub const WORKLOAD_KIND_STATEFUL_SET: &str = "StatefulSet";

pub const SELECTOR_LABEL_NAME: &str = "app.kubernetes.io/name";
pub const SELECTOR_LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const SELECTOR_LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "score-k8s";

/// The JSON structure piped to a delegated converter binary, and the input
/// of the internal conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterInputs {
    pub workload_name: String,
    pub pod_template: PodTemplateSpec,
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,
    pub service_ports: Vec<ServicePort>,
    pub workload_annotations: BTreeMap<String, String>,
}

/// Convert a workload into its ordered manifest list: generated ConfigMaps
/// first, then the Service (if any), then the workload object itself.
pub async fn convert_workload(
    ctx: &CancellationToken,
    state: &State,
    workload_name: &str,
) -> Result<Vec<Value>> {
    let workload = state.workloads.get(workload_name).ok_or_else(|| {
        ScoreError::invariant_error(format!("workload '{workload_name}' not found in state"))
    })?;
    let spec = &workload.spec;
    spec.validate()?;
    let res_outputs = state.resource_outputs_for_workload(workload_name)?;
    let metadata = &spec.metadata;
    let score_file_dir = workload.file.as_deref().and_then(Path::parent);

    let mut manifests: Vec<Value> = Vec::new();
    let mut volumes: Vec<Volume> = Vec::new();
    let mut volume_claim_templates: Vec<PersistentVolumeClaim> = Vec::new();
    let mut containers: Vec<Container> = Vec::new();

    let common_labels = BTreeMap::from([
        (SELECTOR_LABEL_NAME.to_string(), workload_name.to_string()),
        (
            SELECTOR_LABEL_INSTANCE.to_string(),
            format!("{workload_name}{}", workload.instance_suffix),
        ),
        (SELECTOR_LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
    ]);

    for (container_name, container) in &spec.containers {
        let mut c = Container {
            name: container_name.clone(),
            image: Some(container.image.clone()),
            command: container.command.clone(),
            args: container.args.clone(),
            ..Default::default()
        };

        c.resources = Some(
            resources::convert_container_resources(container.resources.as_ref()).map_err(|e| {
                e.with_context(format!("containers.{container_name}.resources: failed to convert"))
            })?,
        );

        let mut resolver = build_substitution_function(metadata, &res_outputs);
        let env = variables::convert_container_variables(&container.variables, &mut resolver)
            .map_err(|e| {
                e.with_context(format!("containers.{container_name}.variables: failed to convert"))
            })?;
        if !env.is_empty() {
            c.env = Some(env);
        }

        let mut container_volumes: Vec<Volume> = Vec::new();
        let mut container_mounts = Vec::new();

        // Volume sources referencing `resources.<name>` resolve to the
        // resource uid rather than an output value.
        let mut base_resolver = build_substitution_function(metadata, &res_outputs);
        let mut volume_resolver = |reference: &str| -> Result<String> {
            let parts = split_ref_parts(reference);
            if parts.len() == 2 && parts[0] == "resources" {
                let res_name = parts[1];
                return match spec.resources.get(res_name) {
                    Some(decl) => Ok(ResourceUid::new(
                        workload_name,
                        res_name,
                        &decl.resource_type,
                        decl.class.as_deref(),
                        decl.id.as_deref(),
                    )
                    .to_string()),
                    None => Err(ScoreError::validation_error(format!(
                        "resource '{res_name}' does not exist"
                    ))),
                };
            }
            base_resolver(reference)
        };
        for (i, volume) in container.volumes.iter().enumerate() {
            let (mount, vol, claim) =
                volumes::convert_container_volume(i, volume, &state.resources, &mut volume_resolver)
                    .map_err(|e| {
                        e.with_context(format!(
                            "containers.{container_name}.volumes.{i}: failed to convert"
                        ))
                    })?;
            container_mounts.push(mount);
            if let Some(claim) = claim {
                volume_claim_templates.push(claim);
            } else if let Some(vol) = vol {
                container_volumes.push(vol);
            }
        }

        let mut file_resolver = build_substitution_function(metadata, &res_outputs);
        for (target, file) in &container.files {
            let (mount, config_map, vol) = files::convert_container_file(
                target,
                file,
                &format!("{workload_name}-{container_name}-"),
                score_file_dir,
                &mut file_resolver,
            )
            .map_err(|e| {
                e.with_context(format!(
                    "containers.{container_name}.files.{target}: failed to convert"
                ))
            })?;
            container_mounts.push(mount);
            if let Some(config_map) = config_map {
                manifests.push(serde_json::to_value(&config_map)?);
            }
            if let Some(vol) = vol {
                container_volumes.push(vol);
            }
        }

        let (container_volumes, container_mounts) =
            volumes::collapse_volume_mounts(container_volumes, container_mounts).map_err(|e| {
                e.with_context(format!(
                    "containers.{container_name}.volumes: failed to combine projected volumes"
                ))
            })?;
        if !container_mounts.is_empty() {
            c.volume_mounts = Some(container_mounts);
        }
        volumes.extend(container_volumes);

        if let Some(probe) = &container.liveness_probe {
            c.liveness_probe = Some(build_probe(probe).map_err(|e| {
                e.with_context(format!("containers.{container_name}.livenessProbe"))
            })?);
        }
        if let Some(probe) = &container.readiness_probe {
            c.readiness_probe = Some(build_probe(probe).map_err(|e| {
                e.with_context(format!("containers.{container_name}.readinessProbe"))
            })?);
        }

        containers.push(c);
    }

    let mut service_ports: Vec<ServicePort> = Vec::new();
    if let Some(service) = &spec.service {
        for (port_name, port) in &service.ports {
            let target_port = port.target_port.filter(|p| *p > 0).unwrap_or(port.port);
            let protocol = port
                .protocol
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "TCP".to_string())
                .to_uppercase();
            service_ports.push(ServicePort {
                name: Some(port_name.clone()),
                port: port.port,
                target_port: Some(IntOrString::Int(target_port)),
                protocol: Some(protocol),
                ..Default::default()
            });
        }
    }

    let inputs = ConverterInputs {
        workload_name: workload_name.to_string(),
        workload_annotations: get_annotations(metadata),
        pod_template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(common_labels),
                annotations: Some(build_pod_annotations(workload_name, metadata)),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers,
                volumes: (!volumes.is_empty()).then_some(volumes),
                ..Default::default()
            }),
        },
        volume_claim_templates,
        service_ports,
    };

    // Round-trip the inputs through their JSON wire form so the internal
    // converter sees exactly what a delegated binary would.
    let raw_inputs = serde_json::to_vec(&inputs)?;
    let converted = match &workload.converter_binary {
        Some(binary) => run_converter_binary(ctx, binary, &raw_inputs).await?,
        None => convert_raw_inputs_to_manifests(&raw_inputs)?,
    };
    manifests.extend(converted);
    Ok(manifests)
}

pub fn convert_raw_inputs_to_manifests(raw_inputs: &[u8]) -> Result<Vec<Value>> {
    let inputs: ConverterInputs = serde_json::from_slice(raw_inputs)
        .map_err(|err| ScoreError::validation_error(format!("failed to decode: {err}")))?;
    convert_inputs_to_manifests(&inputs)
}

async fn run_converter_binary(
    ctx: &CancellationToken,
    binary: &str,
    raw_inputs: &[u8],
) -> Result<Vec<Value>> {
    let parts: Vec<&str> = binary.split(',').collect();
    let mut command = tokio::process::Command::new(parts[0]);
    command
        .args(&parts[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    let mut child = command.spawn().map_err(|err| {
        ScoreError::validation_error(format!("failed to run converter binary '{binary}': {err}"))
    })?;
    let mut stdin = child.stdin.take().expect("stdin was piped");
    stdin.write_all(raw_inputs).await?;
    drop(stdin);
    let output = tokio::select! {
        _ = ctx.cancelled() => return Err(ScoreError::Cancelled),
        output = child.wait_with_output() => output?,
    };
    if !output.status.success() {
        return Err(ScoreError::validation_error(format!(
            "failed to run converter binary '{binary}': exited with {}",
            output.status
        )));
    }
    let manifests: Vec<Value> = serde_json::from_slice(&output.stdout).map_err(|err| {
        ScoreError::validation_error(format!(
            "failed to decode convert outputs into manifests: {err}"
        ))
    })?;
    Ok(manifests)
}

/// The annotation-selected workload kind decides between a Deployment and a
/// StatefulSet with its headless Service; the Service covering the declared
/// ports is shared between both shapes.
pub fn convert_inputs_to_manifests(inputs: &ConverterInputs) -> Result<Vec<Value>> {
    let kind = inputs
        .workload_annotations
        .get(WORKLOAD_KIND_ANNOTATION)
        .map(String::as_str)
        .filter(|k| !k.is_empty())
        .unwrap_or(WORKLOAD_KIND_DEPLOYMENT);
    if kind != WORKLOAD_KIND_DEPLOYMENT && kind != WORKLOAD_KIND_STATEFUL_SET {
        return Err(ScoreError::config_error(format!(
            "metadata: annotations: {WORKLOAD_KIND_ANNOTATION}: unsupported workload kind '{kind}'"
        )));
    }
    if kind == WORKLOAD_KIND_DEPLOYMENT && !inputs.volume_claim_templates.is_empty() {
        return Err(ScoreError::validation_error(format!(
            "volumes: persistent volume claims require a StatefulSet workload \
             (set the {WORKLOAD_KIND_ANNOTATION} annotation)"
        )));
    }

    let labels = inputs
        .pod_template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    let instance = labels
        .get(SELECTOR_LABEL_INSTANCE)
        .cloned()
        .unwrap_or_default();
    let selector = LabelSelector {
        match_labels: Some(BTreeMap::from([(
            SELECTOR_LABEL_INSTANCE.to_string(),
            instance.clone(),
        )])),
        ..Default::default()
    };
    let top_level_annotations = BTreeMap::from([(
        WORKLOAD_NAME_ANNOTATION.to_string(),
        inputs.workload_name.clone(),
    )]);

    let mut manifests: Vec<Value> = Vec::new();

    if !inputs.service_ports.is_empty() {
        let service_name = inputs
            .workload_annotations
            .get(WORKLOAD_SERVICE_NAME_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| inputs.workload_name.clone());
        manifests.push(serde_json::to_value(&Service {
            metadata: ObjectMeta {
                name: Some(service_name),
                annotations: Some(top_level_annotations.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([(
                    SELECTOR_LABEL_INSTANCE.to_string(),
                    instance.clone(),
                )])),
                ports: Some(inputs.service_ports.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })?);
    }

    match kind {
        WORKLOAD_KIND_DEPLOYMENT => {
            manifests.push(serde_json::to_value(&Deployment {
                metadata: ObjectMeta {
                    name: Some(inputs.workload_name.clone()),
                    annotations: Some(top_level_annotations),
                    labels: Some(labels),
                    ..Default::default()
                },
                spec: Some(DeploymentSpec {
                    selector,
                    template: inputs.pod_template.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })?);
        }
        _ => {
            let headless_service_name = format!("{}-headless-svc", inputs.workload_name);
            manifests.push(serde_json::to_value(&Service {
                metadata: ObjectMeta {
                    name: Some(headless_service_name.clone()),
                    annotations: Some(top_level_annotations.clone()),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                spec: Some(ServiceSpec {
                    selector: Some(BTreeMap::from([(
                        SELECTOR_LABEL_INSTANCE.to_string(),
                        instance,
                    )])),
                    cluster_ip: Some("None".to_string()),
                    ports: Some(vec![ServicePort {
                        name: Some("default".to_string()),
                        port: 99,
                        target_port: Some(IntOrString::Int(99)),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            })?);
            manifests.push(serde_json::to_value(&StatefulSet {
                metadata: ObjectMeta {
                    name: Some(inputs.workload_name.clone()),
                    annotations: Some(top_level_annotations),
                    labels: Some(labels),
                    ..Default::default()
                },
                spec: Some(StatefulSetSpec {
                    selector,
                    service_name: headless_service_name,
                    template: inputs.pod_template.clone(),
                    volume_claim_templates: (!inputs.volume_claim_templates.is_empty())
                        .then(|| inputs.volume_claim_templates.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            })?);
        }
    }

    Ok(manifests)
}

fn build_probe(probe: &ContainerProbe) -> Result<Probe> {
    if let Some(http) = &probe.http_get {
        let headers: Vec<HTTPHeader> = http
            .http_headers
            .iter()
            .map(|h| HTTPHeader {
                name: h.name.clone(),
                value: h.value.clone(),
            })
            .collect();
        return Ok(Probe {
            http_get: Some(HTTPGetAction {
                path: http.path.clone(),
                port: IntOrString::Int(http.port),
                host: http.host.clone(),
                scheme: http.scheme.clone(),
                http_headers: (!headers.is_empty()).then_some(headers),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    if let Some(exec) = &probe.exec {
        return Ok(Probe {
            exec: Some(ExecAction {
                command: Some(exec.command.clone()),
            }),
            ..Default::default()
        });
    }
    Err(ScoreError::validation_error(
        "probe requires one of 'httpGet' or 'exec'",
    ))
}

/// The pod template inherits every workload annotation outside the
/// `k8s.score.dev/` scope, plus the workload-name marker.
fn build_pod_annotations(workload_name: &str, metadata: &Object) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = get_annotations(metadata)
        .into_iter()
        .filter(|(k, _)| !k.starts_with(crate::domain::score::ANNOTATION_PREFIX))
        .collect();
    out.insert(
        WORKLOAD_NAME_ANNOTATION.to_string(),
        workload_name.to_string(),
    );
    out
}

/// Decode a dynamic value into a typed Kubernetes structure while rejecting
/// unknown fields. The generated deserializers ignore fields they don't
/// know, so strictness is enforced by re-serializing the typed value and
/// reporting the first input path that didn't survive the round trip.
pub fn strict_decode<T: DeserializeOwned + Serialize>(value: &Value) -> Result<T> {
    let typed: T = serde_json::from_value(value.clone())
        .map_err(|err| ScoreError::validation_error(err.to_string()))?;
    let round = serde_json::to_value(&typed)?;
    if let Some(path) = find_unknown_path("", value, &round) {
        return Err(ScoreError::validation_error(format!(
            "unknown field \"{}\"",
            path.trim_start_matches('.')
        )));
    }
    Ok(typed)
}

fn find_unknown_path(path: &str, original: &Value, round: &Value) -> Option<String> {
    match (original, round) {
        (Value::Object(original), Value::Object(round)) => {
            original.iter().find_map(|(k, v)| match round.get(k) {
                Some(rv) => find_unknown_path(&format!("{path}.{k}"), v, rv),
                None if v.is_null() => None,
                None => Some(format!("{path}.{k}")),
            })
        }
        (Value::Array(original), Value::Array(round)) => {
            original.iter().enumerate().find_map(|(i, v)| {
                round
                    .get(i)
                    .and_then(|rv| find_unknown_path(&format!("{path}.{i}"), v, rv))
            })
        }
        (Value::Object(_), _) | (Value::Array(_), _) => Some(path.to_string()),
        _ => None,
    }
}

/// Validate a manifest against the built-in Kubernetes kinds. Unknown kinds
/// are allowed through untouched; known kinds must decode strictly.
pub fn validate_known_manifest(manifest: &Value) -> Result<()> {
    let api_version = manifest
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let kind = manifest
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match (api_version, kind) {
        ("v1", "ConfigMap") => strict_decode::<ConfigMap>(manifest).map(drop),
        ("v1", "Secret") => strict_decode::<Secret>(manifest).map(drop),
        ("v1", "Service") => strict_decode::<Service>(manifest).map(drop),
        ("v1", "Pod") => strict_decode::<Pod>(manifest).map(drop),
        ("v1", "Namespace") => strict_decode::<Namespace>(manifest).map(drop),
        ("v1", "PersistentVolumeClaim") => {
            strict_decode::<PersistentVolumeClaim>(manifest).map(drop)
        }
        ("apps/v1", "Deployment") => strict_decode::<Deployment>(manifest).map(drop),
        ("apps/v1", "StatefulSet") => strict_decode::<StatefulSet>(manifest).map(drop),
        ("batch/v1", "Job") => strict_decode::<Job>(manifest).map(drop),
        ("batch/v1", "CronJob") => strict_decode::<CronJob>(manifest).map(drop),
        ("networking.k8s.io/v1", "Ingress") => strict_decode::<Ingress>(manifest).map(drop),
        ("networking.k8s.io/v1", "NetworkPolicy") => {
            strict_decode::<NetworkPolicy>(manifest).map(drop)
        }
        _ => {
            debug!(api_version, kind, "skipping validation of unknown manifest kind");
            Ok(())
        }
    }
}
