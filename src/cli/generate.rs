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

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::score::WorkloadSpec;
use crate::domain::secrets::find_first_unresolved_secret_ref;
use crate::domain::state::StateDirectory;
use crate::infrastructure::kubernetes::{
    convert_workload, MANAGED_BY, SELECTOR_LABEL_MANAGED_BY,
};
use crate::infrastructure::patching::{override_path, patch_manifests};
use crate::infrastructure::provisioners::{loader, provision_resources};
use crate::shared::{Result, ScoreError};

/// Convert the Score files in the current project state into a combined set
/// of Kubernetes manifests. All resources and links between workloads are
/// resolved and provisioned as required. `score-k8s init` must have been
/// run first.
#[derive(Parser, Debug, Clone, Default)]
pub struct GenerateCommand {
    /// Score files to add to the project before generating
    #[arg(value_name = "SCORE_FILE")]
    pub files: Vec<String>,

    /// The output manifests file to write the manifests to; '-' writes to stdout
    #[arg(long, short = 'o', default_value = "manifests.yaml")]
    pub output: String,

    /// An optional file of Score overrides to merge in
    #[arg(long = "overrides-file", value_name = "PATH")]
    pub overrides_file: Option<String>,

    /// An optional set of path=value overrides to set or remove
    #[arg(long = "override-property", value_name = "PATH=VALUE")]
    pub override_properties: Vec<String>,

    /// An optional container image to use for any container with image == '.'
    #[arg(long)]
    pub image: Option<String>,

    /// An optional set of <kind|*>/<name|*>/path=value operations for the output manifests
    #[arg(long = "patch-manifests", value_name = "KIND/NAME/PATH=VALUE")]
    pub patch_manifests: Vec<String>,

    /// The namespace to set on namespaced manifests that don't carry one
    #[arg(long)]
    pub namespace: Option<String>,

    /// Also emit a Namespace manifest; requires --namespace
    #[arg(long)]
    pub generate_namespace: bool,
}

impl GenerateCommand {
    pub async fn execute(&self, ctx: &CancellationToken) -> Result<()> {
        self.execute_in(Path::new("."), ctx).await
    }

    pub async fn execute_in(&self, project_dir: &Path, ctx: &CancellationToken) -> Result<()> {
        let mut sd = StateDirectory::load(project_dir)?.ok_or_else(|| {
            ScoreError::config_error(
                "state directory does not exist, please run \"score-k8s init\" first",
            )
        })?;

        if self.files.len() != 1
            && (self.overrides_file.is_some()
                || !self.override_properties.is_empty()
                || self.image.is_some())
        {
            return Err(ScoreError::config_error(
                "cannot use --override-property, --overrides-file, or --image when 0 or more \
                 than 1 score files are provided",
            ));
        }
        if self.generate_namespace && self.namespace.is_none() {
            return Err(ScoreError::config_error(
                "the --namespace flag is required when using --generate-namespace",
            ));
        }

        let mut files = self.files.clone();
        files.sort();
        let mut added_this_run: BTreeSet<String> = BTreeSet::new();
        for file in &files {
            let spec = self.load_score_file(project_dir, file)?;
            let name = spec.name()?.to_string();
            if !added_this_run.insert(name.clone()) {
                return Err(ScoreError::invariant_error(format!(
                    "workload '{name}' is declared by multiple score files in this invocation"
                )));
            }
            sd.state.add_workload(spec, Some(PathBuf::from(file)))?;
            info!("Added score file to project: {file}");
        }

        if sd.state.workloads.is_empty() {
            return Err(ScoreError::config_error(
                "project is empty, please add a score file",
            ));
        }

        sd.state.prime_resources()?;
        info!(
            "Primed resources: {} workloads, {} resources",
            sd.state.workloads.len(),
            sd.state.resources.len()
        );

        let provisioners = loader::load_provisioners_from_directory(&sd.path)
            .map_err(|e| e.with_context("failed to load provisioners"))?;
        info!("Loaded {} provisioners", provisioners.len());

        provision_resources(ctx, &mut sd.state, &provisioners, self.namespace.as_deref())
            .await
            .map_err(|e| e.with_context("failed to provision resources"))?;

        sd.persist()
            .map_err(|e| e.with_context("failed to persist state file"))?;
        info!("Persisted state file");

        let mut manifests = collect_resource_manifests(&sd.state)?;
        for workload_name in sd.state.workloads.keys() {
            let workload_manifests = convert_workload(ctx, &sd.state, workload_name)
                .await
                .map_err(|e| e.with_context(format!("workload: {workload_name}: failed to convert")))?;
            info!(
                "Wrote {} manifests to manifests buffer for workload '{workload_name}'",
                workload_manifests.len()
            );
            manifests.extend(workload_manifests);
        }

        let patch_templates = sd.state.extras.patching_templates.clone();
        for (i, template) in patch_templates.iter().enumerate() {
            manifests = patch_manifests(&sd.state, manifests, template, &format!("#{}", i + 1))?;
        }

        for entry in &self.patch_manifests {
            manifests = apply_legacy_manifest_patch(entry, manifests)?;
        }

        if let Some(namespace) = &self.namespace {
            inject_namespace(&mut manifests, namespace);
            if self.generate_namespace {
                manifests.insert(
                    0,
                    json!({
                        "apiVersion": "v1",
                        "kind": "Namespace",
                        "metadata": {
                            "name": namespace,
                            "labels": {SELECTOR_LABEL_MANAGED_BY: MANAGED_BY},
                        },
                    }),
                );
            }
        }

        for manifest in &manifests {
            if let Some(path) = find_first_unresolved_secret_ref("", manifest) {
                return Err(ScoreError::invariant_error(format!(
                    "unresolved secret ref in manifest: {path}"
                )));
            }
        }

        let mut out = String::new();
        for manifest in &manifests {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(manifest)?);
        }
        if self.output == "-" {
            print!("{out}");
        } else {
            let output_path = if Path::new(&self.output).is_absolute() {
                PathBuf::from(&self.output)
            } else {
                project_dir.join(&self.output)
            };
            let temp = PathBuf::from(format!("{}.tmp", output_path.display()));
            fs::write(&temp, &out)
                .map_err(|err| ScoreError::config_error(format!("failed to write output file: {err}")))?;
            fs::rename(&temp, &output_path).map_err(|err| {
                ScoreError::config_error(format!("failed to complete writing output file: {err}"))
            })?;
            info!("Wrote manifests to '{}'", output_path.display());
        }
        Ok(())
    }

    fn load_score_file(&self, project_dir: &Path, file: &str) -> Result<WorkloadSpec> {
        let path = if Path::new(file).is_absolute() {
            PathBuf::from(file)
        } else {
            project_dir.join(file)
        };
        let raw = fs::read_to_string(&path).map_err(|err| {
            ScoreError::config_error(format!("failed to read input score file: {file}: {err}"))
        })?;
        let mut raw_workload: Value = serde_yaml::from_str(&raw).map_err(|err| {
            ScoreError::config_error(format!("failed to decode input score file: {file}: {err}"))
        })?;
        if !raw_workload.is_object() {
            return Err(ScoreError::config_error(format!(
                "failed to decode input score file: {file}: expected a mapping"
            )));
        }

        if let Some(overrides_file) = &self.overrides_file {
            let overrides_path = if Path::new(overrides_file).is_absolute() {
                PathBuf::from(overrides_file)
            } else {
                project_dir.join(overrides_file)
            };
            let overrides_raw = fs::read_to_string(&overrides_path).map_err(|err| {
                ScoreError::config_error(format!(
                    "--overrides-file '{overrides_file}' is invalid, failed to read file: {err}"
                ))
            })?;
            let overrides: Value = serde_yaml::from_str(&overrides_raw).map_err(|err| {
                ScoreError::config_error(format!(
                    "--overrides-file '{overrides_file}' is invalid: failed to decode yaml: {err}"
                ))
            })?;
            info!("Applying overrides from {overrides_file} to workload");
            merge_values(&mut raw_workload, &overrides);
        }

        for entry in &self.override_properties {
            let (path, value) = entry.split_once('=').ok_or_else(|| {
                ScoreError::config_error(format!(
                    "--override-property '{entry}' is invalid, expected a =-separated path and value"
                ))
            })?;
            info!("Overriding '{path}' in workload");
            let value = if value.is_empty() {
                None
            } else {
                Some(serde_yaml::from_str(value).map_err(|err| {
                    ScoreError::config_error(format!(
                        "--override-property '{entry}' is invalid, failed to decode value: {err}"
                    ))
                })?)
            };
            override_path(&mut raw_workload, path, value).map_err(|e| {
                e.with_context(format!("--override-property '{entry}' could not be applied"))
            })?;
        }

        let mut spec: WorkloadSpec = serde_json::from_value(raw_workload)
            .map_err(|err| ScoreError::validation_error(format!("invalid score file: {file}: {err}")))?;
        spec.validate()
            .map_err(|e| e.with_context(format!("invalid score file: {file}")))?;

        let container_names: Vec<String> = spec.containers.keys().cloned().collect();
        for container_name in container_names {
            if spec.containers[&container_name].image == "." {
                match &self.image {
                    Some(image) => {
                        spec.containers.get_mut(&container_name).unwrap().image = image.clone();
                        info!(
                            "Set container image for container '{container_name}' to {image} \
                             from --image"
                        );
                    }
                    None => {
                        return Err(ScoreError::config_error(format!(
                            "failed to convert '{file}' because container '{container_name}' \
                             has no image and --image was not provided"
                        )));
                    }
                }
            }
        }
        Ok(spec)
    }
}

/// Collect auxiliary manifests in resource uid order. Manifests that are
/// deep-equal and share an identity are emitted once; an identity collision
/// with different content is an error.
fn collect_resource_manifests(state: &crate::domain::state::State) -> Result<Vec<Value>> {
    let mut manifests: Vec<Value> = Vec::new();
    let mut seen: BTreeMap<(String, String, String, String), Value> = BTreeMap::new();
    for uid in state.sorted_resource_uids()? {
        let resource = &state.resources[&uid];
        if resource.manifests.is_empty() {
            continue;
        }
        for manifest in &resource.manifests {
            let identity = (
                manifest
                    .get("apiVersion")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                manifest
                    .get("kind")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                manifest
                    .pointer("/metadata/namespace")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                manifest
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            );
            if identity.1.is_empty() || identity.3.is_empty() {
                manifests.push(manifest.clone());
                continue;
            }
            let duplicate = match seen.get(&identity) {
                Some(existing) if existing == manifest => true,
                Some(_) => {
                    return Err(ScoreError::invariant_error(format!(
                        "resource '{uid}' produced a manifest {}/{} conflicting with another \
                         resource",
                        identity.1, identity.3
                    )));
                }
                None => false,
            };
            if !duplicate {
                seen.insert(identity, manifest.clone());
                manifests.push(manifest.clone());
            }
        }
        info!(
            "Wrote {} resource manifests to manifests buffer for resource '{uid}'",
            resource.manifests.len()
        );
    }
    Ok(manifests)
}

/// Recursive merge of an overrides mapping into the raw workload mapping.
fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_values(existing, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Apply one legacy `<kind|*>/<name|*>/path=value` patch entry across the
/// manifest list. An empty value deletes the addressed path.
fn apply_legacy_manifest_patch(entry: &str, mut manifests: Vec<Value>) -> Result<Vec<Value>> {
    let (selector, raw_value) = entry.split_once('=').ok_or_else(|| {
        ScoreError::config_error(format!(
            "--patch-manifests '{entry}' is invalid, expected a =-separated path and value"
        ))
    })?;
    let parts: Vec<&str> = selector.splitn(3, '/').collect();
    if parts.len() != 3 {
        return Err(ScoreError::config_error(format!(
            "--patch-manifests '{entry}' is invalid, expected the patch path to have an \
             initial <kind>/<name>/... prefix"
        )));
    }
    let (kind_filter, name_filter, path) = (parts[0], parts[1], parts[2]);
    let value: Option<Value> = if raw_value.is_empty() {
        None
    } else {
        Some(serde_yaml::from_str(raw_value).map_err(|err| {
            ScoreError::config_error(format!(
                "--patch-manifests '{entry}' is invalid, failed to decode value: {err}"
            ))
        })?)
    };

    for manifest in manifests.iter_mut() {
        let kind = manifest
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let name = manifest
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if (kind_filter == "*" || kind == kind_filter) && (name_filter == "*" || name == name_filter)
        {
            info!("Overriding '{path}' in manifest {kind}/{name}");
            override_path(manifest, path, value.clone()).map_err(|e| {
                e.with_context(format!(
                    "--patch-manifests '{entry}' could not be applied to {kind}/{name}"
                ))
            })?;
        }
    }
    Ok(manifests)
}

/// Fill in `metadata.namespace` where it is absent. Patches that set a
/// namespace explicitly always win; the Namespace kind itself is skipped.
fn inject_namespace(manifests: &mut [Value], namespace: &str) {
    for manifest in manifests.iter_mut() {
        let Some(map) = manifest.as_object_mut() else {
            continue;
        };
        if map.get("kind").and_then(Value::as_str) == Some("Namespace") {
            continue;
        }
        let metadata = map
            .entry("metadata".to_string())
            .or_insert_with(|| json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata
                .entry("namespace".to_string())
                .or_insert_with(|| Value::String(namespace.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_values_deep() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "keep": true});
        merge_values(&mut base, &json!({"a": {"c": 3, "d": 4}}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 3, "d": 4}, "keep": true}));
    }

    #[test]
    fn test_apply_legacy_manifest_patch() {
        let manifests = vec![
            json!({"kind": "Deployment", "metadata": {"name": "foo"}, "spec": {}}),
            json!({"kind": "Service", "metadata": {"name": "foo"}}),
        ];
        let out =
            apply_legacy_manifest_patch("Deployment/foo/spec.replicas=4", manifests).unwrap();
        assert_eq!(out[0]["spec"]["replicas"], 4);
        assert!(out[1].get("spec").is_none());

        let out = apply_legacy_manifest_patch(
            "*/*/metadata.annotations.key=value",
            out,
        )
        .unwrap();
        assert_eq!(out[0]["metadata"]["annotations"]["key"], "value");
        assert_eq!(out[1]["metadata"]["annotations"]["key"], "value");
    }

    #[test]
    fn test_inject_namespace_fills_absent_only() {
        let mut manifests = vec![
            json!({"kind": "Deployment", "metadata": {"name": "a"}}),
            json!({"kind": "Service", "metadata": {"name": "b", "namespace": "explicit"}}),
            json!({"kind": "Namespace", "metadata": {"name": "ns"}}),
        ];
        inject_namespace(&mut manifests, "test-ns");
        assert_eq!(manifests[0]["metadata"]["namespace"], "test-ns");
        assert_eq!(manifests[1]["metadata"]["namespace"], "explicit");
        assert!(manifests[2]["metadata"].get("namespace").is_none());
    }
}
