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

//! Container volume conversion and projected-volume collapsing.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapProjection, PersistentVolumeClaim, PersistentVolumeClaimSpec, ProjectedVolumeSource,
    SecretProjection, Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::score::ContainerVolume;
use crate::domain::state::{ResourceState, ResourceUid};
use crate::domain::substitution::substitute_string;
use crate::shared::{Result, ScoreError};

use super::strict_decode;

/// The schema a resource's outputs must satisfy to back a container volume:
/// exactly one of a direct volume source or a claim spec for a StatefulSet
/// volume claim template.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct VolumeOutputs {
    #[serde(default)]
    source: Option<Value>,
    #[serde(default, rename = "claimSpec")]
    claim_spec: Option<Value>,
}

pub fn convert_container_volume(
    index: usize,
    volume: &ContainerVolume,
    resources: &BTreeMap<ResourceUid, ResourceState>,
    resolver: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<(VolumeMount, Option<Volume>, Option<PersistentVolumeClaim>)> {
    let vol_name = format!("vol-{index}");
    let mount = VolumeMount {
        name: vol_name.clone(),
        mount_path: volume.target.clone(),
        sub_path: volume.path.clone().filter(|p| !p.is_empty()),
        read_only: volume.read_only.filter(|ro| *ro),
        ..Default::default()
    };

    let resolved_source = substitute_string(&volume.source, resolver)
        .map_err(|e| e.with_context("source: failed to resolve placeholder"))?;

    let uid = ResourceUid::from(resolved_source.clone());
    let res = resources.get(&uid).ok_or_else(|| {
        ScoreError::validation_error(format!("source: resource '{resolved_source}' does not exist"))
    })?;

    let outputs: VolumeOutputs = serde_json::from_value(Value::Object(res.outputs.clone()))
        .map_err(|err| {
            ScoreError::validation_error(format!(
                "failed to convert resource '{resolved_source}' outputs into a Kubernetes \
                 volume: {err}"
            ))
        })?;
    match (outputs.source, outputs.claim_spec) {
        (Some(source), None) => {
            let decode_context = || {
                format!(
                    "failed to convert resource '{resolved_source}' outputs into a Kubernetes \
                     volume"
                )
            };
            // A Volume is its source fields plus a name, so the source
            // subtree decodes as a Volume once the name slot is filled in.
            let source_map = source.as_object().cloned().ok_or_else(|| {
                ScoreError::validation_error(format!("{}: source is not a mapping", decode_context()))
            })?;
            if source_map.contains_key("name") {
                return Err(ScoreError::validation_error(format!(
                    "{}: unknown field \"name\"",
                    decode_context()
                )));
            }
            if source_map.is_empty() {
                return Err(ScoreError::validation_error(format!(
                    "failed to convert resource '{resolved_source}' outputs into volume: \
                     source is empty"
                )));
            }
            let mut with_name = source_map;
            with_name.insert("name".to_string(), Value::String(vol_name));
            let volume: Volume = strict_decode(&Value::Object(with_name))
                .map_err(|e| e.with_context(decode_context()))?;
            Ok((mount, Some(volume), None))
        }
        (None, Some(claim)) => {
            let claim_spec: PersistentVolumeClaimSpec = strict_decode(&claim).map_err(|e| {
                e.with_context(format!(
                    "failed to convert resource '{resolved_source}' outputs into a Kubernetes \
                     volume"
                ))
            })?;
            if claim_spec == PersistentVolumeClaimSpec::default() {
                return Err(ScoreError::validation_error(format!(
                    "failed to convert resource '{resolved_source}' outputs into volume: \
                     claimSpec is empty"
                )));
            }
            let claim = PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(vol_name),
                    ..Default::default()
                },
                spec: Some(claim_spec),
                ..Default::default()
            };
            Ok((mount, None, Some(claim)))
        }
        _ => Err(ScoreError::validation_error(format!(
            "failed to convert resource '{resolved_source}' outputs into volume: either \
             'source' or 'claimSpec' required"
        ))),
    }
}

struct VolumeAndMount {
    volume: Volume,
    mount: VolumeMount,
}

/// Collapse ConfigMap- and Secret-backed volumes that share a mount path
/// into a single projected volume per path, so that multiple files can
/// coexist in one directory.
pub fn collapse_volume_mounts(
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
) -> Result<(Vec<Volume>, Vec<VolumeMount>)> {
    let mut output_mounts: Vec<VolumeMount> = Vec::with_capacity(mounts.len());
    let mut output_vols: Vec<Volume> = Vec::with_capacity(volumes.len());

    // Group the configmap and secret volumes by mount path; everything else
    // passes straight through.
    let mut groups: BTreeMap<String, Vec<VolumeAndMount>> = BTreeMap::new();
    for mount in mounts {
        match volumes.iter().find(|v| v.name == mount.name) {
            Some(vol) if vol.config_map.is_some() || vol.secret.is_some() => {
                groups.entry(mount.mount_path.clone()).or_default().push(
                    VolumeAndMount {
                        volume: vol.clone(),
                        mount,
                    },
                );
            }
            Some(vol) => {
                output_vols.push(vol.clone());
                output_mounts.push(mount);
            }
            None => output_mounts.push(mount),
        }
    }

    let mut projected_volume_index = 0;
    for (mount_path, group) in groups {
        if group.len() == 1 {
            let single = group.into_iter().next().unwrap();
            output_vols.push(single.volume);
            output_mounts.push(single.mount);
            continue;
        }

        let sources: Vec<VolumeProjection> = group
            .iter()
            .map(|entry| {
                if let Some(config_map) = &entry.volume.config_map {
                    VolumeProjection {
                        config_map: Some(ConfigMapProjection {
                            name: config_map.name.clone(),
                            items: config_map.items.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }
                } else {
                    let secret = entry.volume.secret.as_ref().unwrap();
                    VolumeProjection {
                        secret: Some(SecretProjection {
                            name: secret.secret_name.clone(),
                            items: secret.items.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }
                }
            })
            .collect();

        let new_vol = Volume {
            name: format!("proj-vol-{projected_volume_index}"),
            projected: Some(ProjectedVolumeSource {
                sources: Some(sources),
                ..Default::default()
            }),
            ..Default::default()
        };
        output_mounts.push(VolumeMount {
            name: new_vol.name.clone(),
            mount_path,
            read_only: Some(true),
            ..Default::default()
        });
        output_vols.push(new_vol);
        projected_volume_index += 1;
    }

    Ok((output_vols, output_mounts))
}
