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

//! The persisted project state: workloads, resources, and shared state.
//!
//! The state lives in `.score-k8s/state.yaml` and round-trips through YAML
//! with strict decoding. It holds everything needed to re-generate the
//! manifests without the original command line, including any state or
//! credentials owned by resource provisioners, so the directory should not
//! be checked into source control.

pub mod primer;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::score::WorkloadSpec;
use crate::shared::{Object, Result, ScoreError};

pub const DEFAULT_RELATIVE_STATE_DIRECTORY: &str = ".score-k8s";
pub const STATE_FILE_NAME: &str = "state.yaml";

/// Canonical resource identity serialized as `type.class#scope` where the
/// scope is either an explicit shared id or `workloadName.resourceName`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct ResourceUid(String);

impl ResourceUid {
    pub fn new(
        workload_name: &str,
        resource_name: &str,
        resource_type: &str,
        class: Option<&str>,
        id: Option<&str>,
    ) -> Self {
        let class = class.unwrap_or("default");
        match id {
            Some(id) => Self(format!("{resource_type}.{class}#{id}")),
            None => Self(format!(
                "{resource_type}.{class}#{workload_name}.{resource_name}"
            )),
        }
    }

    pub fn resource_type(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    pub fn class(&self) -> &str {
        self.0
            .split_once('.')
            .map(|(_, rest)| rest.split('#').next().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn id(&self) -> &str {
        self.0.split_once('#').map(|(_, id)| id).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceUid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StateExtras {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patching_templates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkloadState {
    pub spec: WorkloadSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Short random tag appended to the `app.kubernetes.io/instance` label.
    /// Assigned on first registration and preserved across runs.
    pub instance_suffix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter_binary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourceState {
    /// Random uuid assigned the first time the resource is added to the
    /// project; stable forever after.
    pub guid: String,

    #[serde(rename = "type")]
    pub resource_type: String,
    pub class: String,
    pub id: String,

    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub metadata: Object,

    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub params: Object,

    pub source_workload: String,

    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub state: Object,

    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub outputs: Object,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provisioner_uri: String,

    /// Auxiliary manifests returned by the provisioner. Held in memory only
    /// between provisioning and emission, never persisted.
    #[serde(skip)]
    pub manifests: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct State {
    #[serde(default)]
    pub extras: StateExtras,

    #[serde(default)]
    pub workloads: BTreeMap<String, WorkloadState>,

    #[serde(default)]
    pub resources: BTreeMap<ResourceUid, ResourceState>,

    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub shared_state: Object,
}

impl State {
    /// Register or refresh a workload. The spec and source file are always
    /// overwritten; the instance suffix is assigned once and preserved.
    pub fn add_workload(&mut self, spec: WorkloadSpec, file: Option<PathBuf>) -> Result<String> {
        let name = spec.name()?.to_string();
        match self.workloads.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.spec = spec;
                existing.file = file;
            }
            Entry::Vacant(entry) => {
                entry.insert(WorkloadState {
                    spec,
                    file,
                    instance_suffix: generate_instance_suffix(),
                    converter_binary: None,
                });
            }
        }
        Ok(name)
    }

    /// The uid each resource name of the given workload resolves to.
    pub fn resource_uids_for_workload(
        &self,
        workload_name: &str,
    ) -> Result<BTreeMap<String, ResourceUid>> {
        let workload = self.workloads.get(workload_name).ok_or_else(|| {
            ScoreError::invariant_error(format!("workload '{workload_name}' not found in state"))
        })?;
        Ok(workload
            .spec
            .resources
            .iter()
            .map(|(res_name, decl)| {
                (
                    res_name.clone(),
                    ResourceUid::new(
                        workload_name,
                        res_name,
                        &decl.resource_type,
                        decl.class.as_deref(),
                        decl.id.as_deref(),
                    ),
                )
            })
            .collect())
    }

    /// Resource outputs visible to a workload's substitution context,
    /// keyed by the resource name used in the workload spec.
    pub fn resource_outputs_for_workload(
        &self,
        workload_name: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for (res_name, uid) in self.resource_uids_for_workload(workload_name)? {
            let res = self.resources.get(&uid).ok_or_else(|| {
                ScoreError::invariant_error(format!(
                    "resource '{uid}' of workload '{workload_name}' has no state"
                ))
            })?;
            out.insert(res_name, Value::Object(res.outputs.clone()));
        }
        Ok(out)
    }
}

fn generate_instance_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let tag: String = (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("-{tag}")
}

/// The on-disk project directory holding the state file and any
/// `*.provisioners.yaml` files.
#[derive(Debug, Clone)]
pub struct StateDirectory {
    pub path: PathBuf,
    pub state: State,
}

impl StateDirectory {
    pub fn new(path: PathBuf, state: State) -> Self {
        Self { path, state }
    }

    /// Load the state directory below the given project directory. Returns
    /// `Ok(None)` when no state file exists yet.
    pub fn load(directory: &Path) -> Result<Option<StateDirectory>> {
        let dir = directory.join(DEFAULT_RELATIVE_STATE_DIRECTORY);
        let state_file = dir.join(STATE_FILE_NAME);
        let content = match fs::read_to_string(&state_file) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ScoreError::config_error(format!(
                    "state file couldn't be read: {err}"
                )))
            }
        };
        let state: State = serde_yaml::from_str(&content).map_err(|err| {
            ScoreError::config_error(format!("state file couldn't be decoded: {err}"))
        })?;
        Ok(Some(StateDirectory { path: dir, state }))
    }

    /// Write the state file atomically via a temp file and rename.
    pub fn persist(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ScoreError::config_error("state directory path not set"));
        }
        if let Err(err) = fs::create_dir(&self.path) {
            if err.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(ScoreError::config_error(format!(
                    "failed to create directory '{}': {err}",
                    self.path.display()
                )));
            }
        }
        let content = serde_yaml::to_string(&self.state)?;
        let temp = self.path.join(format!("{STATE_FILE_NAME}.temp"));
        fs::write(&temp, content)?;
        fs::rename(&temp, self.path.join(STATE_FILE_NAME))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec(name: &str) -> WorkloadSpec {
        serde_yaml::from_str(&format!(
            r#"
apiVersion: score.dev/v1b1
metadata:
  name: {name}
containers:
  main:
    image: nginx
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_resource_uid_parts() {
        let uid = ResourceUid::new("w", "r", "thing", None, None);
        assert_eq!(uid.as_str(), "thing.default#w.r");
        assert_eq!(uid.resource_type(), "thing");
        assert_eq!(uid.class(), "default");
        assert_eq!(uid.id(), "w.r");

        let shared = ResourceUid::new("w", "r", "dns", Some("external"), Some("shared-dns"));
        assert_eq!(shared.as_str(), "dns.external#shared-dns");
        assert_eq!(shared.id(), "shared-dns");
    }

    #[test]
    fn test_add_workload_preserves_suffix() {
        let mut state = State::default();
        state.add_workload(sample_spec("app"), None).unwrap();
        let first = state.workloads["app"].instance_suffix.clone();
        assert!(first.starts_with('-') && first.len() == 7);
        state
            .add_workload(sample_spec("app"), Some(PathBuf::from("app.yaml")))
            .unwrap();
        assert_eq!(state.workloads["app"].instance_suffix, first);
        assert_eq!(
            state.workloads["app"].file,
            Some(PathBuf::from("app.yaml"))
        );
    }

    #[test]
    fn test_state_roundtrip_and_manifests_not_persisted() {
        let mut state = State::default();
        state.add_workload(sample_spec("app"), None).unwrap();
        let uid = ResourceUid::new("app", "db", "postgres", None, None);
        state.resources.insert(
            uid.clone(),
            ResourceState {
                guid: "someguid".into(),
                resource_type: "postgres".into(),
                class: "default".into(),
                id: "app.db".into(),
                source_workload: "app".into(),
                manifests: vec![serde_json::json!({"kind": "Secret"})],
                ..Default::default()
            },
        );
        let encoded = serde_yaml::to_string(&state).unwrap();
        assert!(!encoded.contains("manifests"));
        let decoded: State = serde_yaml::from_str(&encoded).unwrap();
        assert_eq!(decoded.resources[&uid].guid, "someguid");
        assert!(decoded.resources[&uid].manifests.is_empty());
    }

    #[test]
    fn test_state_decode_rejects_unknown_fields() {
        let res: std::result::Result<State, _> =
            serde_yaml::from_str("workloads: {}\nresources: {}\nbogus: true\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_state_directory_persist_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let sd = StateDirectory::new(
            tmp.path().join(DEFAULT_RELATIVE_STATE_DIRECTORY),
            State::default(),
        );
        sd.persist().unwrap();
        let loaded = StateDirectory::load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded.state, State::default());
        assert!(StateDirectory::load(&tmp.path().join("elsewhere"))
            .unwrap()
            .is_none());
    }
}
