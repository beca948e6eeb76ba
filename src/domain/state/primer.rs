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

//! Resource priming and dependency ordering.
//!
//! Priming walks every workload's declared resources, ensures each has a
//! `ResourceState` with a stable guid, and deduplicates resources shared
//! between workloads via an explicit `id`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use uuid::Uuid;

use crate::domain::substitution::{collect_refs, split_ref_parts};
use crate::shared::{Result, ScoreError};

use super::{ResourceState, ResourceUid, State};

impl State {
    /// Ensure every declared resource has a `ResourceState`. Guids and any
    /// previously provisioned state are preserved; metadata, params, and the
    /// source workload are refreshed from the current declarations.
    /// Resources no longer referenced by any workload stay in the state
    /// until removed by hand.
    pub fn prime_resources(&mut self) -> Result<()> {
        // Tracks which workload supplied params for each resource this run,
        // and which uid each explicit shared id resolved to.
        let mut params_from: BTreeMap<ResourceUid, Option<String>> = BTreeMap::new();
        let mut shared_ids: BTreeMap<String, ResourceUid> = BTreeMap::new();

        let workloads: Vec<String> = self.workloads.keys().cloned().collect();
        for workload_name in workloads {
            let declarations: Vec<_> = self.workloads[&workload_name]
                .spec
                .resources
                .iter()
                .map(|(name, decl)| (name.clone(), decl.clone()))
                .collect();

            for (res_name, decl) in declarations {
                let uid = ResourceUid::new(
                    &workload_name,
                    &res_name,
                    &decl.resource_type,
                    decl.class.as_deref(),
                    decl.id.as_deref(),
                );

                if let Some(id) = &decl.id {
                    match shared_ids.get(id) {
                        Some(existing) if existing != &uid => {
                            return Err(ScoreError::invariant_error(format!(
                                "resource '{uid}' conflicts with '{existing}': shared resource \
                                 '{id}' is declared with a different type or class"
                            )));
                        }
                        _ => {
                            shared_ids.insert(id.clone(), uid.clone());
                        }
                    }
                }

                if !params_from.contains_key(&uid) {
                    // First sighting this run. Carry over the sticky parts
                    // of any prior state for this uid.
                    let prior = self.resources.get(&uid);
                    let primed = ResourceState {
                        guid: prior
                            .map(|r| r.guid.clone())
                            .unwrap_or_else(|| Uuid::new_v4().to_string()),
                        resource_type: uid.resource_type().to_string(),
                        class: uid.class().to_string(),
                        id: uid.id().to_string(),
                        metadata: decl.metadata.clone().unwrap_or_default(),
                        params: decl.params.clone().unwrap_or_default(),
                        source_workload: workload_name.clone(),
                        state: prior.map(|r| r.state.clone()).unwrap_or_default(),
                        outputs: prior.map(|r| r.outputs.clone()).unwrap_or_default(),
                        provisioner_uri: prior
                            .map(|r| r.provisioner_uri.clone())
                            .unwrap_or_default(),
                        manifests: Vec::new(),
                    };
                    self.resources.insert(uid.clone(), primed);
                    params_from.insert(
                        uid,
                        decl.params.is_some().then(|| workload_name.clone()),
                    );
                    continue;
                }

                if let Some(params) = &decl.params {
                    let provider = params_from.get_mut(&uid).expect("checked above");
                    if let Some(other) = provider {
                        if other != &workload_name {
                            return Err(ScoreError::invariant_error(format!(
                                "resource '{uid}': params are declared by multiple workloads \
                                 ('{other}' and '{workload_name}')"
                            )));
                        }
                    }
                    let entry = self.resources.get_mut(&uid).expect("primed above");
                    entry.params = params.clone();
                    entry.source_workload = workload_name.clone();
                    *provider = Some(workload_name.clone());
                }
                if let Some(metadata) = &decl.metadata {
                    let entry = self.resources.get_mut(&uid).expect("primed above");
                    if entry.metadata.is_empty() {
                        entry.metadata = metadata.clone();
                    }
                }
            }
        }
        Ok(())
    }

    /// A stable total order over all resources such that any resource whose
    /// params reference another resource's outputs is provisioned after it.
    /// Ties break lexicographically by uid; cycles are fatal.
    pub fn sorted_resource_uids(&self) -> Result<Vec<ResourceUid>> {
        let mut dependencies: BTreeMap<ResourceUid, BTreeSet<ResourceUid>> = BTreeMap::new();
        for (uid, res) in &self.resources {
            let mut deps = BTreeSet::new();
            if !res.params.is_empty() && self.workloads.contains_key(&res.source_workload) {
                let name_to_uid = self.resource_uids_for_workload(&res.source_workload)?;
                for reference in collect_refs(&Value::Object(res.params.clone())) {
                    let parts = split_ref_parts(&reference);
                    if parts.first() == Some(&"resources") && parts.len() >= 2 {
                        if let Some(dep) = name_to_uid.get(parts[1]) {
                            if dep != uid {
                                deps.insert(dep.clone());
                            }
                        }
                    }
                }
            }
            dependencies.insert(uid.clone(), deps);
        }

        let mut dependents: BTreeMap<ResourceUid, Vec<ResourceUid>> = BTreeMap::new();
        let mut pending: BTreeMap<ResourceUid, usize> = BTreeMap::new();
        for (uid, deps) in &dependencies {
            pending.insert(uid.clone(), deps.len());
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(uid.clone());
            }
        }

        let mut ready: BTreeSet<ResourceUid> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(uid, _)| uid.clone())
            .collect();
        let mut order = Vec::with_capacity(pending.len());
        while let Some(uid) = ready.iter().next().cloned() {
            ready.remove(&uid);
            if let Some(next) = dependents.get(&uid) {
                for dependent in next {
                    let count = pending.get_mut(dependent).unwrap();
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.clone());
                    }
                }
            }
            order.push(uid);
        }

        if order.len() != dependencies.len() {
            let stuck: Vec<String> = pending
                .iter()
                .filter(|(uid, count)| **count > 0 && !order.contains(uid))
                .map(|(uid, _)| format!("'{uid}'"))
                .collect();
            return Err(ScoreError::invariant_error(format!(
                "cyclic dependency between resources: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}
