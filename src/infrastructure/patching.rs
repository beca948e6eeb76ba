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

//! Post-processing patches over the assembled manifest list.
//!
//! Each patch template renders against `{ Manifests, Workloads }` and must
//! produce a YAML list of set/delete operations addressed by dot-separated
//! paths. A leading integer segment indexes the manifest list itself.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::state::State;
use crate::infrastructure::template as template_env;
use crate::shared::{Result, ScoreError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchOperation {
    pub op: PatchOp,
    /// Dot-separated path; bare integers like `-1` or `3` are accepted as
    /// written even though YAML parses them as numbers.
    #[serde(deserialize_with = "path_from_scalar")]
    pub path: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

fn path_from_scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct ScalarVisitor;

    impl serde::de::Visitor<'_> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a path string or integer index")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Set,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Index(usize),
    Append,
    Key(String),
}

/// Split a dot-separated path into segments. A backslash escapes the next
/// character, all-digit segments index into arrays, `-1` appends to the
/// preceding array, and a `:` prefix forces map-key interpretation.
fn parse_path(path: &str) -> Result<Vec<Segment>> {
    if path.is_empty() {
        return Err(ScoreError::validation_error("patch path is empty"));
    }
    let mut raw_segments: Vec<String> = vec![String::new()];
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    raw_segments.last_mut().unwrap().push(escaped);
                }
            }
            '.' => raw_segments.push(String::new()),
            _ => raw_segments.last_mut().unwrap().push(c),
        }
    }
    Ok(raw_segments
        .into_iter()
        .map(|raw| {
            if let Some(rest) = raw.strip_prefix(':') {
                Segment::Key(rest.to_string())
            } else if raw == "-1" {
                Segment::Append
            } else if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
                Segment::Index(raw.parse().unwrap_or(usize::MAX))
            } else {
                Segment::Key(raw)
            }
        })
        .collect())
}

fn empty_container(next: &Segment) -> Value {
    match next {
        Segment::Key(_) => json!({}),
        _ => json!([]),
    }
}

fn segment_as_key(segment: &Segment) -> String {
    match segment {
        Segment::Key(k) => k.clone(),
        Segment::Index(i) => i.to_string(),
        Segment::Append => "-1".to_string(),
    }
}

fn set_path(node: &mut Value, segments: &[Segment], value: Value, path: &str) -> Result<()> {
    let (segment, rest) = segments.split_first().expect("segments are never empty");
    match node {
        Value::Object(map) => {
            let key = segment_as_key(segment);
            if rest.is_empty() {
                map.insert(key, value);
                return Ok(());
            }
            let child = map.entry(key).or_insert(Value::Null);
            if child.is_null() {
                *child = empty_container(&rest[0]);
            }
            set_path(child, rest, value, path)
        }
        Value::Array(items) => {
            let index = match segment {
                Segment::Index(i) => {
                    if *i > items.len() {
                        return Err(ScoreError::validation_error(format!(
                            "path '{path}': index {i} is out of range"
                        )));
                    }
                    if *i == items.len() {
                        items.push(Value::Null);
                    }
                    *i
                }
                Segment::Append => {
                    items.push(Value::Null);
                    items.len() - 1
                }
                Segment::Key(k) => {
                    return Err(ScoreError::validation_error(format!(
                        "path '{path}': cannot index a list with '{k}'"
                    )));
                }
            };
            if rest.is_empty() {
                items[index] = value;
                return Ok(());
            }
            if items[index].is_null() {
                items[index] = empty_container(&rest[0]);
            }
            set_path(&mut items[index], rest, value, path)
        }
        other => Err(ScoreError::validation_error(format!(
            "path '{path}': cannot traverse a {} value",
            value_kind(other)
        ))),
    }
}

/// Delete the addressed entry. Missing targets are a no-op; removing a list
/// element renumbers the elements after it.
fn delete_path(node: &mut Value, segments: &[Segment]) -> Result<()> {
    let (segment, rest) = segments.split_first().expect("segments are never empty");
    match node {
        Value::Object(map) => {
            let key = segment_as_key(segment);
            if rest.is_empty() {
                map.remove(&key);
                return Ok(());
            }
            match map.get_mut(&key) {
                Some(child) => delete_path(child, rest),
                None => Ok(()),
            }
        }
        Value::Array(items) => match segment {
            Segment::Index(i) if *i < items.len() => {
                if rest.is_empty() {
                    items.remove(*i);
                    return Ok(());
                }
                delete_path(&mut items[*i], rest)
            }
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Compile a patch template to surface syntax errors before it is stored.
pub fn validate_patch_template(template: &str) -> Result<()> {
    template_env::validate_syntax(template)
}

/// Set or delete (when `value` is `None`) a single dotted path on a dynamic
/// value. This powers `--override-property` and the legacy
/// `--patch-manifests` flag with the same path grammar as patch templates.
pub fn override_path(target: &mut Value, path: &str, value: Option<Value>) -> Result<()> {
    let segments = parse_path(path)?;
    match value {
        Some(value) => set_path(target, &segments, value, path),
        None => delete_path(target, &segments),
    }
}

/// Render one patch template against the manifest list and apply the
/// operations it produces, in order.
pub fn patch_manifests(
    state: &State,
    manifests: Vec<Value>,
    template: &str,
    source: &str,
) -> Result<Vec<Value>> {
    let workloads: BTreeMap<String, Value> = state
        .workloads
        .iter()
        .map(|(name, workload)| {
            Ok((name.clone(), serde_json::to_value(&workload.spec)?))
        })
        .collect::<Result<_>>()?;

    let env = template_env::build_environment();
    let rendered = template_env::render(
        &env,
        template,
        json!({"Manifests": manifests, "Workloads": workloads}),
    )
    .map_err(|e| e.with_context(format!("patch template {source}: failed to render")))?;

    let mut root = Value::Array(manifests);
    if !rendered.trim().is_empty() {
        let operations: Vec<PatchOperation> = serde_yaml::from_str(&rendered).map_err(|err| {
            ScoreError::template_error(format!(
                "patch template {source}: failed to decode patch operations: {err}"
            ))
        })?;
        for operation in operations {
            apply_operation(&mut root, &operation)
                .map_err(|e| e.with_context(format!("patch template {source}")))?;
        }
    }

    match root {
        Value::Array(manifests) => Ok(manifests),
        _ => unreachable!("the manifest root stays a list"),
    }
}

fn apply_operation(root: &mut Value, operation: &PatchOperation) -> Result<()> {
    let segments = parse_path(&operation.path)?;
    match operation.op {
        PatchOp::Set => {
            let value = operation.value.clone().ok_or_else(|| {
                ScoreError::validation_error(format!(
                    "path '{}': set requires a value",
                    operation.path
                ))
            })?;
            set_path(root, &segments, value, &operation.path)
        }
        PatchOp::Delete => delete_path(root, &segments),
    }
}
