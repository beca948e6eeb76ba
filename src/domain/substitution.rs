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

//! `${…}` placeholder resolution.
//!
//! Placeholders are resolved against a context function that maps dotted
//! reference paths to string values. A doubled `$$` escapes to a literal
//! `$`; an unresolvable reference fails the whole operation.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::shared::{Object, Result, ScoreError};

/// Substitute every `${…}` occurrence in the input string through the given
/// resolver. `$$` produces a literal `$`.
pub fn substitute_string(
    input: &str,
    resolver: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '$')) => {
                out.push('$');
                chars.next();
            }
            Some((_, '{')) => {
                chars.next();
                let start = i + 2;
                let rest = &input[start..];
                let end = rest.find('}').ok_or_else(|| {
                    ScoreError::validation_error(format!(
                        "unterminated placeholder starting at offset {i}"
                    ))
                })?;
                out.push_str(&resolver(&rest[..end])?);
                while let Some((j, _)) = chars.peek() {
                    if *j > start + end {
                        break;
                    }
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }
    Ok(out)
}

/// Walk a dynamic tree and substitute placeholders inside every string
/// value, returning a new tree. The input is not mutated.
pub fn substitute(value: &Value, resolver: &mut dyn FnMut(&str) -> Result<String>) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, resolver)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(substitute(item, resolver)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Object::new();
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, resolver)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Collect the reference paths used in a dynamic tree without resolving
/// them. Used to compute resource dependency edges.
pub fn collect_refs(value: &Value) -> Vec<String> {
    let mut refs = Vec::new();
    let _ = substitute(value, &mut |path: &str| {
        refs.push(path.to_string());
        Ok(String::new())
    });
    refs
}

pub fn split_ref_parts(reference: &str) -> Vec<&str> {
    reference.split('.').collect()
}

/// Build the resolver closure for a workload context: `metadata.*` digs into
/// the workload metadata, `resources.<name>.<key…>` digs into the outputs of
/// the named resource.
pub fn build_substitution_function<'a>(
    metadata: &'a Object,
    resources: &'a BTreeMap<String, Value>,
) -> impl FnMut(&str) -> Result<String> + 'a {
    move |reference: &str| {
        let parts = split_ref_parts(reference);
        match parts.first() {
            Some(&"metadata") if parts.len() >= 2 => {
                let v = dig(&Value::Object(metadata.clone()), &parts[1..]).ok_or_else(|| {
                    ScoreError::validation_error(format!(
                        "invalid ref '{reference}': no such key in metadata"
                    ))
                })?;
                value_to_string(&v, reference)
            }
            Some(&"resources") if parts.len() >= 3 => {
                let name = parts[1];
                let outputs = resources.get(name).ok_or_else(|| {
                    ScoreError::validation_error(format!(
                        "invalid ref '{reference}': no resource named '{name}'"
                    ))
                })?;
                let v = dig(outputs, &parts[2..]).ok_or_else(|| {
                    ScoreError::validation_error(format!(
                        "invalid ref '{reference}': no such output on resource '{name}'"
                    ))
                })?;
                value_to_string(&v, reference)
            }
            _ => Err(ScoreError::validation_error(format!(
                "invalid ref '{reference}': unknown reference root"
            ))),
        }
    }
}

fn dig(value: &Value, keys: &[&str]) -> Option<Value> {
    let mut current = value;
    for key in keys {
        current = current.as_object()?.get(*key)?;
    }
    Some(current.clone())
}

fn value_to_string(value: &Value, reference: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(ScoreError::validation_error(format!(
            "invalid ref '{reference}': resolved to null"
        ))),
        // Complex values are carried as their JSON encoding.
        other => Ok(serde_json::to_string(other)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> (Object, BTreeMap<String, Value>) {
        let metadata = json!({
            "name": "example",
            "annotations": {"team": "platform"},
        });
        let mut resources = BTreeMap::new();
        resources.insert(
            "db".to_string(),
            json!({"host": "db.local", "port": 5432, "conn": {"max": 10}}),
        );
        let Value::Object(metadata) = metadata else {
            unreachable!()
        };
        (metadata, resources)
    }

    #[test]
    fn test_substitute_metadata_and_resources() {
        let (metadata, resources) = test_context();
        let mut f = build_substitution_function(&metadata, &resources);
        assert_eq!(
            substitute_string("${metadata.name}:${resources.db.host}:${resources.db.port}", &mut f)
                .unwrap(),
            "example:db.local:5432"
        );
        assert_eq!(
            substitute_string("${metadata.annotations.team}", &mut f).unwrap(),
            "platform"
        );
        assert_eq!(
            substitute_string("${resources.db.conn.max}", &mut f).unwrap(),
            "10"
        );
    }

    #[test]
    fn test_escape_double_dollar() {
        let (metadata, resources) = test_context();
        let mut f = build_substitution_function(&metadata, &resources);
        assert_eq!(
            substitute_string("cost: $$5 and $${metadata.name}", &mut f).unwrap(),
            "cost: $5 and ${metadata.name}"
        );
        assert_eq!(substitute_string("plain $VAR", &mut f).unwrap(), "plain $VAR");
    }

    #[test]
    fn test_unresolved_reference_fails() {
        let (metadata, resources) = test_context();
        let mut f = build_substitution_function(&metadata, &resources);
        assert!(substitute_string("${resources.missing.host}", &mut f).is_err());
        assert!(substitute_string("${metadata.missing}", &mut f).is_err());
        assert!(substitute_string("${unknown.root}", &mut f).is_err());
    }

    #[test]
    fn test_unterminated_placeholder_fails() {
        let (metadata, resources) = test_context();
        let mut f = build_substitution_function(&metadata, &resources);
        assert!(substitute_string("${metadata.name", &mut f).is_err());
    }

    #[test]
    fn test_substitute_tree_is_pure() {
        let (metadata, resources) = test_context();
        let mut f = build_substitution_function(&metadata, &resources);
        let input = json!({"a": ["${metadata.name}", 7], "b": {"c": "${resources.db.host}"}});
        let out = substitute(&input, &mut f).unwrap();
        assert_eq!(out, json!({"a": ["example", 7], "b": {"c": "db.local"}}));
        // original untouched
        assert_eq!(input["a"][0], "${metadata.name}");
    }

    #[test]
    fn test_collect_refs() {
        let input = json!({"x": "${resources.db.host}", "y": "${metadata.name} ${resources.dns.host}"});
        let refs = collect_refs(&input);
        assert!(refs.contains(&"resources.db.host".to_string()));
        assert!(refs.contains(&"resources.dns.host".to_string()));
        assert!(refs.contains(&"metadata.name".to_string()));
    }
}
