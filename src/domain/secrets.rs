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

//! In-band encoding of Kubernetes secret references.
//!
//! Provisioner outputs may point at a key within a Secret rather than a
//! plaintext value. Such references are encoded as sentinel-framed strings
//! so they survive placeholder substitution and YAML round-trips, and are
//! decoded back into native `secretKeyRef` structures by the converter.

use serde_json::Value;

const MAGIC_PREFIX: &str = "🔐💬";
const MAGIC_SUFFIX: &str = "💬🔐";

use crate::shared::{Result, ScoreError};

/// Encode a reference to a specific key within a named secret. An encoded
/// value looks like `🔐💬my-secret_some-key💬🔐`. Secret names and keys
/// follow the Kubernetes naming restrictions; neither half may contain `_`
/// other than the separator itself.
pub fn encode_secret_reference(secret: &str, key: &str) -> String {
    format!("{MAGIC_PREFIX}{secret}_{key}{MAGIC_SUFFIX}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

/// Split a string that may contain encoded secret references into the
/// interleaved text segments and the references between them. Interleaving
/// segments and references reconstructs the input: the result always holds
/// one more segment than references.
pub fn decode_secret_references(source: &str) -> Result<(Vec<String>, Vec<SecretRef>)> {
    let mut pieces = source.split(MAGIC_PREFIX);
    let mut segments = vec![pieces.next().unwrap_or_default().to_string()];
    let mut refs = Vec::new();
    for piece in pieces {
        match piece.find(MAGIC_SUFFIX) {
            Some(si) => {
                let raw = &piece[..si];
                let (name, key) = raw.split_once('_').ok_or_else(|| {
                    ScoreError::validation_error("invalid secret ref: doesn't contain _")
                })?;
                refs.push(SecretRef {
                    name: name.to_string(),
                    key: key.to_string(),
                });
                segments.push(piece[si + MAGIC_SUFFIX.len()..].to_string());
            }
            // An opening sentinel without a closing one stays as text.
            None => segments.push(piece.to_string()),
        }
    }
    Ok((segments, refs))
}

/// Recursively scan a manifest tree for any string that still contains an
/// encoded secret reference, returning the dotted path of the first hit.
/// Such references escaping to the output are always a bug in the pipeline
/// or the provisioner templates, never acceptable output.
pub fn find_first_unresolved_secret_ref(path: &str, value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let pp = s.find(MAGIC_PREFIX)?;
            let sp = s.find(MAGIC_SUFFIX)?;
            (sp > pp).then(|| path.to_string())
        }
        Value::Object(map) => map
            .iter()
            .find_map(|(k, v)| find_first_unresolved_secret_ref(&format!("{path}.{k}"), v)),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_first_unresolved_secret_ref(&format!("{path}.{i}"), v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_nominal() {
        let source = format!(
            "{}thing{}{}",
            encode_secret_reference("s1", "k1"),
            encode_secret_reference("s2", "k2"),
            encode_secret_reference("a.val1d-dns.subdomain", "a-val1d.k_y"),
        );
        let (segments, refs) = decode_secret_references(&source).unwrap();
        assert_eq!(segments, vec!["", "thing", "", ""]);
        assert_eq!(
            refs,
            vec![
                SecretRef {
                    name: "s1".into(),
                    key: "k1".into()
                },
                SecretRef {
                    name: "s2".into(),
                    key: "k2".into()
                },
                SecretRef {
                    name: "a.val1d-dns.subdomain".into(),
                    key: "a-val1d.k_y".into()
                },
            ]
        );
    }

    #[test]
    fn test_decode_single_ref_law() {
        let (segments, refs) =
            decode_secret_references(&encode_secret_reference("db-creds", "password")).unwrap();
        assert_eq!(segments, vec!["", ""]);
        assert_eq!(
            refs,
            vec![SecretRef {
                name: "db-creds".into(),
                key: "password".into()
            }]
        );
    }

    #[test]
    fn test_decode_no_refs() {
        let (segments, refs) = decode_secret_references("plain text").unwrap();
        assert_eq!(segments, vec!["plain text"]);
        assert!(refs.is_empty());
    }

    #[test]
    fn test_decode_missing_separator() {
        let source = format!("{MAGIC_PREFIX}no-separator{MAGIC_SUFFIX}");
        assert!(decode_secret_references(&source).is_err());
    }

    #[test]
    fn test_find_unresolved_in_tree() {
        let manifest = json!({
            "kind": "ConfigMap",
            "data": {
                "config": ["ok", encode_secret_reference("s", "k")],
            },
        });
        assert_eq!(
            find_first_unresolved_secret_ref("", &manifest),
            Some(".data.config.1".to_string())
        );
        let clean = json!({"kind": "ConfigMap", "data": {"config": "ok"}});
        assert_eq!(find_first_unresolved_secret_ref("", &clean), None);
    }
}
