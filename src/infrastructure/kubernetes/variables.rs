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

//! Container variable conversion.
//!
//! Variable values are substituted, then decoded for secret references. A
//! value that is exactly one secret reference becomes a `secretKeyRef`;
//! values that mix references with other content are rebuilt from synthetic
//! `__ref_*` env vars using `$(…)` expansion.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};

use crate::domain::secrets::decode_secret_references;
use crate::domain::substitution::substitute_string;
use crate::shared::{Result, ScoreError};

const SYNTHETIC_PREFIX: &str = "__ref_";

const FNV128_OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV128_PRIME: u128 = 0x1000000000000000000013b;

fn fnv128(parts: &[&[u8]]) -> u128 {
    let mut hash = FNV128_OFFSET_BASIS;
    for part in parts {
        for byte in *part {
            hash = hash.wrapping_mul(FNV128_PRIME);
            hash ^= *byte as u128;
        }
    }
    hash
}

/// A stable env var name for a secret reference. The hash keeps the name
/// deterministic per (secret, key) pair; `_` and `-` from the URL-safe
/// base64 alphabet are remapped so the result is a valid env var name.
fn generate_secret_ref_env_var_name(secret_name: &str, key: &str) -> String {
    let digest = fnv128(&[secret_name.as_bytes(), key.as_bytes()]).to_be_bytes();
    let encoded = URL_SAFE_NO_PAD
        .encode(digest)
        .replace(['_', '-'], "0");
    format!("{SYNTHETIC_PREFIX}{encoded}")
}

fn secret_key_ref(name: &str, key: &str) -> EnvVarSource {
    EnvVarSource {
        secret_key_ref: Some(SecretKeySelector {
            name: Some(name.to_string()),
            key: key.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn convert_container_variable(
    key: &str,
    value: &str,
    resolver: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<Vec<EnvVar>> {
    let resolved = substitute_string(value, resolver)
        .map_err(|e| e.with_context("failed to substitute placeholders"))?;

    let (parts, refs) = decode_secret_references(&resolved)
        .map_err(|e| e.with_context("failed to resolve secret references"))?;

    if refs.is_empty() {
        return Ok(vec![EnvVar {
            name: key.to_string(),
            value: (!resolved.is_empty()).then_some(resolved),
            ..Default::default()
        }]);
    }

    // One secret reference taking up the whole value.
    if refs.len() == 1 && parts[0].is_empty() && parts[1].is_empty() {
        return Ok(vec![EnvVar {
            name: key.to_string(),
            value_from: Some(secret_key_ref(&refs[0].name, &refs[0].key)),
            ..Default::default()
        }]);
    }

    // One or more secret references mixed with other content: bind each
    // reference to a synthetic env var and rebuild the user value from
    // `$(…)` expansions.
    let mut out = Vec::with_capacity(1 + refs.len());
    for reference in &refs {
        out.push(EnvVar {
            name: generate_secret_ref_env_var_name(&reference.name, &reference.key),
            value_from: Some(secret_key_ref(&reference.name, &reference.key)),
            ..Default::default()
        });
    }

    let mut rebuilt = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            let reference = &refs[i - 1];
            rebuilt.push_str(&format!(
                "$({})",
                generate_secret_ref_env_var_name(&reference.name, &reference.key)
            ));
        }
        rebuilt.push_str(part);
    }
    out.push(EnvVar {
        name: key.to_string(),
        value: Some(rebuilt),
        ..Default::default()
    });

    Ok(out)
}

pub fn convert_container_variables(
    variables: &BTreeMap<String, String>,
    resolver: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<Vec<EnvVar>> {
    let mut out: Vec<EnvVar> = Vec::with_capacity(variables.len());
    for (key, value) in variables {
        let adds = convert_container_variable(key, value, resolver)
            .map_err(|e| e.with_context(format!("'{key}': failed to convert")))?;
        for add in adds {
            if !out.iter().any(|existing| existing.name == add.name) {
                out.push(add);
            }
        }
    }
    // Synthetic reference vars must be defined before any var that expands
    // them, so they group first; each group is sorted by name.
    out.sort_by(|a, b| {
        let rank = |v: &EnvVar| !v.name.starts_with(SYNTHETIC_PREFIX);
        rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
    });
    Ok(out)
}
