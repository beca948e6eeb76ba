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

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::domain::score::{ContainerResources, ResourcesLimits};
use crate::shared::{Result, ScoreError};

pub fn convert_container_resources(
    resources: Option<&ContainerResources>,
) -> Result<ResourceRequirements> {
    let mut out = ResourceRequirements::default();
    if let Some(resources) = resources {
        if let Some(requests) = &resources.requests {
            out.requests =
                Some(build_resource_list(requests).map_err(|e| e.with_context("requests"))?);
        }
        if let Some(limits) = &resources.limits {
            out.limits = Some(build_resource_list(limits).map_err(|e| e.with_context("limits"))?);
        }
    }
    Ok(out)
}

fn build_resource_list(input: &ResourcesLimits) -> Result<BTreeMap<String, Quantity>> {
    let mut output = BTreeMap::new();
    if let Some(cpu) = &input.cpu {
        output.insert(
            "cpu".to_string(),
            parse_quantity(cpu).map_err(|e| e.with_context("cpu"))?,
        );
    }
    if let Some(memory) = &input.memory {
        output.insert(
            "memory".to_string(),
            parse_quantity(memory).map_err(|e| e.with_context("memory"))?,
        );
    }
    Ok(output)
}

/// Validate a Kubernetes quantity string: a decimal number followed by an
/// optional binary (Ki..Ei), decimal (n..E) or scientific (e<exp>) suffix.
/// `Quantity` itself is an unvalidated string wrapper, so the grammar is
/// checked here before the value is carried into a manifest.
pub fn parse_quantity(input: &str) -> Result<Quantity> {
    let err = || {
        ScoreError::validation_error(format!("failed to parse quantity '{input}'"))
    };
    let mut s = input;
    s = s.strip_prefix(['+', '-']).unwrap_or(s);
    let number_len = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_len);
    if number.is_empty()
        || number.chars().filter(|c| *c == '.').count() > 1
        || !number.chars().any(|c| c.is_ascii_digit())
    {
        return Err(err());
    }
    match suffix {
        "" | "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" | "n" | "u" | "m" | "k" | "M" | "G"
        | "T" | "P" | "E" => {}
        _ => {
            let exp = suffix
                .strip_prefix(['e', 'E'])
                .ok_or_else(err)?;
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            if exp.is_empty() || !exp.chars().all(|c| c.is_ascii_digit()) {
                return Err(err());
            }
        }
    }
    Ok(Quantity(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity_accepts_common_forms() {
        for q in ["999m", "10Mi", "1", "0.5", "100Gi", "2e3", "1E-2", "-1", "250u"] {
            assert!(parse_quantity(q).is_ok(), "expected '{q}' to parse");
        }
    }

    #[test]
    fn test_parse_quantity_rejects_garbage() {
        for q in ["", "Mi", "10Zi", "1.2.3", "ten", "10 Mi", "1e", "e3"] {
            assert!(parse_quantity(q).is_err(), "expected '{q}' to fail");
        }
    }

    #[test]
    fn test_convert_container_resources() {
        let resources: ContainerResources = serde_yaml::from_str(
            r#"
requests:
  cpu: 999m
limits:
  memory: 10Mi
"#,
        )
        .unwrap();
        let out = convert_container_resources(Some(&resources)).unwrap();
        assert_eq!(out.requests.unwrap()["cpu"], Quantity("999m".into()));
        assert_eq!(out.limits.unwrap()["memory"], Quantity("10Mi".into()));
    }

    #[test]
    fn test_convert_container_resources_bad_quantity() {
        let resources: ContainerResources = serde_yaml::from_str(
            r#"
requests:
  cpu: lots
"#,
        )
        .unwrap();
        let err = convert_container_resources(Some(&resources)).unwrap_err();
        assert!(err.to_string().contains("requests: cpu"));
    }
}
