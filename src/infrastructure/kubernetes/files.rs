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

//! Container file conversion.
//!
//! Each file entry becomes a volume mounted into the directory containing
//! the target path. Content that resolves to exactly one secret reference
//! is mounted straight from the Secret; anything else is stored in a
//! generated ConfigMap under the key `file`.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, KeyToPath, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use sha2::{Digest, Sha256};

use crate::domain::score::ContainerFile;
use crate::domain::secrets::decode_secret_references;
use crate::domain::substitution::substitute_string;
use crate::shared::{Result, ScoreError};

/// A stable volume name per target path: `file-` plus a truncated hash of
/// the target.
fn file_mount_name(target: &str) -> String {
    let digest = Sha256::digest(target.as_bytes());
    format!(
        "file-{}",
        digest[..5]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    )
}

fn dir_of(target: &str) -> String {
    match Path::new(target).parent().map(|p| p.to_string_lossy()) {
        Some(parent) if !parent.is_empty() => parent.into_owned(),
        Some(_) => ".".to_string(),
        None => "/".to_string(),
    }
}

fn base_of(target: &str) -> Result<String> {
    Path::new(target)
        .file_name()
        .map(|p| p.to_string_lossy().into_owned())
        .ok_or_else(|| ScoreError::validation_error("target has no file name"))
}

pub fn convert_container_file(
    target: &str,
    file: &ContainerFile,
    manifest_prefix: &str,
    score_file_dir: Option<&Path>,
    resolver: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<(VolumeMount, Option<ConfigMap>, Option<Volume>)> {
    let mount = VolumeMount {
        name: file_mount_name(target),
        mount_path: dir_of(target),
        ..Default::default()
    };

    let mount_mode = match &file.mode {
        Some(mode) => Some(i32::from_str_radix(mode, 8).map_err(|err| {
            ScoreError::validation_error(format!("mode: failed to parse '{mode}': {err}"))
        })?),
        None => None,
    };

    let mut content: Vec<u8> = if let Some(content) = &file.content {
        content.clone().into_bytes()
    } else if let Some(binary) = &file.binary_content {
        STANDARD.decode(binary).map_err(|err| {
            ScoreError::validation_error(format!("binaryContent: failed to decode base64: {err}"))
        })?
    } else if let Some(source) = &file.source {
        let mut source_path = Path::new(source).to_path_buf();
        if source_path.is_relative() {
            if let Some(dir) = score_file_dir {
                source_path = dir.join(source_path);
            }
        }
        fs::read(&source_path).map_err(|err| {
            ScoreError::validation_error(format!(
                "source: failed to read file '{}': {err}",
                source_path.display()
            ))
        })?
    } else {
        return Err(ScoreError::validation_error("missing 'content' or 'source'"));
    };

    if !file.no_expand.unwrap_or(false) && file.binary_content.is_none() {
        let text = String::from_utf8(content).map_err(|_| {
            ScoreError::validation_error(
                "source content contains non-utf8 bytes; set noExpand=true or use binaryContent",
            )
        })?;
        let resolved = substitute_string(&text, resolver)
            .map_err(|e| e.with_context("failed to substitute in content"))?;

        let (parts, refs) = decode_secret_references(&resolved)
            .map_err(|e| e.with_context("content: failed to resolve secret"))?;
        if !refs.is_empty() {
            // A file made up of exactly one secret reference mounts the
            // secret key directly.
            if refs.len() == 1 && parts[0].is_empty() && parts[1].is_empty() {
                let volume = Volume {
                    name: mount.name.clone(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(refs[0].name.clone()),
                        items: Some(vec![KeyToPath {
                            key: refs[0].key.clone(),
                            path: base_of(target)?,
                            mode: mount_mode,
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                return Ok((mount, None, Some(volume)));
            }
            return Err(ScoreError::validation_error(
                "content: contained a mix of secret references and raw content",
            ));
        }

        content = resolved.into_bytes();
    }

    let config_map_name = format!("{manifest_prefix}{}", mount.name);
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name.clone()),
            ..Default::default()
        },
        binary_data: Some([("file".to_string(), ByteString(content))].into()),
        ..Default::default()
    };
    let volume = Volume {
        name: mount.name.clone(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map_name),
            items: Some(vec![KeyToPath {
                key: "file".to_string(),
                path: base_of(target)?,
                mode: mount_mode,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok((mount, Some(config_map), Some(volume)))
}
