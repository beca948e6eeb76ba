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

//! Loading of `*.provisioners.yaml` files from the state directory.
//!
//! Files load in lexicographic filename order and each holds a YAML list of
//! provisioner records; the record's uri scheme selects the implementation.
//! The first provisioner in the combined list that matches a resource wins.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::shared::{Result, ScoreError};

use super::command::{CmdProvisioner, CMD_URI_SCHEME};
use super::template::TemplateProvisioner;
use super::Provisioner;

pub const PROVISIONERS_FILE_SUFFIX: &str = ".provisioners.yaml";
pub const TEMPLATE_URI_SCHEME: &str = "template://";

/// Parse a provisioner file's contents.
pub fn load_provisioners(content: &str) -> Result<Vec<Box<dyn Provisioner>>> {
    let entries: Vec<Value> = serde_yaml::from_str(content)
        .map_err(|err| ScoreError::config_error(format!("expected a list of provisioners: {err}")))?;
    let mut out: Vec<Box<dyn Provisioner>> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let uri = entry
            .get("uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let provisioner: Box<dyn Provisioner> = if uri.starts_with(TEMPLATE_URI_SCHEME) {
            Box::new(
                TemplateProvisioner::parse(entry)
                    .map_err(|e| e.with_context(format!("provisioners.{i}")))?,
            )
        } else if uri.starts_with(CMD_URI_SCHEME) {
            Box::new(
                CmdProvisioner::parse(entry)
                    .map_err(|e| e.with_context(format!("provisioners.{i}")))?,
            )
        } else {
            return Err(ScoreError::config_error(format!(
                "provisioners.{i}: unsupported provisioner uri '{uri}'"
            )));
        };
        out.push(provisioner);
    }
    Ok(out)
}

/// Load every provisioner file from the state directory, in lexicographic
/// filename order. Duplicate uris across files are rejected.
pub fn load_provisioners_from_directory(dir: &Path) -> Result<Vec<Box<dyn Provisioner>>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|err| {
            ScoreError::config_error(format!(
                "failed to read directory '{}': {err}",
                dir.display()
            ))
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(PROVISIONERS_FILE_SUFFIX))
        })
        .collect();
    files.sort();

    let mut out: Vec<Box<dyn Provisioner>> = Vec::new();
    for file in files {
        let content = fs::read_to_string(&file)?;
        let provisioners = load_provisioners(&content)
            .map_err(|e| e.with_context(format!("failed to load '{}'", file.display())))?;
        for provisioner in provisioners {
            if out.iter().any(|p| p.uri() == provisioner.uri()) {
                return Err(ScoreError::config_error(format!(
                    "failed to load '{}': provisioner uri '{}' is declared twice",
                    file.display(),
                    provisioner.uri()
                )));
            }
            out.push(provisioner);
        }
    }
    Ok(out)
}

/// Install a provisioner file into the state directory under a name derived
/// from its source so it sorts ahead of the `zz-default` set.
pub fn save_provisioner_to_directory(dir: &Path, source: &str, content: &[u8]) -> Result<()> {
    let text = String::from_utf8(content.to_vec()).map_err(|_| {
        ScoreError::config_error(format!("provisioner file '{source}' is not valid utf-8"))
    })?;
    load_provisioners(&text).map_err(|e| e.with_context(format!("failed to parse '{source}'")))?;

    let slug: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string();
    let file = dir.join(format!("10-{slug}{PROVISIONERS_FILE_SUFFIX}"));
    fs::write(&file, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_mixed_schemes() {
        let provisioners = load_provisioners(
            r#"
- uri: template://test/one
  type: thing
  outputs: |
    a: 1
- uri: cmd://./binary
  type: other
"#,
        )
        .unwrap();
        assert_eq!(provisioners.len(), 2);
        assert_eq!(provisioners[0].uri(), "template://test/one");
        assert_eq!(provisioners[1].uri(), "cmd://./binary");
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let err = load_provisioners("- uri: http://nope\n  type: thing\n").unwrap_err();
        assert!(err.to_string().contains("unsupported provisioner uri"));
    }

    #[test]
    fn test_directory_order_and_first_match_wins() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("zz-default.provisioners.yaml"),
            "- uri: template://default/thing\n  type: thing\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("00-custom.provisioners.yaml"),
            "- uri: template://custom/thing\n  type: thing\n",
        )
        .unwrap();
        fs::write(tmp.path().join("ignored.yaml"), "not provisioners").unwrap();
        let provisioners = load_provisioners_from_directory(tmp.path()).unwrap();
        assert_eq!(provisioners.len(), 2);
        assert_eq!(provisioners[0].uri(), "template://custom/thing");
        assert_eq!(provisioners[1].uri(), "template://default/thing");
    }

    #[test]
    fn test_duplicate_uri_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("00-a.provisioners.yaml"),
            "- uri: template://same\n  type: thing\n",
        )
        .unwrap();
        fs::write(
            tmp.path().join("01-b.provisioners.yaml"),
            "- uri: template://same\n  type: thing\n",
        )
        .unwrap();
        let err = load_provisioners_from_directory(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_save_provisioner_sorts_before_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        save_provisioner_to_directory(
            tmp.path(),
            "./my Extra.yaml",
            b"- uri: template://extra\n  type: thing\n",
        )
        .unwrap();
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["10-my-extra-yaml.provisioners.yaml"]);
        assert!(names[0].as_str() < "zz-default.provisioners.yaml");
    }

    #[test]
    fn test_save_rejects_invalid_content() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(
            save_provisioner_to_directory(tmp.path(), "bad.yaml", b"- uri: ftp://x\n  type: t\n")
                .is_err()
        );
    }
}
