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

//! The external-command provisioner: a subprocess receiving the provision
//! input as JSON on stdin and answering with a JSON `ProvisionOutput` on
//! stdout. Stderr is forwarded to the user; a nonzero exit aborts.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::domain::state::ResourceUid;
use crate::shared::{Result, ScoreError};

use super::{Input, ProvisionOutput, Provisioner};

pub const CMD_URI_SCHEME: &str = "cmd://";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CmdProvisioner {
    pub uri: String,

    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub class: Option<String>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub description: String,

    /// The binary to execute; defaults to the uri path after `cmd://`.
    #[serde(default)]
    pub binary: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl CmdProvisioner {
    pub fn parse(raw: &Value) -> Result<Self> {
        let provisioner: CmdProvisioner = serde_json::from_value(raw.clone())
            .map_err(|err| ScoreError::config_error(err.to_string()))?;
        if provisioner.uri.is_empty() {
            return Err(ScoreError::config_error("uri not set"));
        }
        if provisioner.resource_type.is_empty() {
            return Err(ScoreError::config_error("type not set"));
        }
        Ok(provisioner)
    }

    fn binary(&self) -> &str {
        self.binary
            .as_deref()
            .unwrap_or_else(|| self.uri.trim_start_matches(CMD_URI_SCHEME))
    }
}

#[async_trait]
impl Provisioner for CmdProvisioner {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn matches(&self, uid: &ResourceUid) -> bool {
        if uid.resource_type() != self.resource_type {
            return false;
        }
        if let Some(class) = &self.class {
            if uid.class() != class {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if uid.id() != id {
                return false;
            }
        }
        true
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn class_label(&self) -> String {
        self.class.clone().unwrap_or_else(|| "(any)".to_string())
    }

    async fn provision(&self, ctx: &CancellationToken, input: &Input) -> Result<ProvisionOutput> {
        let binary = self.binary();
        let mut command = tokio::process::Command::new(binary);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|err| {
            ScoreError::validation_error(format!(
                "failed to start provisioner binary '{binary}': {err}"
            ))
        })?;

        let raw_input = serde_json::to_vec(input)?;
        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(&raw_input).await?;
        drop(stdin);

        let output = tokio::select! {
            _ = ctx.cancelled() => return Err(ScoreError::Cancelled),
            output = child.wait_with_output() => output?,
        };
        if !output.status.success() {
            return Err(ScoreError::validation_error(format!(
                "provisioner binary '{binary}' exited with {}",
                output.status
            )));
        }
        let provision_output: ProvisionOutput =
            serde_json::from_slice(&output.stdout).map_err(|err| {
                ScoreError::validation_error(format!(
                    "failed to decode provisioner binary '{binary}' output: {err}"
                ))
            })?;
        Ok(provision_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_binary_derivation() {
        let raw: Value = serde_yaml::from_str(
            "uri: cmd://./my-prov\ntype: thing\nargs: ['--flag']\n",
        )
        .unwrap();
        let provisioner = CmdProvisioner::parse(&raw).unwrap();
        assert_eq!(provisioner.binary(), "./my-prov");
        assert_eq!(provisioner.args, vec!["--flag"]);

        let raw: Value =
            serde_yaml::from_str("uri: cmd://x\ntype: thing\nbinary: /usr/bin/env\n").unwrap();
        assert_eq!(CmdProvisioner::parse(&raw).unwrap().binary(), "/usr/bin/env");
    }

    #[tokio::test]
    async fn test_provision_roundtrip_through_cat() {
        // `sh -c 'cat >/dev/null; echo …'` stands in for a real provisioner
        // binary: it consumes the input and prints a fixed ProvisionOutput.
        let provisioner = CmdProvisioner {
            uri: "cmd://sh".into(),
            resource_type: "thing".into(),
            class: None,
            id: None,
            description: String::new(),
            binary: Some("sh".into()),
            args: vec![
                "-c".into(),
                r#"cat >/dev/null; echo '{"resource_outputs": {"host": "h"}, "shared_state": {"k": 1}}'"#
                    .into(),
            ],
        };
        let out = provisioner
            .provision(&CancellationToken::new(), &Input::default())
            .await
            .unwrap();
        assert_eq!(Value::Object(out.resource_outputs), json!({"host": "h"}));
        assert_eq!(Value::Object(out.shared_state), json!({"k": 1}));
        assert!(out.resource_state.is_empty());
        assert!(out.manifests.is_empty());
    }

    #[tokio::test]
    async fn test_provision_nonzero_exit_aborts() {
        let provisioner = CmdProvisioner {
            uri: "cmd://false".into(),
            resource_type: "thing".into(),
            class: None,
            id: None,
            description: String::new(),
            binary: Some("sh".into()),
            args: vec!["-c".into(), "cat >/dev/null; exit 3".into()],
        };
        let err = provisioner
            .provision(&CancellationToken::new(), &Input::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }
}
