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

use std::fs;
use std::path::Path;

use clap::Parser;
use tracing::info;

use crate::domain::state::{State, StateDirectory, DEFAULT_RELATIVE_STATE_DIRECTORY};
use crate::infrastructure::patching::validate_patch_template;
use crate::infrastructure::provisioners::defaults::{
    DEFAULT_PROVISIONERS, DEFAULT_PROVISIONERS_FILE_NAME,
};
use crate::infrastructure::provisioners::loader;
use crate::shared::{Result, ScoreError};

const SAMPLE_SCORE_FILE: &str = r#"apiVersion: score.dev/v1b1
metadata:
  name: example
containers:
  main:
    image: stefanprodan/podinfo
service:
  ports:
    web:
      port: 8080
"#;

/// Prepare the current directory for working with score-k8s: write the
/// initial empty state and default provisioners file into the `.score-k8s`
/// subdirectory, and optionally seed a sample score file.
///
/// The state directory will contain anything needed to generate the
/// Kubernetes manifests, potentially including sensitive data and raw
/// secrets, so it should not be checked into generic source control.
#[derive(Parser, Debug, Clone, Default)]
pub struct InitCommand {
    /// The score file to initialize
    #[arg(long, short = 'f', default_value = "score.yaml")]
    pub file: String,

    /// Disable generation of the sample score file
    #[arg(long)]
    pub no_sample: bool,

    /// Provisioner files to install. May be specified multiple times.
    #[arg(long = "provisioners", value_name = "PATH")]
    pub provisioners: Vec<String>,

    /// Patching template files to include. May be specified multiple times.
    #[arg(long = "patch-templates", value_name = "PATH")]
    pub patch_templates: Vec<String>,
}

impl InitCommand {
    pub async fn execute(&self) -> Result<()> {
        self.execute_in(Path::new(".")).await
    }

    pub async fn execute_in(&self, project_dir: &Path) -> Result<()> {
        let mut templates = Vec::with_capacity(self.patch_templates.len());
        for source in &self.patch_templates {
            info!("Fetching patch template from {source}");
            let content = super::read_source_file(project_dir, source)?;
            let content = String::from_utf8(content).map_err(|_| {
                ScoreError::config_error(format!("patch template '{source}' is not valid utf-8"))
            })?;
            validate_patch_template(&content)
                .map_err(|e| e.with_context(format!("error parsing patch template '{source}'")))?;
            templates.push(content);
        }

        let sd = match StateDirectory::load(project_dir)? {
            Some(mut sd) => {
                info!("Found existing state directory '{}'", sd.path.display());
                if !templates.is_empty() {
                    sd.state.extras.patching_templates = templates;
                    sd.persist()?;
                }
                sd
            }
            None => {
                let sd = StateDirectory::new(
                    project_dir.join(DEFAULT_RELATIVE_STATE_DIRECTORY),
                    State {
                        extras: crate::domain::state::StateExtras {
                            patching_templates: templates,
                        },
                        ..Default::default()
                    },
                );
                info!("Writing new state directory '{}'", sd.path.display());
                sd.persist()?;
                sd
            }
        };

        let default_provisioners = sd.path.join(DEFAULT_PROVISIONERS_FILE_NAME);
        if default_provisioners.exists() {
            info!(
                "Skipping creation of default provisioners file since it already exists: {}",
                default_provisioners.display()
            );
        } else {
            fs::write(&default_provisioners, DEFAULT_PROVISIONERS)?;
            info!(
                "Created default provisioners file {}",
                default_provisioners.display()
            );
        }

        let score_file = project_dir.join(&self.file);
        if score_file.exists() {
            info!(
                "Skipping creation of initial Score file since it already exists: {}",
                score_file.display()
            );
        } else if self.no_sample {
            info!("Initial Score file does not exist - and sample generation is disabled");
        } else {
            fs::write(&score_file, SAMPLE_SCORE_FILE)?;
            info!("Created initial Score file {}", score_file.display());
        }

        for (i, source) in self.provisioners.iter().enumerate() {
            let content = super::read_source_file(project_dir, source)
                .map_err(|e| e.with_context(format!("failed to load provisioner {}", i + 1)))?;
            loader::save_provisioner_to_directory(&sd.path, source, &content)
                .map_err(|e| e.with_context(format!("failed to save provisioner {}", i + 1)))?;
        }

        let provisioners = loader::load_provisioners_from_directory(&sd.path)
            .map_err(|e| e.with_context("failed to load existing provisioners"))?;
        info!("Successfully loaded {} resource provisioners", provisioners.len());

        info!("Read more about the Score specification at https://docs.score.dev/docs/");
        Ok(())
    }
}
