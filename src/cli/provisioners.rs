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

use std::path::Path;

use clap::Parser;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Table};

use crate::domain::state::StateDirectory;
use crate::infrastructure::provisioners::loader;
use crate::shared::{Result, ScoreError};

/// List the provisioners loaded from the project's `*.provisioners.yaml`
/// files, in the order they are matched against resources.
#[derive(Parser, Debug, Default)]
pub struct ProvisionersCommand {}

impl ProvisionersCommand {
    pub async fn execute(&self) -> Result<()> {
        self.execute_in(Path::new("."))
    }

    pub fn execute_in(&self, project_dir: &Path) -> Result<()> {
        let sd = StateDirectory::load(project_dir)?.ok_or_else(|| {
            ScoreError::config_error(
                "state directory does not exist, please run \"score-k8s init\" first",
            )
        })?;
        let provisioners = loader::load_provisioners_from_directory(&sd.path)?;
        println!("{}", render_provisioners_table(&provisioners));
        Ok(())
    }
}

fn render_provisioners_table(
    provisioners: &[Box<dyn crate::infrastructure::provisioners::Provisioner>],
) -> String {
    if provisioners.is_empty() {
        return "No provisioners found".yellow().to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("URI").set_alignment(CellAlignment::Left),
            Cell::new("TYPE").set_alignment(CellAlignment::Left),
            Cell::new("CLASS").set_alignment(CellAlignment::Left),
            Cell::new("PARAMS").set_alignment(CellAlignment::Left),
            Cell::new("OUTPUTS").set_alignment(CellAlignment::Left),
            Cell::new("DESCRIPTION").set_alignment(CellAlignment::Left),
        ]);

    for provisioner in provisioners {
        table.add_row(vec![
            Cell::new(provisioner.uri()),
            Cell::new(provisioner.resource_type()),
            Cell::new(provisioner.class_label()),
            Cell::new(provisioner.supported_params().join(", ")),
            Cell::new(provisioner.expected_outputs().join(", ")),
            Cell::new(provisioner.description()),
        ]);
    }

    table.to_string()
}
