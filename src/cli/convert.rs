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

use std::io::{Read, Write};

use clap::Parser;

use crate::infrastructure::kubernetes::convert_raw_inputs_to_manifests;
use crate::shared::Result;

/// Hidden helper used as a converter binary target: reads `ConverterInputs`
/// JSON on stdin and writes the manifest array as JSON to stdout.
#[derive(Parser, Debug, Default)]
pub struct ConvertWorkloadToManifestsCommand {}

impl ConvertWorkloadToManifestsCommand {
    pub async fn execute(&self) -> Result<()> {
        let mut raw_inputs = Vec::new();
        std::io::stdin().read_to_end(&mut raw_inputs)?;
        let manifests = convert_raw_inputs_to_manifests(&raw_inputs)?;
        let out = serde_json::to_vec(&manifests)?;
        std::io::stdout().write_all(&out)?;
        Ok(())
    }
}
