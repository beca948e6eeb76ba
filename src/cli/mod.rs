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

//! Command-line interface.

pub mod commands;
pub mod convert;
pub mod generate;
pub mod init;
pub mod provisioners;

pub use commands::{CliArgs, Commands};

use std::io::Read;
use std::path::Path;

use crate::shared::{Result, ScoreError};

/// Read a local file argument; `-` reads standard input. Remote retrieval
/// is handled by external tooling before the path reaches this binary.
pub(crate) fn read_source_file(base_dir: &Path, source: &str) -> Result<Vec<u8>> {
    if source == "-" {
        let mut buffer = Vec::new();
        std::io::stdin().read_to_end(&mut buffer)?;
        return Ok(buffer);
    }
    let path = if Path::new(source).is_absolute() {
        Path::new(source).to_path_buf()
    } else {
        base_dir.join(source)
    };
    std::fs::read(&path).map_err(|err| {
        ScoreError::config_error(format!("failed to read '{}': {err}", path.display()))
    })
}
