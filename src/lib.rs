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

// Core modules
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod shared;

// Re-export commonly used types
pub use domain::score::WorkloadSpec;
pub use domain::state::{ResourceState, ResourceUid, State, StateDirectory, WorkloadState};
pub use shared::{Object, Result, ScoreError};

// Re-export the pipeline entry points for embedding and tests
#[doc(hidden)]
pub use infrastructure::kubernetes::{convert_workload, ConverterInputs};
#[doc(hidden)]
pub use infrastructure::provisioners::{provision_resources, ProvisionOutput, Provisioner};
