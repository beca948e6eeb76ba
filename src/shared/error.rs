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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoreError>;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Invariant error: {0}")]
    InvariantError(String),

    #[error("Provision error: resource '{uid}': {message}")]
    ProvisionError { uid: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl ScoreError {
    pub fn config_error(context: impl Into<String>) -> Self {
        Self::ConfigError(context.into())
    }

    pub fn validation_error(context: impl Into<String>) -> Self {
        Self::ValidationError(context.into())
    }

    pub fn template_error(context: impl Into<String>) -> Self {
        Self::TemplateError(context.into())
    }

    pub fn invariant_error(context: impl Into<String>) -> Self {
        Self::InvariantError(context.into())
    }

    pub fn provision_error(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProvisionError {
            uid: uid.into(),
            message: message.into(),
        }
    }

    /// Wrap this error with a context prefix identifying the offending
    /// entity, preserving the error kind.
    pub fn with_context(self, prefix: impl AsRef<str>) -> Self {
        let prefix = prefix.as_ref();
        match self {
            Self::ConfigError(m) => Self::ConfigError(format!("{prefix}: {m}")),
            Self::ValidationError(m) => Self::ValidationError(format!("{prefix}: {m}")),
            Self::TemplateError(m) => Self::TemplateError(format!("{prefix}: {m}")),
            Self::InvariantError(m) => Self::InvariantError(format!("{prefix}: {m}")),
            Self::ProvisionError { uid, message } => Self::ProvisionError {
                uid,
                message: format!("{prefix}: {message}"),
            },
            Self::Cancelled => Self::Cancelled,
            Self::Io(e) => Self::ValidationError(format!("{prefix}: {e}")),
            Self::YamlParse(e) => Self::ValidationError(format!("{prefix}: {e}")),
            Self::JsonParse(e) => Self::ValidationError(format!("{prefix}: {e}")),
        }
    }
}

impl From<minijinja::Error> for ScoreError {
    fn from(err: minijinja::Error) -> Self {
        // The minijinja display form hides the inner failure, so include the
        // full detail chain in the message shown to the user.
        let mut msg = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            msg = format!("{msg}: {inner}");
            source = inner.source();
        }
        ScoreError::TemplateError(msg)
    }
}
