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

//! Shared template environment for provisioner and patch templates.
//!
//! Templates are rendered with minijinja using its default `{{ … }}` and
//! `{% … %}` delimiters. Undefined values chain and render empty so that
//! optional fields don't break templates; a template can opt into hard
//! failures with the `fail` function.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use minijinja::value::Value;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use rand::Rng;
use uuid::Uuid;

use crate::domain::secrets::encode_secret_reference;
use crate::shared::Result;

pub fn build_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);

    env.add_function("encodeSecretRef", |secret: String, key: String| {
        encode_secret_reference(&secret, &key)
    });
    env.add_function(
        "fail",
        |msg: String| -> std::result::Result<Value, minijinja::Error> {
            Err(minijinja::Error::new(ErrorKind::InvalidOperation, msg))
        },
    );
    env.add_function("randAlphaNum", |len: u32| -> String {
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();
        (0..len)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    });
    env.add_function("uuidv4", || Uuid::new_v4().to_string());

    env.add_filter("b64enc", |value: String| STANDARD.encode(value));
    env.add_filter(
        "b64dec",
        |value: String| -> std::result::Result<String, minijinja::Error> {
            let raw = STANDARD.decode(value).map_err(|err| {
                minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string())
            })?;
            String::from_utf8(raw).map_err(|err| {
                minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string())
            })
        },
    );

    env
}

/// Render a template source against a context value.
pub fn render(env: &Environment<'_>, source: &str, context: impl serde::Serialize) -> Result<String> {
    Ok(env.render_str(source, Value::from_serialize(&context))?)
}

/// Compile a template without rendering it, to surface syntax errors early.
pub fn validate_syntax(source: &str) -> Result<()> {
    let env = build_environment();
    env.template_from_str(source)?;
    Ok(())
}
