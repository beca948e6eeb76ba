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

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use score_k8s::cli::generate::GenerateCommand;
use score_k8s::cli::init::InitCommand;
use score_k8s::StateDirectory;

fn init_command() -> InitCommand {
    InitCommand {
        file: "score.yaml".to_string(),
        ..Default::default()
    }
}

fn generate_command(files: &[&str]) -> GenerateCommand {
    GenerateCommand {
        files: files.iter().map(|f| f.to_string()).collect(),
        output: "manifests.yaml".to_string(),
        ..Default::default()
    }
}

async fn run_generate(dir: &Path, cmd: &GenerateCommand) -> score_k8s::Result<String> {
    cmd.execute_in(dir, &CancellationToken::new()).await?;
    Ok(fs::read_to_string(dir.join("manifests.yaml")).expect("manifests were written"))
}

fn parse_documents(raw: &str) -> Vec<Value> {
    raw.split("---\n")
        .filter(|doc| !doc.trim().is_empty())
        .map(|doc| serde_yaml::from_str(doc).expect("manifest parses"))
        .collect()
}

#[tokio::test]
async fn test_generate_without_init_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let err = generate_command(&[])
        .execute_in(tmp.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("state directory does not exist, please run \"score-k8s init\" first"));
}

#[tokio::test]
async fn test_generate_without_score_files_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let init = InitCommand {
        no_sample: true,
        ..init_command()
    };
    init.execute_in(tmp.path()).await.unwrap();
    let err = generate_command(&[])
        .execute_in(tmp.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("project is empty"));
}

#[tokio::test]
async fn test_init_and_generate_with_sample() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    assert!(tmp.path().join("score.yaml").exists());
    assert!(tmp
        .path()
        .join(".score-k8s/zz-default.provisioners.yaml")
        .exists());

    let raw = run_generate(tmp.path(), &generate_command(&["score.yaml"]))
        .await
        .unwrap();
    assert!(raw.contains("kind: Deployment"));
    assert!(raw.contains("kind: Service"));
    assert!(raw.contains("app.kubernetes.io/managed-by: score-k8s"));

    let sd = StateDirectory::load(tmp.path()).unwrap().unwrap();
    assert_eq!(sd.state.workloads.len(), 1);
    assert_eq!(
        sd.state.workloads["example"].file.as_deref(),
        Some(Path::new("score.yaml"))
    );
}

#[tokio::test]
async fn test_generate_twice_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    fs::write(
        tmp.path().join("score.yaml"),
        r#"
apiVersion: score.dev/v1b1
metadata:
  name: example
containers:
  example:
    image: nginx:latest
service:
  ports:
    web:
      port: 8080
resources:
  res-a:
    type: example-provisioner-resource
  res-b:
    type: volume
  res-c:
    type: dns
  res-d:
    type: route
    params:
      host: ${resources.res-c.host}
      path: /
      port: 8080
  res-e:
    type: postgres
  res-f:
    type: redis
"#,
    )
    .unwrap();

    let first = run_generate(tmp.path(), &generate_command(&["score.yaml"]))
        .await
        .unwrap();
    let state_one = StateDirectory::load(tmp.path()).unwrap().unwrap().state;
    let second = run_generate(tmp.path(), &generate_command(&["score.yaml"]))
        .await
        .unwrap();
    let state_two = StateDirectory::load(tmp.path()).unwrap().unwrap().state;

    assert_eq!(first, second);
    for (uid, resource) in &state_one.resources {
        assert_eq!(resource.guid, state_two.resources[uid].guid, "guid of {uid}");
    }
    assert_eq!(
        state_one.workloads["example"].instance_suffix,
        state_two.workloads["example"].instance_suffix
    );

    // The default stack got exercised end to end.
    assert!(first.contains("kind: Ingress"));
    assert!(first.contains("kind: StatefulSet"));
    assert!(first.contains("secretKeyRef"));
    // No secret sentinel ever escapes into the output stream.
    assert!(!first.contains('\u{1F510}'));
}

#[tokio::test]
async fn test_generate_with_image_override() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    fs::write(
        tmp.path().join("score.yaml"),
        "apiVersion: score.dev/v1b1\nmetadata:\n  name: example\ncontainers:\n  example:\n    image: .\n",
    )
    .unwrap();

    let err = generate_command(&["score.yaml"])
        .execute_in(tmp.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("container 'example' has no image and --image was not provided"));

    let with_image = GenerateCommand {
        image: Some("busybox:latest".to_string()),
        ..generate_command(&["score.yaml"])
    };
    let raw = run_generate(tmp.path(), &with_image).await.unwrap();
    assert!(raw.contains("image: busybox:latest"));
}

#[tokio::test]
async fn test_generate_flag_constraints() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    fs::write(
        tmp.path().join("a.yaml"),
        "apiVersion: score.dev/v1b1\nmetadata:\n  name: a\ncontainers:\n  m:\n    image: x\n",
    )
    .unwrap();
    fs::write(
        tmp.path().join("b.yaml"),
        "apiVersion: score.dev/v1b1\nmetadata:\n  name: b\ncontainers:\n  m:\n    image: x\n",
    )
    .unwrap();
    let cmd = GenerateCommand {
        image: Some("nginx:latest".to_string()),
        ..generate_command(&["a.yaml", "b.yaml"])
    };
    let err = cmd
        .execute_in(tmp.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains(
        "cannot use --override-property, --overrides-file, or --image when 0 or more than 1 \
         score files are provided"
    ));
}

#[tokio::test]
async fn test_generate_with_overrides() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    fs::write(
        tmp.path().join("overrides.yaml"),
        r#"{"resources": {"foo": {"type": "example-provisioner-resource"}}}"#,
    )
    .unwrap();
    let cmd = GenerateCommand {
        overrides_file: Some("overrides.yaml".to_string()),
        override_properties: vec![
            "containers.main.variables.THING=${resources.foo.plaintext}".to_string(),
        ],
        ..generate_command(&["score.yaml"])
    };
    let raw = run_generate(tmp.path(), &cmd).await.unwrap();
    assert!(raw.contains("name: THING"));
    assert!(raw.contains("value: an example string"));

    let sd = StateDirectory::load(tmp.path()).unwrap().unwrap();
    assert_eq!(sd.state.resources.len(), 1);
}

#[tokio::test]
async fn test_generate_with_custom_secret_provisioner() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    fs::write(
        tmp.path().join(".score-k8s/00-test.provisioners.yaml"),
        r#"
- uri: template://test/custom-db
  type: custom-db
  outputs: |
    password: {{ encodeSecretRef("db-creds", "password") }}
"#,
    )
    .unwrap();
    fs::write(
        tmp.path().join("score.yaml"),
        r#"
apiVersion: score.dev/v1b1
metadata:
  name: example
containers:
  main:
    image: nginx
    variables:
      DB: ${resources.db.password}
resources:
  db:
    type: custom-db
"#,
    )
    .unwrap();
    let raw = run_generate(tmp.path(), &generate_command(&["score.yaml"]))
        .await
        .unwrap();
    let docs = parse_documents(&raw);
    let deployment = docs
        .iter()
        .find(|d| d["kind"] == "Deployment")
        .expect("deployment present");
    let env = &deployment["spec"]["template"]["spec"]["containers"][0]["env"];
    assert_eq!(env[0]["name"], "DB");
    assert!(env[0].get("value").is_none());
    assert_eq!(env[0]["valueFrom"]["secretKeyRef"]["name"], "db-creds");
    assert_eq!(env[0]["valueFrom"]["secretKeyRef"]["key"], "password");
}

#[tokio::test]
async fn test_generate_unsupported_resource_type() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    fs::write(
        tmp.path().join("score.yaml"),
        r#"
apiVersion: score.dev/v1b1
metadata:
  name: example
containers:
  main:
    image: nginx
resources:
  thing:
    type: no-such-type
"#,
    )
    .unwrap();
    let err = generate_command(&["score.yaml"])
        .execute_in(tmp.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains(
        "resource 'no-such-type.default#example.thing' is not supported by any provisioner"
    ));
}

#[tokio::test]
async fn test_patch_templates_adjust_manifests() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("patch-1.tpl"),
        r#"
{% for m in Manifests %}
{% if m.kind == "Deployment" %}
- op: set
  path: {{ loop.index0 }}.spec.replicas
  value: 3
{% endif %}
{% endfor %}
"#,
    )
    .unwrap();
    let init = InitCommand {
        patch_templates: vec!["patch-1.tpl".to_string()],
        ..init_command()
    };
    init.execute_in(tmp.path()).await.unwrap();

    let raw = run_generate(tmp.path(), &generate_command(&["score.yaml"]))
        .await
        .unwrap();
    let docs = parse_documents(&raw);
    let deployment = docs.iter().find(|d| d["kind"] == "Deployment").unwrap();
    assert_eq!(deployment["spec"]["replicas"], 3);
    let service = docs.iter().find(|d| d["kind"] == "Service").unwrap();
    assert!(service["spec"].get("replicas").is_none());
}

#[tokio::test]
async fn test_patch_templates_add_and_delete_manifests() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("patch-1.tpl"),
        r#"
- op: set
  path: -1
  value:
    apiVersion: v1
    kind: Secret
    metadata:
      name: my-secret
    data:
      fruit: {{ "banana" | b64enc }}
- op: set
  path: -1
  value:
    apiVersion: v1
    kind: Secret
    metadata:
      name: other-secret
    data:
      fruit: {{ "banana" | b64enc }}
"#,
    )
    .unwrap();
    fs::write(
        tmp.path().join("patch-2.tpl"),
        r#"
{% for m in Manifests %}
{% if m.metadata.name == "my-secret" %}
- op: delete
  path: {{ loop.index0 }}
{% endif %}
{% endfor %}
"#,
    )
    .unwrap();
    let init = InitCommand {
        patch_templates: vec!["patch-1.tpl".to_string(), "patch-2.tpl".to_string()],
        ..init_command()
    };
    init.execute_in(tmp.path()).await.unwrap();

    let raw = run_generate(tmp.path(), &generate_command(&["score.yaml"]))
        .await
        .unwrap();
    assert!(!raw.contains("my-secret"));
    assert!(raw.contains("other-secret"));
}

#[tokio::test]
async fn test_invalid_patch_template_rejected_at_init() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("broken.tpl"), "{% for x in %}").unwrap();
    let init = InitCommand {
        patch_templates: vec!["broken.tpl".to_string()],
        ..init_command()
    };
    let err = init.execute_in(tmp.path()).await.unwrap_err();
    assert!(err.to_string().contains("broken.tpl"));
}

#[tokio::test]
async fn test_namespace_flag_sets_namespace() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    let cmd = GenerateCommand {
        namespace: Some("test-ns".to_string()),
        ..generate_command(&["score.yaml"])
    };
    let raw = run_generate(tmp.path(), &cmd).await.unwrap();
    assert!(raw.contains("namespace: test-ns"));
    assert!(!raw.contains("kind: Namespace"));
}

#[tokio::test]
async fn test_generate_namespace_requires_namespace() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    let cmd = GenerateCommand {
        generate_namespace: true,
        ..generate_command(&["score.yaml"])
    };
    let err = cmd
        .execute_in(tmp.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("namespace flag is required when using --generate-namespace"));
}

#[tokio::test]
async fn test_generate_namespace_emits_namespace_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    let cmd = GenerateCommand {
        namespace: Some("test-ns".to_string()),
        generate_namespace: true,
        ..generate_command(&["score.yaml"])
    };
    let raw = run_generate(tmp.path(), &cmd).await.unwrap();
    assert!(raw.contains("kind: Namespace"));
    assert!(raw.contains("namespace: test-ns"));
    assert!(raw.contains("name: test-ns"));
    assert!(raw.contains("app.kubernetes.io/managed-by: score-k8s"));
    let docs = parse_documents(&raw);
    assert_eq!(docs[0]["kind"], "Namespace");
}

#[tokio::test]
async fn test_legacy_patch_manifests_flag() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    let cmd = GenerateCommand {
        patch_manifests: vec![
            "*/*/metadata.annotations.key=value".to_string(),
            "Deployment/example/spec.replicas=4".to_string(),
        ],
        ..generate_command(&["score.yaml"])
    };
    let raw = run_generate(tmp.path(), &cmd).await.unwrap();
    let docs = parse_documents(&raw);
    let deployment = docs.iter().find(|d| d["kind"] == "Deployment").unwrap();
    assert_eq!(deployment["spec"]["replicas"], 4);
    assert_eq!(deployment["metadata"]["annotations"]["key"], "value");
    let service = docs.iter().find(|d| d["kind"] == "Service").unwrap();
    assert_eq!(service["metadata"]["annotations"]["key"], "value");
}

#[tokio::test]
async fn test_duplicate_resource_manifests_deduplicated() {
    let tmp = tempfile::tempdir().unwrap();
    init_command().execute_in(tmp.path()).await.unwrap();
    fs::write(
        tmp.path().join(".score-k8s/00.provisioners.yaml"),
        r#"
- uri: template://dummy
  type: dummy
  manifests: |
    - apiVersion: v1
      kind: Secret
      metadata:
        name: my-secret
      data:
        fruit: {{ "banana" | b64enc }}
"#,
    )
    .unwrap();
    fs::write(
        tmp.path().join("score.yaml"),
        r#"
apiVersion: score.dev/v1b1
metadata:
  name: example-a
containers:
  hello:
    image: foo
resources:
  d1:
    type: dummy
  d2:
    type: dummy
"#,
    )
    .unwrap();
    let raw = run_generate(tmp.path(), &generate_command(&["score.yaml"]))
        .await
        .unwrap();
    assert_eq!(raw.matches("kind: Secret").count(), 1, "in: {raw}");
}
