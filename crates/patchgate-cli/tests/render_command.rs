//! Integration tests for the render command

use std::fs;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run patchgate and capture output
fn patchgate(args: &[&str]) -> (String, String, Option<i32>) {
    patchgate_with_env(args, &[])
}

fn patchgate_with_env(args: &[&str], vars: &[(&str, &str)]) -> (String, String, Option<i32>) {
    let output = Command::new(env!("CARGO_BIN_EXE_patchgate"))
        .args(args)
        .env_remove("RUST_LOG")
        .envs(vars.iter().copied())
        .output()
        .expect("Failed to execute patchgate");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code(),
    )
}

const SCHEMA: &str = r##"{
  "swagger": "2.0",
  "definitions": {
    "io.k8s.api.core.v1.Pod": {
      "properties": {"spec": {"$ref": "#/definitions/io.k8s.api.core.v1.PodSpec"}}
    },
    "io.k8s.api.core.v1.PodSpec": {
      "properties": {
        "containers": {
          "type": "array",
          "items": {"type": "object"},
          "x-kubernetes-patch-merge-key": "name",
          "x-kubernetes-patch-strategy": "merge"
        }
      }
    }
  }
}"##;

fn write(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

fn pod_with(annotations: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Pod
metadata:
  name: web
  annotations:
{annotations}
spec:
  containers:
  - name: app
    image: nginx
"#
    )
}

#[test]
fn test_strategic_merge_with_schema() {
    let dir = TempDir::new().unwrap();
    let object = write(
        &dir,
        "pod.yaml",
        &pod_with(
            r#"    redhat-cop.redhat.io/patch: |
      spec:
        containers:
        - name: proxy
          image: envoy"#,
        ),
    );
    let schema = write(&dir, "openapi.json", SCHEMA);

    let (stdout, stderr, code) = patchgate(&[
        "render", "--object", &object, "--schema", &schema, "--output", "json",
    ]);
    assert_eq!(code, Some(0), "stderr: {}", stderr);

    let out: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        out["object"]["spec"]["containers"],
        serde_json::json!([
            {"name": "app", "image": "nginx"},
            {"name": "proxy", "image": "envoy"}
        ])
    );
    assert_eq!(
        out["patch"],
        serde_json::json!([
            {"op": "add", "path": "/spec/containers/1", "value": {"name": "proxy", "image": "envoy"}}
        ])
    );
}

#[test]
fn test_object_without_directive_is_printed_unchanged() {
    let dir = TempDir::new().unwrap();
    let object = write(&dir, "pod.yaml", &pod_with("    team: payments"));

    let (stdout, _, code) = patchgate(&["render", "--object", &object, "--output", "json"]);
    assert_eq!(code, Some(0));
    let out: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(out["patch"], serde_json::json!([]));
    assert_eq!(out["object"]["metadata"]["name"], "web");
}

#[test]
fn test_template_error_exit_code() {
    let dir = TempDir::new().unwrap();
    let object = write(
        &dir,
        "pod.yaml",
        &pod_with(r#"    redhat-cop.redhat.io/patch: "{{ metadata.lables.team }}""#),
    );

    let (_, stderr, code) = patchgate(&["render", "--object", &object]);
    assert_eq!(code, Some(3));
    assert!(stderr.contains("Template error"), "stderr: {}", stderr);
}

#[test]
fn test_strategic_merge_without_schema_exit_code() {
    let dir = TempDir::new().unwrap();
    let object = write(
        &dir,
        "pod.yaml",
        &pod_with(r#"    redhat-cop.redhat.io/patch: "spec: {}""#),
    );

    let (_, stderr, code) = patchgate(&["render", "--object", &object]);
    assert_eq!(code, Some(4));
    assert!(stderr.contains("--schema"), "stderr: {}", stderr);
}

#[test]
fn test_missing_object_file() {
    let (_, _, code) = patchgate(&["render", "--object", "/nonexistent/pod.yaml"]);
    assert_eq!(code, Some(5));
}

#[test]
fn test_flags_fall_back_to_environment() {
    let dir = TempDir::new().unwrap();
    let object = write(
        &dir,
        "pod.yaml",
        &pod_with(
            r#"    redhat-cop.redhat.io/patch-type: application/merge-patch+json
    redhat-cop.redhat.io/patch: |
      metadata:
        labels:
          owner: "{{ metadata.owner }}""#,
        ),
    );

    let (_, stderr, code) = patchgate(&["render", "--object", &object]);
    assert_eq!(code, Some(3), "stderr: {}", stderr);

    let (stdout, stderr, code) = patchgate_with_env(
        &["render"],
        &[
            ("PATCHGATE_OBJECT", object.as_str()),
            ("PATCHGATE_OUTPUT", "json"),
            ("PATCHGATE_LENIENT", "true"),
        ],
    );
    assert_eq!(code, Some(0), "stderr: {}", stderr);
    let out: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(out["object"]["metadata"]["labels"]["owner"], "");
}
