//! Admission boundary end-to-end, without a cluster

use kube::api::DynamicObject;
use kube::core::admission::{AdmissionResponse, AdmissionReview};
use patchgate_engine::StaticLookup;
use patchgate_kube::{ClusterLookups, PatchDispatcher, PatchInjector, SchemaCache, StaticSchemaSource};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tokio::runtime::Handle;

fn schema() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "swagger": "2.0",
        "definitions": {
            "io.k8s.api.core.v1.Pod": {
                "properties": {
                    "spec": { "$ref": "#/definitions/io.k8s.api.core.v1.PodSpec" }
                },
                "x-kubernetes-group-version-kind": [
                    { "group": "", "kind": "Pod", "version": "v1" }
                ]
            },
            "io.k8s.api.core.v1.PodSpec": {
                "properties": {
                    "containers": {
                        "type": "array",
                        "items": { "$ref": "#/definitions/io.k8s.api.core.v1.Container" },
                        "x-kubernetes-patch-merge-key": "name",
                        "x-kubernetes-patch-strategy": "merge"
                    }
                }
            },
            "io.k8s.api.core.v1.Container": {
                "properties": {
                    "name": { "type": "string" },
                    "image": { "type": "string" }
                }
            }
        }
    }))
    .unwrap()
}

fn lookups() -> Arc<StaticLookup> {
    Arc::new(StaticLookup::new().with_private_object(
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "sidecar", "namespace": "shop"},
            "data": {"image": "envoy:1.30"}
        }),
        ["alice"],
    ))
}

async fn injector() -> PatchInjector {
    let cache = Arc::new(SchemaCache::new(Arc::new(StaticSchemaSource::new(schema()))));
    cache.refresh().await.unwrap();
    PatchInjector::new(PatchDispatcher::new(cache), Arc::new(lookups()))
}

fn pod(annotations: JsonValue) -> JsonValue {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"generateName": "web-", "namespace": "shop", "annotations": annotations},
        "spec": {"containers": [{"name": "app", "image": "nginx"}]}
    })
}

fn review(object: JsonValue, username: &str) -> Vec<u8> {
    review_as(object, json!({"username": username, "groups": ["system:authenticated"]}))
}

fn review_as(object: JsonValue, user_info: JsonValue) -> Vec<u8> {
    let kind = object["kind"].as_str().unwrap_or_default().to_string();
    let (group, version) = match object["apiVersion"].as_str().unwrap_or_default().split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), object["apiVersion"].as_str().unwrap_or_default().to_string()),
    };
    serde_json::to_vec(&json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": group, "version": version, "kind": kind},
            "resource": {"group": group, "version": version, "resource": "things"},
            "namespace": "shop",
            "operation": "CREATE",
            "userInfo": user_info,
            "object": object,
            "dryRun": false
        }
    }))
    .unwrap()
}

async fn admit(object: JsonValue, username: &str) -> AdmissionResponse {
    let reviewed: AdmissionReview<DynamicObject> = injector().await.review(&review(object, username)).await;
    reviewed.response.unwrap()
}

/// Apply the response's JSON patch to `original`
fn patched(original: &JsonValue, response: &AdmissionResponse) -> JsonValue {
    let operations: json_patch::Patch =
        serde_json::from_slice(response.patch.as_deref().unwrap()).unwrap();
    let mut document = original.clone();
    json_patch::patch(&mut document, &operations).unwrap();
    document
}

#[tokio::test]
async fn object_without_directive_is_allowed_unchanged() {
    let response = admit(pod(json!({"team": "payments"})), "alice").await;
    assert!(response.allowed);
    assert!(response.patch.is_none());
    assert_eq!(response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
}

#[tokio::test]
async fn strategic_merge_adds_keyed_container() {
    let object = pod(json!({
        "redhat-cop.redhat.io/patch": r#"
spec:
  containers:
  - name: proxy
    image: {{ lookup("v1", "ConfigMap", metadata.namespace, "sidecar").data.image }}
"#
    }));

    let response = admit(object.clone(), "alice").await;
    assert!(response.allowed);
    let result = patched(&object, &response);
    assert_eq!(
        result["spec"]["containers"],
        json!([
            {"name": "app", "image": "nginx"},
            {"name": "proxy", "image": "envoy:1.30"}
        ])
    );
}

#[tokio::test]
async fn lookups_see_only_what_the_caller_can_read() {
    let object = pod(json!({
        "redhat-cop.redhat.io/patch": r#"{"metadata": {"labels": {"image": "{{ (lookup("v1", "ConfigMap", "shop", "sidecar").data | default({})).image | default("none") }}"}}}"#,
        "redhat-cop.redhat.io/patch-type": "application/merge-patch+json"
    }));

    let response = admit(object.clone(), "mallory").await;
    assert!(response.allowed);
    assert_eq!(patched(&object, &response)["metadata"]["labels"]["image"], "none");
}

#[tokio::test]
async fn merge_patch_replaces_lists() {
    let object = pod(json!({
        "redhat-cop.redhat.io/patch": r#"{"spec": {"containers": [{"name": "only", "image": "busybox"}]}}"#,
        "redhat-cop.redhat.io/patch-type": "application/merge-patch+json"
    }));

    let response = admit(object.clone(), "alice").await;
    assert_eq!(
        patched(&object, &response)["spec"]["containers"],
        json!([{"name": "only", "image": "busybox"}])
    );
}

#[tokio::test]
async fn json_patch_uses_object_fields() {
    let object = pod(json!({
        "redhat-cop.redhat.io/patch": r#"[{"op": "add", "path": "/metadata/labels", "value": {"prefix": "{{ metadata.generateName }}"}}]"#,
        "redhat-cop.redhat.io/patch-type": "application/json-patch+json"
    }));

    let response = admit(object.clone(), "alice").await;
    assert_eq!(patched(&object, &response)["metadata"]["labels"], json!({"prefix": "web-"}));
}

#[tokio::test]
async fn failed_test_operation_is_a_patch_apply_error() {
    let object = pod(json!({
        "redhat-cop.redhat.io/patch": r#"[{"op": "test", "path": "/metadata/namespace", "value": "other"}]"#,
        "redhat-cop.redhat.io/patch-type": "application/json-patch+json"
    }));

    let response = admit(object, "alice").await;
    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert_eq!(response.result.reason, "PatchApplyError");
}

#[tokio::test]
async fn unsupported_patch_type_is_reported() {
    let object = pod(json!({
        "redhat-cop.redhat.io/patch": "{}",
        "redhat-cop.redhat.io/patch-type": "application/apply-patch+yaml"
    }));

    let response = admit(object, "alice").await;
    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert_eq!(response.result.reason, "UnsupportedPatchType");
}

#[tokio::test]
async fn strategic_merge_on_unknown_type_is_a_schema_miss() {
    let object = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "web", "namespace": "shop", "annotations": {
            "redhat-cop.redhat.io/patch": "spec:\n  replicas: 3\n"
        }},
        "spec": {"replicas": 1}
    });

    let response = admit(object, "alice").await;
    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert_eq!(response.result.reason, "SchemaLookupMiss");
}

#[tokio::test]
async fn template_failures_are_distinct() {
    let parse = admit(pod(json!({"redhat-cop.redhat.io/patch": "{{ metadata.name "})), "alice").await;
    assert_eq!(parse.result.reason, "TemplateParseError");

    let eval = admit(pod(json!({"redhat-cop.redhat.io/patch": "{{ spec.missing.field }}"})), "alice").await;
    assert_eq!(eval.result.reason, "TemplateEvalError");

    let normalize = admit(pod(json!({"redhat-cop.redhat.io/patch": "a: [unclosed"})), "alice").await;
    assert_eq!(normalize.result.reason, "OutputNormalizationError");

    for response in [parse, eval, normalize] {
        assert!(!response.allowed);
        assert_eq!(response.result.code, 500);
    }
}

#[tokio::test]
async fn malformed_review_is_a_bad_request() {
    let reviewed = injector().await.review(b"{\"apiVersion\": ").await;
    let response = reviewed.response.unwrap();
    assert!(!response.allowed);
    assert_eq!(response.result.code, 400);
}

/// Injector wired to cluster lookups against an API server that is never contacted
async fn cluster_injector() -> PatchInjector {
    let cache = Arc::new(SchemaCache::new(Arc::new(StaticSchemaSource::new(schema()))));
    cache.refresh().await.unwrap();
    let config = kube::Config::new("https://127.0.0.1:6443".parse().unwrap());
    PatchInjector::new(
        PatchDispatcher::new(cache),
        Arc::new(ClusterLookups::new(config, Handle::current())),
    )
}

fn labelling_directive() -> JsonValue {
    pod(json!({
        "redhat-cop.redhat.io/patch": "metadata:\n  labels:\n    patched: \"yes\"",
        "redhat-cop.redhat.io/patch-type": "application/merge-patch+json"
    }))
}

#[tokio::test]
async fn service_account_callers_need_no_cluster_for_lookup_free_directives() {
    let object = labelling_directive();
    let body = review_as(
        object.clone(),
        json!({
            "username": "system:serviceaccount:shop:deployer",
            "groups": ["system:serviceaccounts", "system:serviceaccounts:shop"],
            "extra": {
                "authentication.kubernetes.io/pod-name": ["deployer-7d9f"],
                "authentication.kubernetes.io/credential-id": ["JTI=1234"]
            }
        }),
    );

    let response = cluster_injector().await.review(&body).await.response.unwrap();
    assert!(response.allowed, "{:?}", response.result);
    assert_eq!(patched(&object, &response)["metadata"]["labels"], json!({"patched": "yes"}));
}

#[tokio::test]
async fn anonymous_callers_are_refused_only_when_looking_up() {
    let object = labelling_directive();
    let response = cluster_injector()
        .await
        .review(&review_as(object, json!({})))
        .await
        .response
        .unwrap();
    assert!(response.allowed, "{:?}", response.result);

    let object = pod(json!({
        "redhat-cop.redhat.io/patch": r#"{{ lookup("v1", "ConfigMap", "shop", "sidecar") | tojson }}"#,
        "redhat-cop.redhat.io/patch-type": "application/merge-patch+json"
    }));
    let response = cluster_injector()
        .await
        .review(&review_as(object, json!({})))
        .await
        .response
        .unwrap();
    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert_eq!(response.result.reason, "TemplateEvalError");
    assert!(response.result.message.contains("no username"), "{}", response.result.message);
}

#[tokio::test]
async fn json_patch_sees_the_object_as_sent() {
    let mut object = pod(json!({
        "redhat-cop.redhat.io/patch": r#"[
  {"op": "test", "path": "/metadata/creationTimestamp", "value": null},
  {"op": "add", "path": "/metadata/labels", "value": {"checked": "true"}}
]"#,
        "redhat-cop.redhat.io/patch-type": "application/json-patch+json"
    }));
    object["metadata"]["creationTimestamp"] = JsonValue::Null;

    let response = admit(object.clone(), "alice").await;
    assert!(response.allowed, "{:?}", response.result);
    let result = patched(&object, &response);
    assert_eq!(result["metadata"]["labels"], json!({"checked": "true"}));
    assert!(result["metadata"]["creationTimestamp"].is_null());
}
