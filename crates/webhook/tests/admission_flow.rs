//! End-to-end admission flow through the router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tower::ServiceExt;

use webhook::build_router;

async fn review(body: Value) -> (StatusCode, Value) {
    let response = build_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mutate")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn admission_review(kind: &str, object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "req-42",
            "kind": { "group": "apps", "version": "v1", "kind": kind },
            "object": object,
        }
    })
}

fn deployment(annotations: Value) -> Value {
    json!({
        "metadata": { "name": "web" },
        "spec": {
            "selector": { "matchLabels": { "app": "web" } },
            "template": {
                "metadata": { "annotations": annotations },
                "spec": {
                    "containers": [{ "name": "app", "image": "web:latest" }]
                }
            }
        }
    })
}

fn full_annotations() -> Value {
    json!({
        "podtap.dev/target-container": "app",
        "podtap.dev/entrypoint-path": "/podtap-entrypoint.sh",
        "podtap.dev/argument-string": "2345 /bin/server --port=8080",
        "podtap.dev/config-map-name": "podtap-entrypoint",
    })
}

#[tokio::test]
async fn health_endpoint_responds() {
    let response = build_router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unannotated_deployment_is_admitted_without_patch() {
    let (status, body) = review(admission_review("Deployment", deployment(json!({})))).await;
    assert_eq!(status, StatusCode::OK);
    let response = &body["response"];
    assert_eq!(response["uid"], "req-42");
    assert_eq!(response["allowed"], json!(true));
    assert!(response.get("patch").is_none());
}

#[tokio::test]
async fn annotated_deployment_gets_base64_json_patch() {
    let (status, body) =
        review(admission_review("Deployment", deployment(full_annotations()))).await;
    assert_eq!(status, StatusCode::OK);
    let response = &body["response"];
    assert_eq!(response["allowed"], json!(true));
    assert_eq!(response["patchType"], "JSONPatch");

    let decoded = BASE64
        .decode(response["patch"].as_str().unwrap())
        .unwrap();
    let patch: Value = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(patch[0]["op"], "replace");
    assert_eq!(patch[0]["path"], "/spec/template/spec");
    let container = &patch[0]["value"]["containers"][0];
    assert_eq!(container["command"], json!(["/podtap-entrypoint.sh"]));
    assert_eq!(
        container["args"],
        json!(["2345", "/bin/server", "--port=8080"])
    );
}

#[tokio::test]
async fn missing_container_is_rejected_with_message() {
    let mut annotations = full_annotations();
    annotations
        .as_object_mut()
        .unwrap()
        .insert("podtap.dev/target-container".into(), json!("ghost"));
    let (status, body) = review(admission_review("Deployment", deployment(annotations))).await;
    assert_eq!(status, StatusCode::OK);
    let response = &body["response"];
    assert_eq!(response["allowed"], json!(false));
    let message = response["status"]["message"].as_str().unwrap();
    assert!(message.contains("ghost"), "message was: {message}");
}

#[tokio::test]
async fn unknown_kind_is_admitted_unchanged() {
    let (status, body) = review(admission_review("CronJob", json!({ "metadata": {} }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], json!(true));
    assert!(body["response"].get("patch").is_none());
}

#[tokio::test]
async fn review_without_request_is_a_bad_request() {
    let body = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
    });
    let (status, _) = review(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
