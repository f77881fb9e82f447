//! The admission decision.
//!
//! Stateless and pure: each request is decided entirely from its own
//! payload. A workload without the full annotation protocol is admitted
//! unchanged; an annotated workload whose named container is missing is
//! rejected (fail closed); otherwise the pod spec is rewritten and returned
//! as exactly one `replace` JSON-Patch operation at the pod-template-spec
//! path.

use engine::annotations::DebugAnnotations;
use engine::workload::WorkloadObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One JSON-Patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Outcome of reviewing one workload object.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub patch: Option<Vec<PatchOperation>>,
    pub error: Option<String>,
}

impl Decision {
    fn allow_unchanged() -> Self {
        Self {
            allowed: true,
            patch: None,
            error: None,
        }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            patch: None,
            error: Some(message.into()),
        }
    }
}

/// Decide one admission request payload.
#[must_use]
pub fn decide(kind: &str, object: Value) -> Decision {
    // Kinds outside the closed set carry no debug intent; let them through
    // untouched rather than break unrelated writes.
    let object = match WorkloadObject::decode(kind, object) {
        Ok(object) => object,
        Err(engine::Error::UnknownOwnerKind { kind }) => {
            debug!(kind, "kind outside the workload set, admitting unchanged");
            return Decision::allow_unchanged();
        }
        Err(e) => {
            warn!(kind, error = %e, "undecodable admission payload");
            return Decision::reject(format!("undecodable {kind} payload: {e}"));
        }
    };

    // Presence of all four reserved annotations is the sole mutation
    // trigger.
    let Some(annotations) = object
        .template_annotations()
        .and_then(DebugAnnotations::from_annotations)
    else {
        return Decision::allow_unchanged();
    };

    let mut pod_spec = match object.pod_spec() {
        Ok(spec) => spec.clone(),
        Err(e) => return Decision::reject(e.to_string()),
    };
    if let Err(e) = annotations.inject(&mut pod_spec) {
        warn!(
            container = %annotations.target_container,
            error = %e,
            "rejecting annotated workload"
        );
        return Decision::reject(e.to_string());
    }

    let value = match serde_json::to_value(&pod_spec) {
        Ok(value) => value,
        Err(e) => return Decision::reject(format!("failed to encode mutated pod spec: {e}")),
    };

    debug!(
        kind,
        container = %annotations.target_container,
        path = object.patch_path(),
        "injecting debug entrypoint"
    );
    Decision {
        allowed: true,
        patch: Some(vec![PatchOperation {
            op: "replace".to_string(),
            path: object.patch_path().to_string(),
            value: Some(value),
        }]),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::annotations::{ENTRYPOINT_CONFIG_MAP, ENTRYPOINT_SCRIPT_PATH};
    use serde_json::json;

    fn deployment(annotations: Value, container_name: &str) -> Value {
        json!({
            "metadata": { "name": "web" },
            "spec": {
                "selector": { "matchLabels": { "app": "web" } },
                "template": {
                    "metadata": { "annotations": annotations },
                    "spec": {
                        "containers": [{ "name": container_name, "image": "web:latest" }]
                    }
                }
            }
        })
    }

    fn full_annotations() -> Value {
        json!({
            "podtap.dev/target-container": "app",
            "podtap.dev/entrypoint-path": ENTRYPOINT_SCRIPT_PATH,
            "podtap.dev/argument-string": "2345 /bin/server --port=8080",
            "podtap.dev/config-map-name": ENTRYPOINT_CONFIG_MAP,
        })
    }

    #[test]
    fn unannotated_workload_is_admitted_unchanged() {
        let decision = decide("Deployment", deployment(json!({}), "app"));
        assert_eq!(
            decision,
            Decision {
                allowed: true,
                patch: None,
                error: None
            }
        );
    }

    #[test]
    fn partial_annotations_are_admitted_unchanged() {
        let mut annotations = full_annotations();
        annotations
            .as_object_mut()
            .unwrap()
            .remove("podtap.dev/argument-string");
        let decision = decide("Deployment", deployment(annotations, "app"));
        assert!(decision.allowed);
        assert!(decision.patch.is_none());
    }

    #[test]
    fn annotated_workload_gets_one_replace_patch() {
        let decision = decide("Deployment", deployment(full_annotations(), "app"));
        assert!(decision.allowed);
        assert!(decision.error.is_none());

        let patch = decision.patch.unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch[0].op, "replace");
        assert_eq!(patch[0].path, "/spec/template/spec");

        let spec = patch[0].value.as_ref().unwrap();
        let container = &spec["containers"][0];
        assert_eq!(container["command"], json!([ENTRYPOINT_SCRIPT_PATH]));
        assert_eq!(
            container["args"],
            json!(["2345", "/bin/server", "--port=8080"])
        );
        let mount = &container["volumeMounts"][0];
        assert_eq!(mount["mountPath"], mount["subPath"]);
        assert_eq!(mount["mountPath"], json!(ENTRYPOINT_SCRIPT_PATH));
    }

    #[test]
    fn missing_container_is_rejected() {
        let decision = decide("Deployment", deployment(full_annotations(), "other"));
        assert!(!decision.allowed);
        assert!(decision.patch.is_none());
        let message = decision.error.unwrap();
        assert!(message.contains("app"), "error should name the container: {message}");
    }

    #[test]
    fn bare_pod_is_patched_at_spec() {
        let pod = json!({
            "metadata": {
                "name": "single",
                "annotations": full_annotations(),
            },
            "spec": {
                "containers": [{ "name": "app", "image": "web:latest" }]
            }
        });
        let decision = decide("Pod", pod);
        assert!(decision.allowed);
        let patch = decision.patch.unwrap();
        assert_eq!(patch[0].path, "/spec");
    }

    #[test]
    fn unknown_kind_is_admitted_unchanged() {
        let decision = decide("CronJob", json!({ "metadata": {} }));
        assert!(decision.allowed);
        assert!(decision.patch.is_none());
    }

    #[test]
    fn mutator_output_round_trips_through_the_decision() {
        use engine::workload::WorkloadObject;

        // Annotate a typed deployment with the engine-side mutator, then
        // feed the serialized object through the webhook decision.
        let mut resource =
            WorkloadObject::decode("Deployment", deployment(json!({}), "app")).unwrap();
        DebugAnnotations::new("app", &["/bin/server".to_string()], 4000)
            .apply(&mut resource)
            .unwrap();
        let raw = match resource {
            WorkloadObject::Deployment(d) => serde_json::to_value(d).unwrap(),
            _ => unreachable!(),
        };

        let decision = decide("Deployment", raw);
        assert!(decision.allowed);
        let patch = decision.patch.unwrap();
        let mount = &patch[0].value.as_ref().unwrap()["containers"][0]["volumeMounts"][0];
        assert_eq!(mount["mountPath"], mount["subPath"]);
        assert_eq!(mount["mountPath"], json!(ENTRYPOINT_SCRIPT_PATH));
    }
}
