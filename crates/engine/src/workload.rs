//! Typed workload objects and owner-chain resolution.
//!
//! Deployment, StatefulSet, DaemonSet, ReplicaSet and Pod each nest their pod
//! spec at an analogous but type-distinct path. Instead of reflecting over
//! heterogeneous objects, [`WorkloadObject`] is a closed tagged variant with
//! typed accessors for metadata, pod-template spec, readiness counter and
//! selector, and admission payloads are decoded through a small kind table.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta, OwnerReference,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};

/// The closed set of workload kinds the annotation protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    Pod,
}

impl WorkloadKind {
    /// Parse an owner-reference kind. Anything outside the closed set is
    /// `None` and must be treated as a fatal lookup error by callers.
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(Self::Deployment),
            "StatefulSet" => Some(Self::StatefulSet),
            "DaemonSet" => Some(Self::DaemonSet),
            "ReplicaSet" => Some(Self::ReplicaSet),
            "Pod" => Some(Self::Pod),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Pod => "Pod",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable reference to a resolved workload resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A workload object of one of the known kinds.
#[derive(Debug, Clone)]
pub enum WorkloadObject {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
    ReplicaSet(ReplicaSet),
    Pod(Pod),
}

type Decoder = fn(Value) -> serde_json::Result<WorkloadObject>;

/// Kind table used to decode admission payloads without reflective
/// path-walking.
const DECODERS: &[(&str, Decoder)] = &[
    ("Deployment", |v| {
        serde_json::from_value::<Deployment>(v).map(WorkloadObject::Deployment)
    }),
    ("StatefulSet", |v| {
        serde_json::from_value::<StatefulSet>(v).map(WorkloadObject::StatefulSet)
    }),
    ("DaemonSet", |v| {
        serde_json::from_value::<DaemonSet>(v).map(WorkloadObject::DaemonSet)
    }),
    ("ReplicaSet", |v| {
        serde_json::from_value::<ReplicaSet>(v).map(WorkloadObject::ReplicaSet)
    }),
    ("Pod", |v| serde_json::from_value::<Pod>(v).map(WorkloadObject::Pod)),
];

impl WorkloadObject {
    /// Decode a raw admission payload of the given kind.
    pub fn decode(kind: &str, raw: Value) -> Result<Self> {
        let decoder = DECODERS
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d)
            .ok_or_else(|| Error::UnknownOwnerKind {
                kind: kind.to_string(),
            })?;
        Ok(decoder(raw)?)
    }

    #[must_use]
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
            Self::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Self::Pod(_) => WorkloadKind::Pod,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Deployment(o) => &o.metadata,
            Self::StatefulSet(o) => &o.metadata,
            Self::DaemonSet(o) => &o.metadata,
            Self::ReplicaSet(o) => &o.metadata,
            Self::Pod(o) => &o.metadata,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Reference to this object, using `namespace` when the object carries
    /// none of its own.
    #[must_use]
    pub fn to_ref(&self, namespace: &str) -> WorkloadRef {
        WorkloadRef {
            kind: self.kind(),
            name: self.name().to_string(),
            namespace: self
                .metadata()
                .namespace
                .clone()
                .unwrap_or_else(|| namespace.to_string()),
        }
    }

    /// Mutable pod-template metadata: the template's metadata for
    /// controllers, the pod's own metadata for bare pods.
    pub fn template_metadata_mut(&mut self) -> Result<&mut ObjectMeta> {
        let missing = |kind: WorkloadKind, name: &str| Error::MissingPodTemplate {
            kind: kind.as_str().to_string(),
            name: name.to_string(),
        };
        match self {
            Self::Deployment(o) => {
                let name = o.metadata.name.clone().unwrap_or_default();
                let spec = o
                    .spec
                    .as_mut()
                    .ok_or_else(|| missing(WorkloadKind::Deployment, &name))?;
                Ok(spec.template.metadata.get_or_insert_with(ObjectMeta::default))
            }
            Self::StatefulSet(o) => {
                let name = o.metadata.name.clone().unwrap_or_default();
                let spec = o
                    .spec
                    .as_mut()
                    .ok_or_else(|| missing(WorkloadKind::StatefulSet, &name))?;
                Ok(spec.template.metadata.get_or_insert_with(ObjectMeta::default))
            }
            Self::DaemonSet(o) => {
                let name = o.metadata.name.clone().unwrap_or_default();
                let spec = o
                    .spec
                    .as_mut()
                    .ok_or_else(|| missing(WorkloadKind::DaemonSet, &name))?;
                Ok(spec.template.metadata.get_or_insert_with(ObjectMeta::default))
            }
            Self::ReplicaSet(o) => {
                let name = o.metadata.name.clone().unwrap_or_default();
                let template = o
                    .spec
                    .as_mut()
                    .and_then(|s| s.template.as_mut())
                    .ok_or_else(|| missing(WorkloadKind::ReplicaSet, &name))?;
                Ok(template.metadata.get_or_insert_with(ObjectMeta::default))
            }
            Self::Pod(o) => Ok(&mut o.metadata),
        }
    }

    /// Annotations on the pod template (pod metadata for bare pods).
    #[must_use]
    pub fn template_annotations(&self) -> Option<&BTreeMap<String, String>> {
        let meta = match self {
            Self::Deployment(o) => o.spec.as_ref()?.template.metadata.as_ref()?,
            Self::StatefulSet(o) => o.spec.as_ref()?.template.metadata.as_ref()?,
            Self::DaemonSet(o) => o.spec.as_ref()?.template.metadata.as_ref()?,
            Self::ReplicaSet(o) => o.spec.as_ref()?.template.as_ref()?.metadata.as_ref()?,
            Self::Pod(o) => &o.metadata,
        };
        meta.annotations.as_ref()
    }

    /// The embedded pod spec (the pod's own spec for bare pods).
    pub fn pod_spec(&self) -> Result<&PodSpec> {
        let missing = || Error::MissingPodTemplate {
            kind: self.kind().as_str().to_string(),
            name: self.name().to_string(),
        };
        match self {
            Self::Deployment(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .ok_or_else(missing),
            Self::StatefulSet(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .ok_or_else(missing),
            Self::DaemonSet(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .ok_or_else(missing),
            Self::ReplicaSet(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.template.as_ref())
                .and_then(|t| t.spec.as_ref())
                .ok_or_else(missing),
            Self::Pod(o) => o.spec.as_ref().ok_or_else(missing),
        }
    }

    /// JSON-Patch path of the pod spec inside this object.
    #[must_use]
    pub fn patch_path(&self) -> &'static str {
        match self {
            Self::Pod(_) => "/spec",
            _ => "/spec/template/spec",
        }
    }

    /// Readiness counter: ready-replica count, or available count for
    /// DaemonSets. Pods have no rollout to wait for and always report 1.
    #[must_use]
    pub fn ready_count(&self) -> i32 {
        match self {
            Self::Deployment(o) => o
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            Self::StatefulSet(o) => o
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            Self::DaemonSet(o) => o
                .status
                .as_ref()
                .map(|s| s.number_available.unwrap_or(0))
                .unwrap_or(0),
            Self::ReplicaSet(o) => o
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            Self::Pod(_) => 1,
        }
    }

    /// The controller's pod selector. Bare pods have none.
    #[must_use]
    pub fn selector(&self) -> Option<&LabelSelector> {
        match self {
            Self::Deployment(o) => o.spec.as_ref().map(|s| &s.selector),
            Self::StatefulSet(o) => o.spec.as_ref().map(|s| &s.selector),
            Self::DaemonSet(o) => o.spec.as_ref().map(|s| &s.selector),
            Self::ReplicaSet(o) => o.spec.as_ref().map(|s| &s.selector),
            Self::Pod(_) => None,
        }
    }
}

/// Convert a label selector into a label-query string for pod listing.
#[must_use]
pub fn selector_query(selector: &LabelSelector) -> String {
    let mut terms = Vec::new();
    if let Some(labels) = &selector.match_labels {
        for (k, v) in labels {
            terms.push(format!("{k}={v}"));
        }
    }
    if let Some(exprs) = &selector.match_expressions {
        for expr in exprs {
            terms.push(expression_term(expr));
        }
    }
    terms.join(",")
}

fn expression_term(expr: &LabelSelectorRequirement) -> String {
    let values = expr
        .values
        .as_deref()
        .unwrap_or_default()
        .join(",");
    match expr.operator.as_str() {
        "In" => format!("{} in ({values})", expr.key),
        "NotIn" => format!("{} notin ({values})", expr.key),
        "DoesNotExist" => format!("!{}", expr.key),
        // "Exists" and anything unrecognized degrade to a key-presence term.
        _ => expr.key.clone(),
    }
}

/// Lookup seam for owner-chain resolution, implemented by the cluster client
/// and by in-memory fixtures in tests.
#[async_trait::async_trait]
pub trait WorkloadLookup {
    async fn get(&self, kind: WorkloadKind, name: &str) -> Result<WorkloadObject>;
}

fn first_owner(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references.as_ref().and_then(|refs| refs.first())
}

/// Walk a pod's ownership chain to its controlling workload resource.
///
/// Deployment, StatefulSet and DaemonSet terminate the chain. A ReplicaSet
/// is transparent unless orphaned, in which case it is the root itself. A
/// pod without owner references is its own root, which signals "mutate the
/// pod directly, no rollout wait needed". Unknown owner kinds and ownership
/// cycles abort resolution before any mutation is performed.
pub async fn resolve_root<L: WorkloadLookup + Sync>(
    lookup: &L,
    pod: &Pod,
) -> Result<WorkloadObject> {
    let Some(owner) = first_owner(&pod.metadata) else {
        return Ok(WorkloadObject::Pod(pod.clone()));
    };

    let mut visited: HashSet<(WorkloadKind, String)> = HashSet::new();
    let mut next = owner.clone();
    loop {
        let kind = WorkloadKind::parse(&next.kind).ok_or_else(|| Error::UnknownOwnerKind {
            kind: next.kind.clone(),
        })?;
        if !visited.insert((kind, next.name.clone())) {
            return Err(Error::OwnershipCycle {
                kind: kind.as_str().to_string(),
                name: next.name.clone(),
            });
        }
        let owner_obj = lookup.get(kind, &next.name).await?;
        match kind {
            WorkloadKind::Deployment | WorkloadKind::StatefulSet | WorkloadKind::DaemonSet => {
                return Ok(owner_obj);
            }
            WorkloadKind::ReplicaSet => match first_owner(owner_obj.metadata()) {
                Some(parent) => next = parent.clone(),
                None => return Ok(owner_obj),
            },
            // Nothing in the closed set is owned by a Pod.
            WorkloadKind::Pod => {
                return Err(Error::UnknownOwnerKind {
                    kind: next.kind.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixtureLookup {
        objects: HashMap<(WorkloadKind, String), WorkloadObject>,
    }

    #[async_trait::async_trait]
    impl WorkloadLookup for FixtureLookup {
        async fn get(&self, kind: WorkloadKind, name: &str) -> Result<WorkloadObject> {
            self.objects
                .get(&(kind, name.to_string()))
                .cloned()
                .ok_or_else(|| Error::ResourceNotFound {
                    kind: kind.as_str().to_string(),
                    namespace: "default".to_string(),
                    name: name.to_string(),
                })
        }
    }

    fn meta(name: &str, owners: Vec<OwnerReference>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            owner_references: if owners.is_empty() { None } else { Some(owners) },
            ..Default::default()
        }
    }

    fn owner(kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            kind: kind.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn pod(owners: Vec<OwnerReference>) -> Pod {
        Pod {
            metadata: meta("target-pod", owners),
            ..Default::default()
        }
    }

    fn replica_set(name: &str, owners: Vec<OwnerReference>) -> WorkloadObject {
        WorkloadObject::ReplicaSet(ReplicaSet {
            metadata: meta(name, owners),
            ..Default::default()
        })
    }

    fn deployment(name: &str) -> WorkloadObject {
        WorkloadObject::Deployment(Deployment {
            metadata: meta(name, Vec::new()),
            ..Default::default()
        })
    }

    fn fixture(objects: Vec<WorkloadObject>) -> FixtureLookup {
        FixtureLookup {
            objects: objects
                .into_iter()
                .map(|o| ((o.kind(), o.name().to_string()), o))
                .collect(),
        }
    }

    #[tokio::test]
    async fn pod_without_owners_is_its_own_root() {
        let lookup = fixture(Vec::new());
        let root = resolve_root(&lookup, &pod(Vec::new())).await.unwrap();
        assert_eq!(root.kind(), WorkloadKind::Pod);
        assert_eq!(root.name(), "target-pod");
    }

    #[tokio::test]
    async fn replica_set_is_transparent() {
        let lookup = fixture(vec![
            replica_set("web-5d4f", vec![owner("Deployment", "web")]),
            deployment("web"),
        ]);
        let root = resolve_root(&lookup, &pod(vec![owner("ReplicaSet", "web-5d4f")]))
            .await
            .unwrap();
        assert_eq!(root.kind(), WorkloadKind::Deployment);
        assert_eq!(root.name(), "web");
    }

    #[tokio::test]
    async fn orphaned_replica_set_is_root() {
        let lookup = fixture(vec![replica_set("orphan", Vec::new())]);
        let root = resolve_root(&lookup, &pod(vec![owner("ReplicaSet", "orphan")]))
            .await
            .unwrap();
        assert_eq!(root.kind(), WorkloadKind::ReplicaSet);
        assert_eq!(root.name(), "orphan");
    }

    #[tokio::test]
    async fn stateful_set_terminates_chain() {
        let lookup = fixture(vec![WorkloadObject::StatefulSet(StatefulSet {
            metadata: meta("db", Vec::new()),
            ..Default::default()
        })]);
        let root = resolve_root(&lookup, &pod(vec![owner("StatefulSet", "db")]))
            .await
            .unwrap();
        assert_eq!(root.kind(), WorkloadKind::StatefulSet);
    }

    #[tokio::test]
    async fn unknown_owner_kind_is_fatal() {
        let lookup = fixture(Vec::new());
        let err = resolve_root(&lookup, &pod(vec![owner("CronJob", "tick")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOwnerKind { kind } if kind == "CronJob"));
    }

    #[tokio::test]
    async fn ownership_cycle_is_detected() {
        let lookup = fixture(vec![
            replica_set("a", vec![owner("ReplicaSet", "b")]),
            replica_set("b", vec![owner("ReplicaSet", "a")]),
        ]);
        let err = resolve_root(&lookup, &pod(vec![owner("ReplicaSet", "a")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OwnershipCycle { name, .. } if name == "a"));
    }

    #[test]
    fn decode_dispatches_on_kind() {
        let raw = serde_json::json!({
            "metadata": { "name": "web" },
            "spec": {
                "selector": { "matchLabels": { "app": "web" } },
                "template": { "spec": { "containers": [] } }
            }
        });
        let obj = WorkloadObject::decode("Deployment", raw).unwrap();
        assert_eq!(obj.kind(), WorkloadKind::Deployment);
        assert_eq!(obj.patch_path(), "/spec/template/spec");

        let err = WorkloadObject::decode("Job", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownOwnerKind { .. }));
    }

    #[test]
    fn selector_query_renders_labels_and_expressions() {
        let selector = LabelSelector {
            match_labels: Some(
                [("app".to_string(), "web".to_string())].into_iter().collect(),
            ),
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["backend".to_string(), "api".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
        };
        assert_eq!(
            selector_query(&selector),
            "app=web,tier in (backend,api),!canary"
        );
    }
}
