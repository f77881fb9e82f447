//! Typed Kubernetes access for the orchestration flow.
//!
//! [`ClusterApi`] wraps a `kube::Client` for one namespace and exposes the
//! handful of operations the engine needs: workload CRUD, pod listing, and
//! the exec / port-forward streaming subresources.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, AttachParams, AttachedProcess, ListParams, Portforwarder, PostParams};
use kube::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::workload::{WorkloadKind, WorkloadLookup, WorkloadObject};

/// Namespaced cluster client used by the whole debug flow.
#[derive(Clone)]
pub struct ClusterApi {
    client: Client,
    namespace: String,
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

impl ClusterApi {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying client, for cluster-scoped resources.
    #[must_use]
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn get_typed<K>(&self, kind: WorkloadKind, name: &str) -> Result<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        api.get(name).await.map_err(|e| {
            if is_not_found(&e) {
                Error::ResourceNotFound {
                    kind: kind.as_str().to_string(),
                    namespace: self.namespace.clone(),
                    name: name.to_string(),
                }
            } else {
                Error::Kube(e)
            }
        })
    }

    pub async fn get_pod(&self, name: &str) -> Result<Pod> {
        self.get_typed(WorkloadKind::Pod, name).await
    }

    /// Fetch a workload object of a known kind.
    pub async fn get_workload(&self, kind: WorkloadKind, name: &str) -> Result<WorkloadObject> {
        Ok(match kind {
            WorkloadKind::Deployment => {
                WorkloadObject::Deployment(self.get_typed::<Deployment>(kind, name).await?)
            }
            WorkloadKind::StatefulSet => {
                WorkloadObject::StatefulSet(self.get_typed::<StatefulSet>(kind, name).await?)
            }
            WorkloadKind::DaemonSet => {
                WorkloadObject::DaemonSet(self.get_typed::<DaemonSet>(kind, name).await?)
            }
            WorkloadKind::ReplicaSet => {
                WorkloadObject::ReplicaSet(self.get_typed::<ReplicaSet>(kind, name).await?)
            }
            WorkloadKind::Pod => WorkloadObject::Pod(self.get_typed::<Pod>(kind, name).await?),
        })
    }

    /// Replace a workload object on the cluster. This is the update the
    /// admission webhook intercepts.
    pub async fn update_workload(&self, resource: &WorkloadObject) -> Result<WorkloadObject> {
        let pp = PostParams::default();
        let name = resource.name().to_string();
        debug!(kind = %resource.kind(), name = %name, "updating workload");
        Ok(match resource {
            WorkloadObject::Deployment(o) => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
                WorkloadObject::Deployment(api.replace(&name, &pp, o).await?)
            }
            WorkloadObject::StatefulSet(o) => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
                WorkloadObject::StatefulSet(api.replace(&name, &pp, o).await?)
            }
            WorkloadObject::DaemonSet(o) => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &self.namespace);
                WorkloadObject::DaemonSet(api.replace(&name, &pp, o).await?)
            }
            WorkloadObject::ReplicaSet(o) => {
                let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), &self.namespace);
                WorkloadObject::ReplicaSet(api.replace(&name, &pp, o).await?)
            }
            WorkloadObject::Pod(o) => {
                WorkloadObject::Pod(self.pods().replace(&name, &pp, o).await?)
            }
        })
    }

    /// List pods matching a label query, capped at `limit` results.
    pub async fn list_pods(&self, label_query: &str, limit: u32) -> Result<Vec<Pod>> {
        let lp = ListParams::default().labels(label_query).limit(limit);
        let list = self.pods().list(&lp).await?;
        Ok(list.items)
    }

    pub async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_maps().get_opt(name).await?)
    }

    pub async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        Ok(self
            .config_maps()
            .create(&PostParams::default(), config_map)
            .await?)
    }

    /// Run a command in a container and collect its stdout, waiting for the
    /// stream to finish.
    pub async fn exec_capture(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String> {
        let ap = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(false);
        let mut attached = self.pods().exec(pod, command, &ap).await?;
        let mut stdout = attached
            .stdout()
            .ok_or_else(|| Error::Stream("exec did not provide a stdout stream".to_string()))?;
        let mut buf = Vec::new();
        stdout
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;
        attached
            .join()
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| Error::Stream(e.to_string()))
    }

    /// Run a command in a container with the given bytes piped to stdin, and
    /// wait for completion. Used to deliver script payloads.
    pub async fn exec_with_stdin(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
        input: &[u8],
    ) -> Result<()> {
        let ap = AttachParams::default()
            .container(container)
            .stdin(true)
            .stdout(false)
            .stderr(false);
        let mut attached = self.pods().exec(pod, command, &ap).await?;
        let mut stdin = attached
            .stdin()
            .ok_or_else(|| Error::Stream("exec did not provide a stdin stream".to_string()))?;
        stdin
            .write_all(input)
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| Error::Stream(e.to_string()))?;
        drop(stdin);
        attached
            .join()
            .await
            .map_err(|e| Error::Stream(e.to_string()))
    }

    /// Start a command in a container and hand back the attached process so
    /// the caller can watch its output.
    pub async fn exec_streamed(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<AttachedProcess> {
        let ap = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(false);
        Ok(self.pods().exec(pod, command, &ap).await?)
    }

    /// Open the port-forward subresource for one remote port.
    pub async fn portforward(&self, pod: &str, port: u16) -> Result<Portforwarder> {
        Ok(self.pods().portforward(pod, &[port]).await?)
    }
}

#[async_trait::async_trait]
impl WorkloadLookup for ClusterApi {
    async fn get(&self, kind: WorkloadKind, name: &str) -> Result<WorkloadObject> {
        self.get_workload(kind, name).await
    }
}
