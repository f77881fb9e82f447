//! Rollout readiness coordination.
//!
//! After the mutated workload is written back, the webhook has already
//! rewritten its pod template server-side; the controller then has to
//! produce a fresh pod. [`await_rollout`] polls the workload's readiness
//! counter with capped exponential backoff until it reaches one, bounded by
//! an explicit deadline, then resolves the representative new pod through
//! the workload's selector. Bare-pod roots skip the wait: the mutation was
//! applied to the pod itself, so the same pod identity is reused.

use k8s_openapi::api::core::v1::Pod;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::error::{Error, Result};
use crate::workload::{selector_query, WorkloadObject, WorkloadRef};

/// Poll pacing for the readiness wait.
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// First delay between polls.
    pub initial_delay: Duration,
    /// Upper bound the doubling backoff is capped at.
    pub max_delay: Duration,
    /// Overall deadline; exceeding it yields a typed timeout error.
    pub deadline: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            deadline: Duration::from_secs(300),
        }
    }
}

/// Poll `ready_count` until it reports at least one ready replica, doubling
/// the delay between polls up to the cap. The probe's own errors abort the
/// wait immediately; running out of deadline is a typed outcome.
pub async fn wait_ready<F, Fut>(
    target: &WorkloadRef,
    config: &RolloutConfig,
    mut ready_count: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<i32>>,
{
    let started = Instant::now();
    let mut delay = config.initial_delay;
    loop {
        let count = ready_count().await?;
        if count >= 1 {
            debug!(target = %target, waited = ?started.elapsed(), "workload ready");
            return Ok(());
        }
        if started.elapsed() + delay > config.deadline {
            return Err(Error::RolloutTimeout {
                kind: target.kind.as_str().to_string(),
                name: target.name.clone(),
                waited: started.elapsed(),
            });
        }
        debug!(target = %target, ?delay, "workload not ready, backing off");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(config.max_delay);
    }
}

/// Wait for the mutated root to become ready and resolve the new pod.
pub async fn await_rollout(
    cluster: &ClusterApi,
    root: &WorkloadObject,
    config: &RolloutConfig,
) -> Result<Pod> {
    let target = root.to_ref(cluster.namespace());

    // The pod was mutated directly; there is no controller rollout to wait
    // for.
    if let WorkloadObject::Pod(pod) = root {
        return Ok(pod.clone());
    }

    wait_ready(&target, config, || async {
        let current = cluster.get_workload(target.kind, &target.name).await?;
        Ok(current.ready_count())
    })
    .await?;

    let current = cluster.get_workload(target.kind, &target.name).await?;
    let selector = current.selector().ok_or_else(|| Error::MissingPodTemplate {
        kind: target.kind.as_str().to_string(),
        name: target.name.clone(),
    })?;
    let query = selector_query(selector);

    let pods = cluster.list_pods(&query, 1).await?;
    let pod = pods.into_iter().next().ok_or_else(|| Error::ResourceNotFound {
        kind: "Pod".to_string(),
        namespace: target.namespace.clone(),
        name: format!("selector {query}"),
    })?;

    info!(
        target = %target,
        pod = pod.metadata.name.as_deref().unwrap_or_default(),
        "rollout produced new pod"
    );
    Ok(pod)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::WorkloadKind;
    use std::cell::RefCell;

    fn target() -> WorkloadRef {
        WorkloadRef {
            kind: WorkloadKind::Deployment,
            name: "web".to_string(),
            namespace: "default".to_string(),
        }
    }

    fn fast_config() -> RolloutConfig {
        RolloutConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn two_unready_polls_then_success() {
        let counts = RefCell::new(vec![0, 0, 1]);
        let polls = RefCell::new(0usize);

        wait_ready(&target(), &fast_config(), || {
            *polls.borrow_mut() += 1;
            let next = counts.borrow_mut().remove(0);
            async move { Ok(next) }
        })
        .await
        .unwrap();

        // Two polls observe an unready workload before the third succeeds.
        assert_eq!(*polls.borrow(), 3);
    }

    #[tokio::test]
    async fn deadline_yields_typed_timeout() {
        let config = RolloutConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            deadline: Duration::ZERO,
        };
        let err = wait_ready(&target(), &config, || async { Ok(0) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RolloutTimeout { name, .. } if name == "web"));
    }

    #[tokio::test]
    async fn probe_error_aborts_immediately() {
        let err = wait_ready(&target(), &fast_config(), || async {
            Err(Error::Stream("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }
}
