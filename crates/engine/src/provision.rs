//! One-time cluster provisioning for the relaunch flow.
//!
//! The webhook-injected entrypoint script lives in a config map, alongside
//! the PEM certificate/key material the admission service terminates TLS
//! with. Certificate generation itself is a collaborator behind
//! [`CertificateSource`]; this module only places the bytes.

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use tracing::info;

use crate::annotations::{ENTRYPOINT_CONFIG_MAP, ENTRYPOINT_SCRIPT_PATH};
use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::scripts;

/// Name of the mutating webhook configuration and of the webhook service.
pub const WEBHOOK_NAME: &str = "podtap-webhook";

/// Binary config-map entries holding the webhook's TLS material.
pub const TLS_CERT_KEY: &str = "webhook-tls-cert";
pub const TLS_KEY_KEY: &str = "webhook-tls-key";

/// Supplies PEM-encoded certificate/key material. Generation is out of
/// band; the engine only consumes the bytes.
pub trait CertificateSource {
    fn certificate_pem(&self) -> anyhow::Result<Vec<u8>>;
    fn private_key_pem(&self) -> anyhow::Result<Vec<u8>>;
}

/// Reads PEM files from disk.
pub struct FileCertificateSource {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
}

impl CertificateSource for FileCertificateSource {
    fn certificate_pem(&self) -> anyhow::Result<Vec<u8>> {
        Ok(std::fs::read(&self.cert_path)?)
    }

    fn private_key_pem(&self) -> anyhow::Result<Vec<u8>> {
        Ok(std::fs::read(&self.key_path)?)
    }
}

/// Config-map key of the entrypoint script (the mount projects it at
/// [`ENTRYPOINT_SCRIPT_PATH`]).
#[must_use]
pub fn entrypoint_key() -> &'static str {
    ENTRYPOINT_SCRIPT_PATH.trim_start_matches('/')
}

/// Idempotently create the entrypoint config map: script text plus the PEM
/// cert/key pair as binary entries. An existing map is left untouched.
pub async fn ensure_entrypoint_config_map(
    cluster: &ClusterApi,
    certs: &dyn CertificateSource,
) -> Result<()> {
    if cluster.get_config_map(ENTRYPOINT_CONFIG_MAP).await?.is_some() {
        return Ok(());
    }

    let cert = certs
        .certificate_pem()
        .map_err(|e| crate::error::Error::Stream(format!("certificate source failed: {e}")))?;
    let key = certs
        .private_key_pem()
        .map_err(|e| crate::error::Error::Stream(format!("certificate source failed: {e}")))?;

    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(ENTRYPOINT_CONFIG_MAP.to_string()),
            namespace: Some(cluster.namespace().to_string()),
            ..Default::default()
        },
        immutable: Some(false),
        data: Some(
            [(entrypoint_key().to_string(), scripts::entrypoint_script())]
                .into_iter()
                .collect(),
        ),
        binary_data: Some(
            [
                (TLS_CERT_KEY.to_string(), ByteString(cert)),
                (TLS_KEY_KEY.to_string(), ByteString(key)),
            ]
            .into_iter()
            .collect(),
        ),
    };
    cluster.create_config_map(&config_map).await?;
    info!(name = ENTRYPOINT_CONFIG_MAP, "created entrypoint config map");
    Ok(())
}

/// Create or replace the mutating webhook configuration pointing at the
/// admission service, with the CA bundle used to validate its certificate.
pub async fn ensure_webhook_config(cluster: &ClusterApi, ca_bundle_pem: Vec<u8>) -> Result<()> {
    let api: Api<MutatingWebhookConfiguration> = Api::all(cluster.client());

    let mut config = MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(WEBHOOK_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: format!("mutate.{WEBHOOK_NAME}.podtap.dev"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            client_config: WebhookClientConfig {
                ca_bundle: Some(ByteString(ca_bundle_pem)),
                service: Some(ServiceReference {
                    name: WEBHOOK_NAME.to_string(),
                    namespace: cluster.namespace().to_string(),
                    path: Some("/mutate".to_string()),
                    port: Some(443),
                }),
                url: None,
            },
            rules: Some(vec![RuleWithOperations {
                api_groups: Some(vec!["apps".to_string(), String::new()]),
                api_versions: Some(vec!["v1".to_string()]),
                operations: Some(vec!["UPDATE".to_string()]),
                resources: Some(vec![
                    "deployments".to_string(),
                    "statefulsets".to_string(),
                    "daemonsets".to_string(),
                    "replicasets".to_string(),
                    "pods".to_string(),
                ]),
                scope: Some("Namespaced".to_string()),
            }]),
            ..Default::default()
        }]),
    };

    match api.get_opt(WEBHOOK_NAME).await? {
        Some(existing) => {
            config.metadata.resource_version = existing.metadata.resource_version;
            api.replace(WEBHOOK_NAME, &PostParams::default(), &config)
                .await?;
            info!(name = WEBHOOK_NAME, "replaced webhook configuration");
        }
        None => {
            api.create(&PostParams::default(), &config).await?;
            info!(name = WEBHOOK_NAME, "created webhook configuration");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entrypoint_key_is_a_valid_config_map_key() {
        let key = entrypoint_key();
        assert!(!key.contains('/'));
        assert_eq!(format!("/{key}"), ENTRYPOINT_SCRIPT_PATH);
    }
}
