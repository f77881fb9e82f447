//! The reserved-annotation protocol.
//!
//! Debug intent is encoded as exactly four reserved annotations on a
//! workload's pod-template metadata. The CLI side writes them
//! ([`DebugAnnotations::apply`]); the admission webhook decodes them
//! ([`DebugAnnotations::from_annotations`]) and injects the debug entrypoint
//! into the pod spec ([`DebugAnnotations::inject`]). Presence of all four
//! keys is the sole trigger for webhook mutation.

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, PodSpec, Volume, VolumeMount,
};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::workload::WorkloadObject;

/// Annotation carrying the name of the container to rewrite.
pub const TARGET_CONTAINER: &str = "podtap.dev/target-container";
/// Annotation carrying the in-container entrypoint script path.
pub const ENTRYPOINT_PATH: &str = "podtap.dev/entrypoint-path";
/// Annotation carrying the space-separated debugger arguments.
pub const ARGUMENT_STRING: &str = "podtap.dev/argument-string";
/// Annotation carrying the config map holding the entrypoint script.
pub const CONFIG_MAP_NAME: &str = "podtap.dev/config-map-name";

/// Fixed path the entrypoint script is mounted at.
pub const ENTRYPOINT_SCRIPT_PATH: &str = "/podtap-entrypoint.sh";
/// Fixed name of the config map holding the entrypoint script.
pub const ENTRYPOINT_CONFIG_MAP: &str = "podtap-entrypoint";

/// The decoded form of the four reserved annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugAnnotations {
    pub target_container: String,
    pub entrypoint_path: String,
    pub argument_string: String,
    pub config_map_name: String,
}

impl DebugAnnotations {
    /// Build the annotation set for a debug session: the entrypoint receives
    /// the remote debug port followed by the original command line.
    #[must_use]
    pub fn new(container: &str, process_command: &[String], debug_port: u16) -> Self {
        Self {
            target_container: container.to_string(),
            entrypoint_path: ENTRYPOINT_SCRIPT_PATH.to_string(),
            argument_string: format!("{debug_port} {}", process_command.join(" ")),
            config_map_name: ENTRYPOINT_CONFIG_MAP.to_string(),
        }
    }

    /// Decode the protocol from an annotation map. Returns `None` unless all
    /// four reserved keys are present.
    #[must_use]
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            target_container: annotations.get(TARGET_CONTAINER)?.clone(),
            entrypoint_path: annotations.get(ENTRYPOINT_PATH)?.clone(),
            argument_string: annotations.get(ARGUMENT_STRING)?.clone(),
            config_map_name: annotations.get(CONFIG_MAP_NAME)?.clone(),
        })
    }

    /// Write the four reserved annotations onto the workload's pod-template
    /// metadata (pod metadata for bare pods). Pure with respect to the
    /// cluster: no API calls happen here.
    pub fn apply(&self, resource: &mut WorkloadObject) -> Result<()> {
        let meta = resource.template_metadata_mut()?;
        let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(TARGET_CONTAINER.to_string(), self.target_container.clone());
        annotations.insert(ENTRYPOINT_PATH.to_string(), self.entrypoint_path.clone());
        annotations.insert(ARGUMENT_STRING.to_string(), self.argument_string.clone());
        annotations.insert(CONFIG_MAP_NAME.to_string(), self.config_map_name.clone());
        Ok(())
    }

    /// Rewrite a pod spec to launch the target container under the debug
    /// entrypoint. Fails closed when the named container is absent.
    ///
    /// The entrypoint script is mounted read-only from the named config map
    /// at the entrypoint path (mount path = sub-path = entrypoint path).
    pub fn inject(&self, spec: &mut PodSpec) -> Result<()> {
        let container = spec
            .containers
            .iter_mut()
            .find(|c| c.name == self.target_container)
            .ok_or_else(|| Error::MissingContainer {
                container: self.target_container.clone(),
            })?;

        container.command = Some(vec![self.entrypoint_path.clone()]);
        container.args = Some(
            self.argument_string
                .split(' ')
                .map(str::to_string)
                .collect(),
        );
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: self.config_map_name.clone(),
                read_only: Some(true),
                mount_path: self.entrypoint_path.clone(),
                sub_path: Some(self.entrypoint_path.clone()),
                ..Default::default()
            });

        spec.volumes.get_or_insert_with(Vec::new).push(Volume {
            name: self.config_map_name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.config_map_name.clone(),
                default_mode: Some(0o755),
                optional: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });

        Ok(())
    }
}
