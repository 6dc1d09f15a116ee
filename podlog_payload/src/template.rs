//! Rendering of a workload unit into the pod submitted to the cluster.
//!
//! Each pod runs a single busybox-style container whose shell loop writes
//! `lines_per_unit` lines of `bytes_per_line` random alphanumerics to stdout
//! and then exits. The container runtime captures that output as the pod's
//! log, which is the volume podlog is trying to produce.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Container, Pod, PodSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use crate::Payload;

/// Default container image for generated pods.
pub const DEFAULT_IMAGE: &str = "busybox:1.36.1-uclibc";

const CONTAINER_NAME: &str = "logger-container";
const APP_LABEL: &str = "app";
const APP_LABEL_VALUE: &str = "k8s-pod-log-generator";
const LINES_LABEL: &str = "total_log_lines";

/// Name of the pod carrying `ordinal`.
#[must_use]
pub fn pod_name(ordinal: u64) -> String {
    format!("logger-pod-{ordinal}")
}

/// Builds pods from the run's invariant payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    image: String,
    payload: Payload,
}

impl Template {
    /// Create a new [`Template`]
    #[must_use]
    pub fn new(image: impl Into<String>, payload: Payload) -> Self {
        Self {
            image: image.into(),
            payload,
        }
    }

    /// The shell command run by the logging container.
    #[must_use]
    pub fn command(&self) -> String {
        format!(
            "for i in $(seq 1 {lines}); do cat /dev/urandom | tr -dc 'a-zA-Z0-9' | head -c {bytes}; echo; done",
            lines = self.payload.lines_per_unit,
            bytes = self.payload.bytes_per_line,
        )
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(APP_LABEL.to_string(), APP_LABEL_VALUE.to_string());
        labels.insert(
            LINES_LABEL.to_string(),
            self.payload.lines_per_unit.to_string(),
        );
        labels
    }

    /// Render the pod for the unit `ordinal` placed in `namespace`.
    #[must_use]
    pub fn pod(&self, ordinal: u64, namespace: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(pod_name(ordinal)),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: CONTAINER_NAME.to_string(),
                    image: Some(self.image.clone()),
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        self.command(),
                    ]),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;

    fn template() -> Template {
        Template::new(
            DEFAULT_IMAGE,
            Payload {
                lines_per_unit: 1024,
                bytes_per_line: NonZeroU32::new(10).expect("non-zero"),
            },
        )
    }

    #[test]
    fn command_embeds_payload() {
        assert_eq!(
            template().command(),
            "for i in $(seq 1 1024); do cat /dev/urandom | tr -dc 'a-zA-Z0-9' | head -c 10; echo; done"
        );
    }

    #[test]
    fn pod_is_named_and_placed() {
        let pod = template().pod(7, "logger-ns-2");
        assert_eq!(pod.metadata.name.as_deref(), Some("logger-pod-7"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("logger-ns-2"));

        let labels = pod.metadata.labels.expect("labels are set");
        assert_eq!(labels.len(), 2);
        assert_eq!(
            labels.get("app").map(String::as_str),
            Some("k8s-pod-log-generator")
        );
        assert_eq!(
            labels.get("total_log_lines").map(String::as_str),
            Some("1024")
        );
    }

    #[test]
    fn pod_runs_once() {
        let spec = template().pod(1, "ns").spec.expect("spec is set");
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers.len(), 1);

        let container = &spec.containers[0];
        assert_eq!(container.name, "logger-container");
        assert_eq!(container.image.as_deref(), Some(DEFAULT_IMAGE));
        let command = container.command.as_ref().expect("command is set");
        assert_eq!(command[0], "/bin/sh");
        assert_eq!(command[1], "-c");
        assert!(command[2].starts_with("for i in $(seq 1 1024)"));
    }
}
