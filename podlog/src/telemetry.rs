//! Metrics labelling and export.
//!
//! ## Metrics
//!
//! `namespaces_created`: Namespaces provisioned at run start
//! `live_pods`: Non-terminal pods observed across all namespaces, last cycle
//! `admission_deferred`: Cycles where a batch was not admitted
//! `batches_dispatched`: Batches sent
//! `pods_created`: Pods accepted by the cluster
//! `pod_creation_failure`: Pods the cluster refused
//!

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Builder for consistent metric labels across components
#[derive(Debug)]
pub struct MetricsBuilder {
    labels: Vec<(String, String)>,
}

impl MetricsBuilder {
    /// Create a new metrics builder with standard component labels
    #[must_use]
    pub fn new(component_name: &str) -> Self {
        Self {
            labels: vec![
                ("component".to_string(), "podlog".to_string()),
                ("component_name".to_string(), component_name.to_string()),
            ],
        }
    }

    /// Build the final label vector
    #[must_use]
    pub fn build(self) -> Vec<(String, String)> {
        self.labels
    }
}

/// Install the prometheus recorder and its HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Function will error if the recorder cannot be installed, for instance when
/// another global recorder is already present or `addr` cannot be bound.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("Prometheus exporter listening on {addr}");
    Ok(())
}
