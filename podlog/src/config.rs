//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{
    env, io,
    net::SocketAddr,
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use podlog_payload::{Target, template::DEFAULT_IMAGE};
use serde::Deserialize;
use tracing::{debug, error};

use crate::{admission::Policy as AdmissionPolicy, run::FailurePolicy};

/// Location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Environment variable that, when set, holds the configuration contents in
/// place of [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_ENV_VAR: &str = "PODLOG_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

fn default_namespace_prefix() -> String {
    "logger-ns".to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_max_deletion_polls() -> NonZeroU32 {
    NonZeroU32::new(300).expect("default max deletion polls given was 0")
}

/// Main configuration struct for this program
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to the kubeconfig used for cluster credentials. When absent the
    /// client infers its configuration from `KUBECONFIG`, `~/.kube/config` or
    /// the in-cluster service account, in that order.
    #[serde(default)]
    pub kubeconfig_path: Option<PathBuf>,
    /// Number of namespaces pods are spread across
    pub num_k8s_namespaces: NonZeroU32,
    /// Width of every generated log line, in bytes
    pub bytes_per_log_line: NonZeroU32,
    /// Log volume written by each pod, in kilobytes
    pub kilobytes_per_pod_log: NonZeroU32,
    /// Total log volume the run aims for, in megabytes
    pub megabytes_total_log_size: u32,
    /// Length of the run window
    pub run_duration_minutes: u32,
    /// Prefix of every namespace name. An empty prefix means the default.
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
    /// Maximum pod creation requests in flight at once
    pub concurrent_requests: NonZeroU32,
    /// The seed for random operations. Drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<[u8; 32]>,
    /// Container image of the logging pods
    #[serde(default = "default_image")]
    pub image: String,
    /// How many times to check for a deleted namespace to disappear before
    /// giving up
    #[serde(default = "default_max_deletion_polls")]
    pub max_deletion_polls: NonZeroU32,
    /// What to do when a single pod fails to be created
    #[serde(default)]
    pub on_pod_failure: FailurePolicy,
    /// How batches are admitted
    #[serde(default)]
    pub admission: AdmissionPolicy,
    /// Address to bind the prometheus exporter to, if any
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Config {
    /// Parse a [`Config`] from YAML.
    ///
    /// # Errors
    ///
    /// Function will error if `contents` is not valid YAML or does not
    /// describe a valid configuration.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let mut config: Config = serde_yaml::from_str(contents).map_err(|err| {
            error!("Configuration validation failed: {err}");
            Error::SerdeYaml(err)
        })?;
        if config.namespace_prefix.is_empty() {
            config.namespace_prefix = default_namespace_prefix();
        }
        Ok(config)
    }

    /// Load a [`Config`], preferring the contents of [`CONFIG_ENV_VAR`] over
    /// the file at `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or its contents do not
    /// parse.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = if let Ok(env_var_value) = env::var(CONFIG_ENV_VAR) {
            debug!("Using config from env var '{CONFIG_ENV_VAR}'");
            env_var_value
        } else {
            debug!("Attempting to open configuration file at: {}", path.display());
            std::fs::read_to_string(path).map_err(|source| {
                error!("Could not read config file '{}': {source}", path.display());
                Error::ReadFile {
                    path: path.to_path_buf(),
                    source: Box::new(source),
                }
            })?
        };
        Self::parse(&contents)
    }

    /// The run target implied by the configured sizes.
    #[must_use]
    pub fn target(&self) -> Target {
        Target::resolve(
            self.bytes_per_log_line,
            self.kilobytes_per_pod_log,
            self.megabytes_total_log_size,
        )
    }

    /// Length of the run window.
    #[must_use]
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.run_duration_minutes) * 60)
    }
}
