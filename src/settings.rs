// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller configuration.
//!
//! Settings are read from a YAML file at start-up and validated before any client is
//! built. Cluster names end up inside routing keys, so names that would break the key
//! encoding are rejected here instead of misrouting work at runtime.
//!
//! # Example
//!
//! ```yaml
//! registryCluster:
//!   name: app.ci
//! buildClusters:
//!   - name: build01
//!     kubeconfig: /etc/build-farm-credentials/build01.kubeconfig
//!   - name: build02
//!     context: build02
//!   - name: build03
//! ignoredBuildClusters:
//!   - build03
//! registryPublicDomain: registry.ci.openshift.org
//! internalRegistryHosts:
//!   - image-registry.openshift-image-registry.svc:5000
//! forbiddenRegistries:
//!   - registry.build01.ci.openshift.org
//! additionalImageStreamNamespaces:
//!   - ci
//! ```

use crate::constants::{
    DEFAULT_METRICS_ADDRESS, DEFAULT_PULL_SECRET_SOURCE_NAMESPACE, DEFAULT_QUEUE_CAPACITY,
    PULL_SECRET_NAME,
};
use crate::filter::AllowLists;
use crate::routing::{validate_identifier, ImageReference, RoutingKeyError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while loading or validating settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid cluster name {name:?}: {source}")]
    ClusterName {
        name: String,
        #[source]
        source: RoutingKeyError,
    },

    #[error("cluster {0:?} is configured more than once")]
    DuplicateCluster(String),

    #[error("ignored cluster {0:?} is not a configured build cluster")]
    UnknownIgnoredCluster(String),

    #[error("additionalImageStreamTags entry {0:?} is not in namespace/name:tag format")]
    InvalidImageStreamTag(String),

    #[error("additionalImageStreams entry {0:?} is not in namespace/name format")]
    InvalidImageStream(String),

    #[error("at least one build cluster must be configured")]
    NoBuildClusters,

    #[error("registryPublicDomain must not be empty")]
    EmptyPublicDomain,

    #[error("queueCapacity must be greater than zero")]
    ZeroQueueCapacity,
}

/// How to reach one cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSettings {
    /// Cluster name used in routing keys, logs and metrics
    pub name: String,

    /// Path to a kubeconfig file; the default client configuration is used if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Secret that pull credentials are copied from, on each build cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
}

impl Default for SecretReference {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_PULL_SECRET_SOURCE_NAMESPACE.to_string(),
            name: PULL_SECRET_NAME.to_string(),
        }
    }
}

fn default_self_managed_namespaces() -> Vec<String> {
    vec![DEFAULT_PULL_SECRET_SOURCE_NAMESPACE.to_string()]
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_metrics_address() -> String {
    DEFAULT_METRICS_ADDRESS.to_string()
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Cluster holding the canonical image streams
    pub registry_cluster: ClusterSettings,

    /// Clusters images are distributed to
    #[serde(default)]
    pub build_clusters: Vec<ClusterSettings>,

    /// Build clusters that receive no images, such as clusters being retired
    #[serde(default)]
    pub ignored_build_clusters: Vec<String>,

    /// Public host of the registry, substituted for internal hosts in pull specs
    #[serde(default)]
    pub registry_public_domain: String,

    /// Registry hosts only reachable from inside the registry cluster
    #[serde(default)]
    pub internal_registry_hosts: Vec<String>,

    /// Pull spec prefixes that must never be imported
    #[serde(default)]
    pub forbidden_registries: Vec<String>,

    /// Tags distributed regardless of configuration, as `namespace/name:tag`
    #[serde(default)]
    pub additional_image_stream_tags: Vec<String>,

    /// Streams distributed regardless of configuration, as `namespace/name`
    #[serde(default)]
    pub additional_image_streams: Vec<String>,

    /// Namespaces distributed regardless of configuration
    #[serde(default)]
    pub additional_image_stream_namespaces: Vec<String>,

    #[serde(default)]
    pub pull_secret_source: SecretReference,

    /// Namespaces that own their pull credentials; no pull secret is created there
    #[serde(default = "default_self_managed_namespaces")]
    pub self_managed_namespaces: Vec<String>,

    /// Directory of CI configuration files to index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_config_dir: Option<PathBuf>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_metrics_address")]
    pub metrics_address: String,

    /// Log imports instead of performing them
    #[serde(default)]
    pub dry_run: bool,
}

impl Settings {
    /// Parse settings from YAML and validate them.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] or any validation error.
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self, SettingsError> {
        let settings: Self = serde_yaml::from_str(raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw, path)
    }

    /// Check the invariants the rest of the controller relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.build_clusters.is_empty() {
            return Err(SettingsError::NoBuildClusters);
        }

        let mut seen = HashSet::new();
        for cluster in std::iter::once(&self.registry_cluster).chain(&self.build_clusters) {
            validate_identifier(&cluster.name).map_err(|source| SettingsError::ClusterName {
                name: cluster.name.clone(),
                source,
            })?;
            if !seen.insert(cluster.name.as_str()) {
                return Err(SettingsError::DuplicateCluster(cluster.name.clone()));
            }
        }
        if let Some(unknown) = self
            .ignored_build_clusters
            .iter()
            .find(|name| !self.build_clusters.iter().any(|c| &c.name == *name))
        {
            return Err(SettingsError::UnknownIgnoredCluster(unknown.clone()));
        }

        for value in &self.additional_image_stream_tags {
            if !is_image_stream_tag(value) {
                return Err(SettingsError::InvalidImageStreamTag(value.clone()));
            }
        }
        for value in &self.additional_image_streams {
            if value.split('/').count() != 2 {
                return Err(SettingsError::InvalidImageStream(value.clone()));
            }
        }

        if self.registry_public_domain.is_empty() {
            return Err(SettingsError::EmptyPublicDomain);
        }
        if self.queue_capacity == 0 {
            return Err(SettingsError::ZeroQueueCapacity);
        }
        Ok(())
    }

    /// Names of the build clusters, in configuration order.
    #[must_use]
    pub fn build_cluster_names(&self) -> Vec<String> {
        self.build_clusters.iter().map(|c| c.name.clone()).collect()
    }

    /// Explicit allow-lists for the tag filter.
    #[must_use]
    pub fn allow_lists(&self) -> AllowLists {
        AllowLists {
            tags: self.additional_image_stream_tags.iter().cloned().collect(),
            namespaces: self
                .additional_image_stream_namespaces
                .iter()
                .cloned()
                .collect(),
            streams: self.additional_image_streams.iter().cloned().collect(),
        }
    }
}

/// Whether `value` is `namespace/name:tag`.
fn is_image_stream_tag(value: &str) -> bool {
    match value.split_once('/') {
        Some((namespace, tag_name)) if !tag_name.contains('/') => {
            ImageReference::from_tag_name(namespace, tag_name).is_ok()
        }
        _ => false,
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod settings_tests;
