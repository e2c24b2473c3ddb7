// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-cluster image stream tag reconciliation.
//!
//! For one [`RoutingKey`] the reconciler makes the target cluster's copy of an image
//! stream tag point at the same digest as the registry's copy. Every step is
//! idempotent, so a partially applied run is completed by the next attempt:
//!
//! 1. Resolve the target cluster client. Unknown clusters are terminal.
//! 2. Read the source image stream tag from the registry. A missing tag means the
//!    source was deleted and there is nothing to do.
//! 3. Read the source image stream for release annotations.
//! 4. Rewrite the registry-relative pull spec to the public registry domain.
//! 5. Skip pull specs from forbidden registries.
//! 6. Ensure the target namespace, RBAC and image stream shell.
//! 7. Stop if the target tag already points at the source digest.
//! 8. Ensure the pull secret, unless the namespace manages its own.
//! 9. Create the synchronous `ImageStreamImport` and record the outcome.

use crate::client::{ClusterClient, ClusterObject};
use crate::errors::{swallow_if_terminal, DistributorError};
use crate::image_api::{ImageStream, ImageStreamImport, ImageStreamTag, ImportOutcome};
use crate::metrics::ImportMetrics;
use crate::resources::{
    ensure_namespace, image_manager_role, image_manager_role_binding, image_stream_shell,
    pull_secret, upsert,
};
use crate::routing::{ImageReference, RoutingKey};
use crate::settings::{SecretReference, Settings};
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// State reached by a successful reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The source tag does not exist on the registry
    SourceMissing,
    /// The pull spec points at a forbidden registry
    Forbidden,
    /// The target already points at the source digest
    Current,
    /// The image was imported into the target
    Imported {
        digest: String,
    },
    /// The import was logged instead of performed
    DryRun,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceMissing => write!(f, "SourceMissing"),
            Self::Forbidden => write!(f, "Forbidden"),
            Self::Current => write!(f, "Current"),
            Self::Imported { digest } => write!(f, "Imported({digest})"),
            Self::DryRun => write!(f, "DryRun"),
        }
    }
}

/// Static reconciler configuration, extracted from [`Settings`].
#[derive(Clone, Debug, Default)]
pub struct ReconcilerConfig {
    pub registry_public_domain: String,
    pub internal_registry_hosts: Vec<String>,
    pub forbidden_registries: Vec<String>,
    pub pull_secret_source: SecretReference,
    pub self_managed_namespaces: HashSet<String>,
    pub dry_run: bool,
}

impl From<&Settings> for ReconcilerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            registry_public_domain: settings.registry_public_domain.clone(),
            internal_registry_hosts: settings.internal_registry_hosts.clone(),
            forbidden_registries: settings.forbidden_registries.clone(),
            pull_secret_source: settings.pull_secret_source.clone(),
            self_managed_namespaces: settings.self_managed_namespaces.iter().cloned().collect(),
            dry_run: settings.dry_run,
        }
    }
}

impl ReconcilerConfig {
    /// Rewrite a registry-relative image reference to the public registry domain.
    ///
    /// References that do not start with a configured internal host are returned as-is.
    #[must_use]
    pub fn public_pull_spec(&self, reference: &str) -> String {
        for host in &self.internal_registry_hosts {
            if let Some(path) = reference.strip_prefix(host.as_str()) {
                if path.starts_with('/') {
                    return format!("{}{path}", self.registry_public_domain);
                }
            }
        }
        reference.to_string()
    }

    /// The forbidden registry prefix `pull_spec` matches, if any.
    ///
    /// A prefix matches only up to a path boundary, so `registry.example.com` does not
    /// match `registry.example.com.mirror.io/ns/name`.
    #[must_use]
    pub fn forbidden_prefix(&self, pull_spec: &str) -> Option<&str> {
        self.forbidden_registries
            .iter()
            .find(|prefix| {
                pull_spec.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                    rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/')
                })
            })
            .map(String::as_str)
    }
}

/// Reconciles routing keys against the registry and the build clusters.
pub struct Reconciler<C> {
    registry: C,
    build_clusters: HashMap<String, C>,
    config: ReconcilerConfig,
    metrics: Arc<dyn ImportMetrics>,
}

impl<C: ClusterClient> Reconciler<C> {
    /// `build_clusters` is keyed by cluster name and is never modified afterwards.
    #[must_use]
    pub fn new(
        registry: C,
        build_clusters: HashMap<String, C>,
        config: ReconcilerConfig,
        metrics: Arc<dyn ImportMetrics>,
    ) -> Self {
        Self {
            registry,
            build_clusters,
            config,
            metrics,
        }
    }

    /// Reconcile one key, logging terminal errors instead of returning them.
    ///
    /// Retriable errors are logged by the work queue when it requeues the key.
    ///
    /// # Errors
    ///
    /// Returns retriable errors so the work queue requeues the key.
    pub async fn process(&self, key: RoutingKey) -> Result<(), DistributorError> {
        info!(
            cluster = %key.cluster,
            namespace = %key.namespace,
            name = %key.name,
            "Reconciling image stream tag"
        );

        let result = self.reconcile(&key).await;
        if let Ok(outcome) = &result {
            info!(
                cluster = %key.cluster,
                namespace = %key.namespace,
                name = %key.name,
                outcome = %outcome,
                "Finished reconciling image stream tag"
            );
        }

        swallow_if_terminal(&key, result.map(|_| ()))
    }

    /// Bring the target cluster's copy of the tag up to date with the registry.
    ///
    /// # Errors
    ///
    /// Returns [`DistributorError::UnknownCluster`] or [`DistributorError::MalformedKey`]
    /// for keys that can never succeed, and retriable errors for everything else.
    pub async fn reconcile(&self, key: &RoutingKey) -> Result<Outcome, DistributorError> {
        let target = self
            .build_clusters
            .get(&key.cluster)
            .ok_or_else(|| DistributorError::UnknownCluster {
                cluster: key.cluster.clone(),
            })?;
        let image = key.image()?;
        let tag_name = image.tag_name();

        let Some(source_tag) = read::<ImageStreamTag>(&self.registry, &image.namespace, &tag_name)
            .await?
        else {
            debug!(
                cluster = %key.cluster,
                namespace = %image.namespace,
                name = %tag_name,
                "Source image stream tag not found"
            );
            return Ok(Outcome::SourceMissing);
        };

        let source_digest = source_tag
            .digest()
            .ok_or_else(|| self.missing_field::<ImageStreamTag>(&image, "image.metadata.name"))?
            .to_string();
        if source_tag.docker_image_reference().is_empty() {
            return Err(self.missing_field::<ImageStreamTag>(&image, "image.dockerImageReference"));
        }

        let source_stream = read::<ImageStream>(&self.registry, &image.namespace, &image.name)
            .await?
            .unwrap_or_else(|| ImageStream::shell(&image.namespace, &image.name));

        let pull_spec = self
            .config
            .public_pull_spec(source_tag.docker_image_reference());
        if let Some(prefix) = self.config.forbidden_prefix(&pull_spec) {
            debug!(
                cluster = %key.cluster,
                namespace = %image.namespace,
                name = %tag_name,
                pull_spec = %pull_spec,
                prefix = %prefix,
                "Pull spec matches a forbidden registry"
            );
            return Ok(Outcome::Forbidden);
        }

        ensure_namespace(target, &image.namespace).await?;
        let (role, mutate_role) = image_manager_role(&image.namespace);
        upsert(target, role, mutate_role).await?;
        let (binding, mutate_binding) = image_manager_role_binding(&image.namespace);
        upsert(target, binding, mutate_binding).await?;
        let (stream, mutate_stream) =
            image_stream_shell(&image.namespace, &image.name, &source_stream);
        upsert(target, stream, mutate_stream).await?;

        let target_tag = read::<ImageStreamTag>(target, &image.namespace, &tag_name).await?;
        if target_tag.as_ref().and_then(ImageStreamTag::digest) == Some(source_digest.as_str()) {
            debug!(
                cluster = %key.cluster,
                namespace = %image.namespace,
                name = %tag_name,
                digest = %source_digest,
                "Image stream tag is current"
            );
            return Ok(Outcome::Current);
        }

        if !self.config.self_managed_namespaces.contains(&image.namespace) {
            self.ensure_pull_secret(target, &image.namespace).await?;
        }

        self.import(target, &image, &pull_spec).await
    }

    async fn ensure_pull_secret(&self, target: &C, namespace: &str) -> Result<(), DistributorError> {
        let source = &self.config.pull_secret_source;
        let secret = read::<Secret>(target, &source.namespace, &source.name)
            .await?
            .unwrap_or_default();
        let (skeleton, mutate) =
            pull_secret(namespace, &secret).ok_or_else(|| DistributorError::MissingField {
                kind: Secret::kind(&()).to_string(),
                namespace: source.namespace.clone(),
                name: source.name.clone(),
                cluster: target.cluster().to_string(),
                field: "data[.dockerconfigjson]",
            })?;
        upsert(target, skeleton, mutate).await?;
        Ok(())
    }

    async fn import(
        &self,
        target: &C,
        image: &ImageReference,
        pull_spec: &str,
    ) -> Result<Outcome, DistributorError> {
        let cluster = target.cluster();
        let request = ImageStreamImport::for_tag(image, pull_spec);

        if self.config.dry_run {
            match serde_json::to_string(&request) {
                Ok(serialized) => info!(
                    cluster = %cluster,
                    image_stream_import = %serialized,
                    "Not creating ImageStreamImport because dry-run is enabled"
                ),
                Err(e) => error!(error = %e, "Failed to serialize ImageStreamImport"),
            }
            self.metrics.record_import(cluster, &image.namespace, true);
            return Ok(Outcome::DryRun);
        }

        let response = match target.create(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_import(cluster, &image.namespace, false);
                return Err(DistributorError::api::<ImageStreamImport>(
                    "create",
                    cluster,
                    Some(&image.namespace),
                    &image.name,
                    e,
                ));
            }
        };

        match response.outcome() {
            ImportOutcome::Imported(digest) => {
                self.metrics.record_import(cluster, &image.namespace, true);
                debug!(
                    cluster = %cluster,
                    namespace = %image.namespace,
                    name = %image.tag_name(),
                    digest = %digest,
                    "Imported successfully"
                );
                Ok(Outcome::Imported { digest })
            }
            ImportOutcome::Failed { reason, message } => {
                self.metrics.record_import(cluster, &image.namespace, false);
                Err(DistributorError::ImportFailed { reason, message })
            }
        }
    }

    fn missing_field<K: Resource<DynamicType = ()>>(
        &self,
        image: &ImageReference,
        field: &'static str,
    ) -> DistributorError {
        DistributorError::MissingField {
            kind: K::kind(&()).to_string(),
            namespace: image.namespace.clone(),
            name: image.tag_name(),
            cluster: self.registry.cluster().to_string(),
            field,
        }
    }
}

async fn read<K: ClusterObject>(
    client: &impl ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<Option<K>, DistributorError> {
    client
        .get(Some(namespace), name)
        .await
        .map_err(|e| DistributorError::api::<K>("get", client.cluster(), Some(namespace), name, e))
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod reconciler_tests;
