// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for speculative image imports.
//!
//! # Resource Types
//!
//! - [`TestImageStreamTagImport`] - A request to make an image stream tag available on
//!   a specific build cluster, even if the tag does not exist on the registry yet
//!
//! CI tooling creates one of these when a job is about to run against an image that is
//! still being published (for example the output of a not-yet-merged commit). The
//! request stays around after the first attempt, so a later push of that tag on the
//! registry is still recognised as relevant and gets distributed.
//!
//! # Example
//!
//! ```rust
//! use image_distributor::crd::TestImageStreamTagImportSpec;
//!
//! let spec = TestImageStreamTagImportSpec {
//!     cluster_name: "build01".to_string(),
//!     namespace: "ocp".to_string(),
//!     name: "4.16:cli".to_string(),
//! };
//! assert_eq!(spec.image().unwrap().tag, "cli");
//! ```

use crate::routing::{ImageReference, RoutingKey, RoutingKeyError};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `TestImageStreamTagImport` requests an image stream tag on one build cluster.
///
/// # Example
///
/// ```yaml
/// apiVersion: ci.openshift.io/v1
/// kind: TestImageStreamTagImport
/// metadata:
///   name: build01-ocp-4.16-cli
///   namespace: ci
/// spec:
///   clusterName: build01
///   namespace: ocp
///   name: "4.16:cli"
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "ci.openshift.io",
    version = "v1",
    kind = "TestImageStreamTagImport",
    namespaced,
    doc = "TestImageStreamTagImport requests that an image stream tag from the registry cluster is imported into a build cluster, including tags that do not exist yet."
)]
#[serde(rename_all = "camelCase")]
pub struct TestImageStreamTagImportSpec {
    /// Build cluster the image is needed on.
    pub cluster_name: String,

    /// Namespace of the image stream on the registry cluster.
    pub namespace: String,

    /// Image stream tag name, `stream:tag`.
    #[schemars(regex(pattern = r"^[^:]+:[^:]+$"))]
    pub name: String,
}

impl TestImageStreamTagImportSpec {
    /// The image reference this request is about.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not of the form `stream:tag`.
    pub fn image(&self) -> Result<ImageReference, RoutingKeyError> {
        ImageReference::from_tag_name(&self.namespace, &self.name)
    }

    /// Whether this request refers to the image stream tag `namespace/name`.
    #[must_use]
    pub fn refers_to(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }

    /// Routing key for the requested cluster.
    #[must_use]
    pub fn routing_key(&self) -> RoutingKey {
        RoutingKey::new(&self.cluster_name, &self.namespace, &self.name)
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
