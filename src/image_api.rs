// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! OpenShift image API types (`image.openshift.io/v1`).
//!
//! `k8s-openapi` only ships upstream Kubernetes types, so the handful of image API
//! resources this controller touches are modelled here and wired into `kube` through
//! manual [`Resource`] implementations. Only the fields the controller reads or owns
//! are typed; everything else is carried through `other` maps so a read-modify-replace
//! cycle never drops fields written by other actors.
//!
//! # Resource Types
//!
//! - [`ImageStream`] - A set of tags pointing at content-addressed images
//! - [`ImageStreamTag`] - A single tag of an image stream, resolved to an [`Image`]
//! - [`ImageStreamImport`] - A virtual, create-only resource; creating it pulls the
//!   requested images synchronously and reports the outcome in the response

use crate::constants::{DOCKER_IMAGE_KIND, IMAGE_API_GROUP, IMAGE_API_VERSION};
use crate::routing::ImageReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{NamespaceResourceScope, TypeMeta};
use kube::Resource;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Reference policy that makes the target cluster serve the image from its own registry
pub const REFERENCE_POLICY_LOCAL: &str = "Local";

/// Import mode that keeps manifest lists intact
pub const IMPORT_MODE_PRESERVE_ORIGINAL: &str = "PreserveOriginal";

macro_rules! image_resource {
    ($type:ident, $kind:literal, $plural:literal) => {
        impl Resource for $type {
            type DynamicType = ();
            type Scope = NamespaceResourceScope;

            fn kind(_: &()) -> Cow<'_, str> {
                Cow::Borrowed($kind)
            }

            fn group(_: &()) -> Cow<'_, str> {
                Cow::Borrowed(IMAGE_API_GROUP)
            }

            fn version(_: &()) -> Cow<'_, str> {
                Cow::Borrowed(IMAGE_API_VERSION)
            }

            fn plural(_: &()) -> Cow<'_, str> {
                Cow::Borrowed($plural)
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

/// `apiVersion` and `kind` for an image API object.
fn type_meta<K: Resource<DynamicType = ()>>() -> TypeMeta {
    TypeMeta {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
    }
}

// ============================================================================
// ImageStream
// ============================================================================

/// An image stream: a named set of tags, each tracking a history of images.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStream {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ImageStreamSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ImageStreamStatus>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamSpec {
    /// Whether pods in the namespace may reference tags of this stream by short name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_policy: Option<ImageLookupPolicy>,

    /// Fields not owned by this controller (`tags`, `dockerImageRepository`, ...)
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageLookupPolicy {
    pub local: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image_repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_docker_image_repository: Option<String>,

    /// Tags that have been resolved to at least one image
    #[serde(default)]
    pub tags: Vec<NamedTagEventList>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamedTagEventList {
    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub items: Vec<TagEvent>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default)]
    pub docker_image_reference: String,

    /// Digest of the image
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub generation: i64,
}

image_resource!(ImageStream, "ImageStream", "imagestreams");

impl ImageStream {
    /// An image stream with only identity set.
    #[must_use]
    pub fn shell(namespace: &str, name: &str) -> Self {
        Self {
            types: Some(type_meta::<Self>()),
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Names of all tags recorded in the stream status, in status order.
    ///
    /// Entries with an empty name are returned as-is; callers decide how to treat them.
    #[must_use]
    pub fn recorded_tags(&self) -> Vec<&str> {
        self.status
            .as_ref()
            .map(|status| status.tags.iter().map(|t| t.tag.as_str()).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// ImageStreamTag / Image
// ============================================================================

/// A single tag of an image stream, named `stream:tag`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamTag {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    #[serde(default)]
    pub metadata: ObjectMeta,

    /// The image the tag currently points at
    #[serde(default)]
    pub image: Image,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

image_resource!(ImageStreamTag, "ImageStreamTag", "imagestreamtags");

impl ImageStreamTag {
    /// Content digest of the image this tag points at, if resolved.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.image.metadata.name.as_deref().filter(|d| !d.is_empty())
    }

    /// Registry-relative pull reference of the image this tag points at.
    #[must_use]
    pub fn docker_image_reference(&self) -> &str {
        &self.image.docker_image_reference
    }
}

/// Image metadata. `metadata.name` is the content digest.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub docker_image_reference: String,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

// ============================================================================
// ImageStreamImport
// ============================================================================

/// Request to import external images into an image stream.
///
/// The API server performs the import while handling the create call and returns the
/// populated status in the response; nothing is persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamImport {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ImageStreamImportSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ImageStreamImportStatus>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamImportSpec {
    /// Persist the imported images into the target stream
    pub import: bool,

    #[serde(default)]
    pub images: Vec<ImageImportSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageImportSpec {
    pub from: ObjectReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<LocalObjectReference>,

    #[serde(default)]
    pub reference_policy: TagReferencePolicy,

    #[serde(default)]
    pub import_policy: TagImportPolicy,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagReferencePolicy {
    #[serde(rename = "type", default)]
    pub type_: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagImportPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamImportStatus {
    #[serde(default)]
    pub images: Vec<ImageImportStatus>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageImportStatus {
    #[serde(default)]
    pub status: ImportResultStatus,

    /// Populated only when the import succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// The `metav1.Status` reported for a single image import.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportResultStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

image_resource!(ImageStreamImport, "ImageStreamImport", "imagestreamimports");

/// Result of a synchronous import as reported by the API server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The image was imported and now resolves to this digest
    Imported(String),
    /// The import did not produce an image
    Failed {
        /// Machine-readable reason, possibly empty
        reason: String,
        /// Human-readable message, possibly empty
        message: String,
    },
}

impl ImageStreamImport {
    /// Import `pull_spec` into the tag referenced by `image`.
    #[must_use]
    pub fn for_tag(image: &ImageReference, pull_spec: &str) -> Self {
        Self {
            types: Some(type_meta::<Self>()),
            metadata: ObjectMeta {
                namespace: Some(image.namespace.clone()),
                name: Some(image.name.clone()),
                ..Default::default()
            },
            spec: ImageStreamImportSpec {
                import: true,
                images: vec![ImageImportSpec {
                    from: ObjectReference {
                        kind: DOCKER_IMAGE_KIND.to_string(),
                        name: pull_spec.to_string(),
                    },
                    to: Some(LocalObjectReference {
                        name: image.tag.clone(),
                    }),
                    reference_policy: TagReferencePolicy {
                        type_: REFERENCE_POLICY_LOCAL.to_string(),
                    },
                    import_policy: TagImportPolicy {
                        import_mode: Some(IMPORT_MODE_PRESERVE_ORIGINAL.to_string()),
                        ..Default::default()
                    },
                }],
            },
            status: None,
        }
    }

    /// Interpret the status returned from the create call.
    ///
    /// A missing status is treated as a failure with empty reason and message.
    #[must_use]
    pub fn outcome(&self) -> ImportOutcome {
        let first = self.status.as_ref().and_then(|s| s.images.first());
        let digest = first
            .and_then(|i| i.image.as_ref())
            .and_then(|image| image.metadata.name.clone())
            .filter(|d| !d.is_empty());

        match (digest, first) {
            (Some(digest), _) => ImportOutcome::Imported(digest),
            (None, Some(status)) => ImportOutcome::Failed {
                reason: status.status.reason.clone().unwrap_or_default(),
                message: status.status.message.clone().unwrap_or_default(),
            },
            (None, None) => ImportOutcome::Failed {
                reason: String::new(),
                message: String::new(),
            },
        }
    }
}

#[cfg(test)]
#[path = "image_api_tests.rs"]
mod image_api_tests;
