// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Routing keys for multi-cluster fan-out.
//!
//! A single registry-side image stream tag is imported into every build cluster, so
//! each unit of work carries both the target cluster and the image reference. The work
//! queue is keyed on the native [`RoutingKey`] struct; the delimiter-based two-field
//! encoding ([`EncodedKey`]) is kept for log output and for interoperating with
//! consumers that only understand a single namespace/name pair.
//!
//! # Wire format
//!
//! ```text
//! namespace field: {cluster}_{imageNamespace}
//! name field:      {stream}:{tag}
//! ```
//!
//! # Example
//!
//! ```rust
//! use image_distributor::routing::{decode, encode};
//!
//! let key = encode("build01", "ocp", "4.16:cli");
//! assert_eq!(key.namespace, "build01_ocp");
//!
//! let (cluster, namespace, name) = decode(&key).unwrap();
//! assert_eq!((cluster.as_str(), namespace.as_str(), name.as_str()), ("build01", "ocp", "4.16:cli"));
//! ```

use crate::constants::{CLUSTER_NAMESPACE_DELIMITER, STREAM_TAG_DELIMITER};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while encoding, decoding or parsing routing keys.
///
/// All of these indicate a programming or configuration error; none is recoverable
/// by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingKeyError {
    /// The namespace field did not split into exactly a cluster and a namespace
    #[error("didn't get two but {segments} segments when trying to extract cluster and namespace from {namespace:?}")]
    SegmentCount {
        /// The namespace field that was decoded
        namespace: String,
        /// Number of segments found
        segments: usize,
    },

    /// The name field did not split into exactly a stream name and a tag
    #[error("splitting image stream tag name {name:?} by ':' did not yield two but {segments} results")]
    TagName {
        /// The name field that was parsed
        name: String,
        /// Number of segments found
        segments: usize,
    },

    /// An identifier contains the routing delimiter and would be misrouted
    #[error("identifier {value:?} must not contain the routing delimiter '_'")]
    ContainsDelimiter {
        /// The offending identifier
        value: String,
    },

    /// An identifier is empty
    #[error("identifier must not be empty")]
    Empty,
}

/// A namespaced reference to a single image stream tag, `namespace/name:tag`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageReference {
    /// Namespace of the image stream
    pub namespace: String,
    /// Name of the image stream
    pub name: String,
    /// Tag within the image stream
    pub tag: String,
}

impl ImageReference {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Parse an image stream tag object name (`stream:tag`) within a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingKeyError::TagName`] unless the name splits into exactly two parts.
    pub fn from_tag_name(namespace: &str, tag_name: &str) -> Result<Self, RoutingKeyError> {
        let parts: Vec<&str> = tag_name.split(STREAM_TAG_DELIMITER).collect();
        match parts.as_slice() {
            [name, tag] => Ok(Self::new(namespace, *name, *tag)),
            _ => Err(RoutingKeyError::TagName {
                name: tag_name.to_string(),
                segments: parts.len(),
            }),
        }
    }

    /// The image stream tag object name, `stream:tag`.
    #[must_use]
    pub fn tag_name(&self) -> String {
        format!("{}{STREAM_TAG_DELIMITER}{}", self.name, self.tag)
    }

    /// The image stream this tag belongs to, `namespace/stream`.
    #[must_use]
    pub fn stream_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{STREAM_TAG_DELIMITER}{}",
            self.namespace, self.name, self.tag
        )
    }
}

/// Work item identifying one image stream tag on one target cluster.
///
/// `name` carries the image stream tag object name (`stream:tag`) verbatim; it is only
/// parsed when the reconciler needs the stream and tag separately.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey {
    /// Target build cluster
    pub cluster: String,
    /// Image namespace, identical on the registry and the target cluster
    pub namespace: String,
    /// Image stream tag name, `stream:tag`
    pub name: String,
}

impl RoutingKey {
    #[must_use]
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key routing `image` to `cluster`.
    #[must_use]
    pub fn for_image(cluster: &str, image: &ImageReference) -> Self {
        Self::new(cluster, image.namespace.clone(), image.tag_name())
    }

    /// Split the name into stream and tag.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingKeyError::TagName`] if the name is not of the form `stream:tag`.
    pub fn image(&self) -> Result<ImageReference, RoutingKeyError> {
        ImageReference::from_tag_name(&self.namespace, &self.name)
    }

    /// Encode into the two-field wire format.
    #[must_use]
    pub fn encode(&self) -> EncodedKey {
        encode(&self.cluster, &self.namespace, &self.name)
    }

    /// Decode from the two-field wire format.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingKeyError::SegmentCount`] if the namespace field is malformed.
    pub fn decode(key: &EncodedKey) -> Result<Self, RoutingKeyError> {
        let (cluster, namespace, name) = decode(key)?;
        Ok(Self {
            cluster,
            namespace,
            name,
        })
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.encode().fmt(f)
    }
}

/// A routing key squeezed into a single namespace/name pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EncodedKey {
    /// `{cluster}_{namespace}`
    pub namespace: String,
    /// `{stream}:{tag}`
    pub name: String,
}

impl fmt::Display for EncodedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Encode a (cluster, namespace, name) triple.
///
/// Callers must ensure neither `cluster` nor `namespace` contains the delimiter; see
/// [`validate_identifier`].
#[must_use]
pub fn encode(cluster: &str, namespace: &str, name: &str) -> EncodedKey {
    EncodedKey {
        namespace: format!("{cluster}{CLUSTER_NAMESPACE_DELIMITER}{namespace}"),
        name: name.to_string(),
    }
}

/// Decode an encoded key back into (cluster, namespace, name).
///
/// # Errors
///
/// Returns [`RoutingKeyError::SegmentCount`] if the namespace field does not split into
/// exactly two segments.
pub fn decode(key: &EncodedKey) -> Result<(String, String, String), RoutingKeyError> {
    let segments: Vec<&str> = key.namespace.split(CLUSTER_NAMESPACE_DELIMITER).collect();
    match segments.as_slice() {
        [cluster, namespace] => Ok((
            (*cluster).to_string(),
            (*namespace).to_string(),
            key.name.clone(),
        )),
        _ => Err(RoutingKeyError::SegmentCount {
            namespace: key.namespace.clone(),
            segments: segments.len(),
        }),
    }
}

/// Check that an identifier can safely be embedded in an encoded routing key.
///
/// # Errors
///
/// Returns an error if the identifier is empty or contains the delimiter.
pub fn validate_identifier(value: &str) -> Result<(), RoutingKeyError> {
    if value.is_empty() {
        return Err(RoutingKeyError::Empty);
    }
    if value.contains(CLUSTER_NAMESPACE_DELIMITER) {
        return Err(RoutingKeyError::ContainsDelimiter {
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod routing_tests;
