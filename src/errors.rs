// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation error types.
//!
//! Errors fall into two classes:
//!
//! - **Terminal** errors ([`DistributorError::is_terminal`]) are caused by a work item
//!   that can never succeed: the target cluster is unknown or the key is malformed.
//!   They are logged once and dropped.
//! - Everything else is **retriable**: API failures, conflicts, failed imports. These
//!   are returned to the work queue, which requeues the key with backoff.
//!
//! Benign outcomes (source deleted, target current, forbidden registry) are not errors
//! at all; see [`crate::reconciler::Outcome`].

use crate::routing::{RoutingKey, RoutingKeyError};
use kube::Resource;
use thiserror::Error;
use tracing::error;

/// Errors returned by the reconciler.
#[derive(Error, Debug)]
pub enum DistributorError {
    /// The routing key names a cluster that has no configured client
    #[error("unknown cluster {cluster:?}")]
    UnknownCluster {
        /// The cluster named in the key
        cluster: String,
    },

    /// The routing key could not be decoded or parsed
    #[error("malformed routing key: {0}")]
    MalformedKey(#[from] RoutingKeyError),

    /// A Kubernetes API call failed
    #[error("failed to {operation} {kind} {namespace}/{name} in cluster {cluster}: {source}")]
    Api {
        /// Verb that failed (`get`, `create`, `replace`)
        operation: &'static str,
        /// Resource kind
        kind: String,
        /// Object namespace, empty for cluster-scoped objects
        namespace: String,
        /// Object name
        name: String,
        /// Cluster the call was made against
        cluster: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },

    /// An object read from a cluster is missing a field the reconciler needs
    #[error("{kind} {namespace}/{name} in cluster {cluster} has no {field}")]
    MissingField {
        /// Resource kind
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// Cluster the object was read from
        cluster: String,
        /// Field that was expected to be set
        field: &'static str,
    },

    /// The import request completed but did not produce an image
    #[error("imageStreamImport did not succeed: reason: {reason}, message: {message}")]
    ImportFailed {
        /// Reason reported by the API server
        reason: String,
        /// Message reported by the API server
        message: String,
    },

    /// An object could not be converted to or from its JSON representation
    #[error("failed to serialize {kind}: {source}")]
    Serialization {
        /// Resource kind
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

impl DistributorError {
    /// Wrap a client error with the identity of the object the call was about.
    #[must_use]
    pub fn api<K: Resource<DynamicType = ()>>(
        operation: &'static str,
        cluster: &str,
        namespace: Option<&str>,
        name: &str,
        source: kube::Error,
    ) -> Self {
        Self::Api {
            operation,
            kind: K::kind(&()).to_string(),
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
            cluster: cluster.to_string(),
            source,
        }
    }

    /// Whether retrying the same work item can never succeed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::UnknownCluster { .. } | Self::MalformedKey(_))
    }
}

/// Convert a terminal error into success after logging it.
///
/// Retriable errors and successes pass through unchanged.
///
/// # Errors
///
/// Returns the original error if it is not terminal.
pub fn swallow_if_terminal<T: Default>(
    key: &RoutingKey,
    result: Result<T, DistributorError>,
) -> Result<T, DistributorError> {
    match result {
        Err(err) if err.is_terminal() => {
            error!(key = %key, error = %err, "Terminal error, not requeueing");
            Ok(T::default())
        }
        other => other,
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
