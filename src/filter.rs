// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Relevance filter for registry image stream tags.
//!
//! The registry holds far more tags than CI ever consumes. Before a tag is fanned out
//! to the build clusters, the filter decides whether anything needs it. Rules are
//! evaluated in order and the first match wins:
//!
//! 1. Explicit tag allow-list
//! 2. Explicit namespace allow-list
//! 3. Config index, exact tag key (`namespace/name:tag`)
//! 4. Explicit stream allow-list, then config index stream key (`imagestream_namespace/name`)
//! 5. Outstanding [`TestImageStreamTagImport`] requests on any cluster
//!
//! Anything else is rejected. All lookups go against in-memory caches.

use crate::config_index::{test_input_index_keys, ConfigIndex, IndexError, INDEX_NAME};
use crate::constants::IMAGE_STREAM_INDEX_KEY_PREFIX;
use crate::crd::TestImageStreamTagImport;
use crate::routing::ImageReference;
use kube::runtime::reflector::Store;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::error;

/// Decides whether an image stream tag is relevant.
pub trait TagFilter: Send + Sync {
    fn accepts(&self, image: &ImageReference) -> bool;
}

/// Source of outstanding speculative import requests.
pub trait PendingImportSource: Send + Sync {
    /// Whether a request exists for tag `name` (`stream:tag`) in `namespace`.
    fn has_pending_import(&self, namespace: &str, name: &str) -> bool;
}

impl PendingImportSource for Store<TestImageStreamTagImport> {
    fn has_pending_import(&self, namespace: &str, name: &str) -> bool {
        self.state()
            .iter()
            .any(|request| request.spec.refers_to(namespace, name))
    }
}

/// Accepts tags listed verbatim as `namespace/name:tag`.
pub struct TagAllowList(pub HashSet<String>);

impl TagFilter for TagAllowList {
    fn accepts(&self, image: &ImageReference) -> bool {
        self.0.contains(&image.to_string())
    }
}

/// Accepts every tag in the listed namespaces.
pub struct NamespaceAllowList(pub HashSet<String>);

impl TagFilter for NamespaceAllowList {
    fn accepts(&self, image: &ImageReference) -> bool {
        self.0.contains(&image.namespace)
    }
}

/// Accepts every tag of streams listed as `namespace/name`.
pub struct StreamAllowList(pub HashSet<String>);

impl TagFilter for StreamAllowList {
    fn accepts(&self, image: &ImageReference) -> bool {
        self.0.contains(&image.stream_key())
    }
}

/// Which config index key an [`IndexLookup`] queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKeyKind {
    /// `namespace/name:tag`
    Tag,
    /// `imagestream_namespace/name`
    Stream,
}

/// Accepts tags that at least one indexed configuration refers to.
pub struct IndexLookup {
    index: Arc<dyn ConfigIndex>,
    kind: IndexKeyKind,
}

impl IndexLookup {
    #[must_use]
    pub fn new(index: Arc<dyn ConfigIndex>, kind: IndexKeyKind) -> Self {
        Self { index, kind }
    }

    fn key(&self, image: &ImageReference) -> String {
        match self.kind {
            IndexKeyKind::Tag => image.to_string(),
            IndexKeyKind::Stream => format!("{IMAGE_STREAM_INDEX_KEY_PREFIX}{}", image.stream_key()),
        }
    }
}

impl TagFilter for IndexLookup {
    fn accepts(&self, image: &ImageReference) -> bool {
        let key = self.key(image);
        match self.index.get_from_index(INDEX_NAME, &key) {
            Ok(configs) => !configs.is_empty(),
            Err(e) => {
                error!(key = %key, error = %e, "Failed to get configs from index");
                false
            }
        }
    }
}

/// Accepts tags that a speculative import request on any cluster refers to.
pub struct PendingImports(pub Vec<Arc<dyn PendingImportSource>>);

impl TagFilter for PendingImports {
    fn accepts(&self, image: &ImageReference) -> bool {
        let name = image.tag_name();
        self.0
            .iter()
            .any(|source| source.has_pending_import(&image.namespace, &name))
    }
}

/// Accepts if any rule accepts, evaluating rules in order.
pub struct FirstMatch(pub Vec<Box<dyn TagFilter>>);

impl TagFilter for FirstMatch {
    fn accepts(&self, image: &ImageReference) -> bool {
        self.0.iter().any(|rule| rule.accepts(image))
    }
}

/// Explicit allow-lists, in the formats of the corresponding filter rules.
#[derive(Clone, Debug, Default)]
pub struct AllowLists {
    pub tags: HashSet<String>,
    pub namespaces: HashSet<String>,
    pub streams: HashSet<String>,
}

/// Register the test input index.
///
/// Subscribers to [`INDEX_NAME`] receive the current contents as deltas during this
/// call, so they must already be draining their channels.
///
/// # Errors
///
/// Returns an error if the index is already registered.
pub async fn register_test_input_index(index: &dyn ConfigIndex) -> Result<(), IndexError> {
    index
        .add_index(INDEX_NAME, Arc::new(test_input_index_keys))
        .await
}

/// Assemble the filter rules in precedence order.
///
/// Index lookups reject everything until [`register_test_input_index`] has run.
#[must_use]
pub fn test_input_filter(
    allow: AllowLists,
    index: Arc<dyn ConfigIndex>,
    pending: Vec<Arc<dyn PendingImportSource>>,
) -> FirstMatch {
    FirstMatch(vec![
        Box::new(TagAllowList(allow.tags)),
        Box::new(NamespaceAllowList(allow.namespaces)),
        Box::new(IndexLookup::new(index.clone(), IndexKeyKind::Tag)),
        Box::new(StreamAllowList(allow.streams)),
        Box::new(IndexLookup::new(index, IndexKeyKind::Stream)),
        Box::new(PendingImports(pending)),
    ])
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod filter_tests;
