// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fan-out of registry events into per-cluster work items.
//!
//! Three event sources feed the work queue:
//!
//! - **Registry image streams**: every recorded tag that passes the [`TagFilter`] is
//!   queued once per build cluster. Image stream tags cannot be watched directly, so
//!   the watch is on image streams.
//! - **Config index deltas**: when a configuration starts referencing an image, that
//!   image is queued for every build cluster even though nothing changed on the
//!   registry. Stream-level keys expand to every tag the stream currently has.
//! - **Speculative import requests**: each request queues its image for the one
//!   cluster it names.
//!
//! Ignored build clusters receive nothing from any of the three sources.

use crate::config_index::IndexDelta;
use crate::constants::IMAGE_STREAM_INDEX_KEY_PREFIX;
use crate::crd::TestImageStreamTagImport;
use crate::filter::TagFilter;
use crate::image_api::ImageStream;
use crate::queue::{QueueClosed, QueueHandle};
use crate::routing::{ImageReference, RoutingKey};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Lists the recorded tags of a registry image stream.
pub trait StreamTagLister: Send + Sync {
    fn tags(&self, namespace: &str, name: &str) -> Vec<String>;
}

impl StreamTagLister for Store<ImageStream> {
    fn tags(&self, namespace: &str, name: &str) -> Vec<String> {
        self.get(&ObjectRef::new(name).within(namespace))
            .map(|stream| stream.recorded_tags().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }
}

/// Turns registry events into routing keys and queues them.
pub struct FanOut {
    clusters: Vec<String>,
    ignored: HashSet<String>,
    filter: Arc<dyn TagFilter>,
    queue: QueueHandle,
}

impl FanOut {
    /// `clusters` are the build clusters images are distributed to.
    #[must_use]
    pub fn new(clusters: Vec<String>, filter: Arc<dyn TagFilter>, queue: QueueHandle) -> Self {
        let mut clusters = clusters;
        clusters.sort();
        clusters.dedup();
        Self {
            clusters,
            ignored: HashSet::new(),
            filter,
            queue,
        }
    }

    /// Stop distributing images to the `ignored` clusters.
    #[must_use]
    pub fn ignoring(mut self, ignored: impl IntoIterator<Item = String>) -> Self {
        self.ignored = ignored.into_iter().collect();
        let ignored = &self.ignored;
        self.clusters.retain(|cluster| !ignored.contains(cluster));
        self
    }

    /// Keys for every relevant tag of a registry image stream, per build cluster.
    #[must_use]
    pub fn keys_for_stream(&self, stream: &ImageStream) -> Vec<RoutingKey> {
        let namespace = stream.namespace().unwrap_or_default();
        let name = stream.name_any();

        let mut keys = Vec::new();
        for tag in stream.recorded_tags() {
            if tag.is_empty() {
                debug!(namespace = %namespace, name = %name, "Got image stream tag with empty name");
                continue;
            }
            let image = ImageReference::new(namespace.as_str(), name.as_str(), tag);
            if !self.filter.accepts(&image) {
                continue;
            }
            keys.extend(
                self.clusters
                    .iter()
                    .map(|cluster| RoutingKey::for_image(cluster, &image)),
            );
        }
        keys
    }

    /// Keys for the images newly referenced by an index delta, per build cluster.
    ///
    /// Deltas that only remove configurations produce nothing.
    #[must_use]
    pub fn keys_for_delta(&self, delta: &IndexDelta, lister: &dyn StreamTagLister) -> Vec<RoutingKey> {
        if delta.added.is_empty() {
            return Vec::new();
        }

        let images = match resolve_index_key(&delta.index_key, lister) {
            Ok(images) => images,
            Err(reason) => {
                error!(index_key = %delta.index_key, reason = %reason, "Failed to resolve index key");
                return Vec::new();
            }
        };

        let mut keys = Vec::new();
        for cluster in &self.clusters {
            keys.extend(images.iter().map(|image| RoutingKey::for_image(cluster, image)));
        }
        keys
    }

    /// Key for a speculative import request, if it names a known build cluster.
    #[must_use]
    pub fn key_for_import_request(&self, request: &TestImageStreamTagImport) -> Option<RoutingKey> {
        if self.ignored.contains(&request.spec.cluster_name) {
            debug!(
                request = %request.name_any(),
                cluster = %request.spec.cluster_name,
                "Import request names an ignored cluster"
            );
            return None;
        }
        if !self.clusters.contains(&request.spec.cluster_name) {
            warn!(
                request = %request.name_any(),
                cluster = %request.spec.cluster_name,
                "Import request names an unknown cluster"
            );
            return None;
        }
        Some(request.spec.routing_key())
    }

    /// Queue the keys for a registry image stream.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the worker has stopped.
    pub async fn on_image_stream(&self, stream: &ImageStream) -> Result<usize, QueueClosed> {
        self.enqueue_all(self.keys_for_stream(stream)).await
    }

    /// Queue the keys for an index delta.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the worker has stopped.
    pub async fn on_index_delta(
        &self,
        delta: &IndexDelta,
        lister: &dyn StreamTagLister,
    ) -> Result<usize, QueueClosed> {
        self.enqueue_all(self.keys_for_delta(delta, lister)).await
    }

    /// Queue the key for a speculative import request.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the worker has stopped.
    pub async fn on_import_request(
        &self,
        request: &TestImageStreamTagImport,
    ) -> Result<usize, QueueClosed> {
        self.enqueue_all(self.key_for_import_request(request).into_iter().collect())
            .await
    }

    async fn enqueue_all(&self, keys: Vec<RoutingKey>) -> Result<usize, QueueClosed> {
        let mut queued = 0;
        for key in keys {
            if self.queue.enqueue(key).await? {
                queued += 1;
            }
        }
        Ok(queued)
    }
}

/// Resolve an index key into the image stream tags it currently covers.
fn resolve_index_key(
    index_key: &str,
    lister: &dyn StreamTagLister,
) -> Result<Vec<ImageReference>, String> {
    if let Some(stream_key) = index_key.strip_prefix(IMAGE_STREAM_INDEX_KEY_PREFIX) {
        let (namespace, name) = stream_key
            .split_once('/')
            .ok_or_else(|| format!("stream key {stream_key:?} is not namespace/name"))?;
        return Ok(lister
            .tags(namespace, name)
            .into_iter()
            .filter(|tag| !tag.is_empty())
            .map(|tag| ImageReference::new(namespace, name, tag))
            .collect());
    }

    let (namespace, tag_name) = index_key
        .split_once('/')
        .ok_or_else(|| format!("tag key {index_key:?} is not namespace/name:tag"))?;
    ImageReference::from_tag_name(namespace, tag_name)
        .map(|image| vec![image])
        .map_err(|e| e.to_string())
}

#[cfg(test)]
#[path = "fanout_tests.rs"]
mod fanout_tests;
