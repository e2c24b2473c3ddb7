// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller wiring.
//!
//! [`run`] connects the event sources to the single reconciliation worker:
//!
//! ```text
//! registry ImageStream watch ──┐
//! config index deltas ─────────┼─> FanOut ─> WorkQueue ─> Reconciler ─> build clusters
//! TestImageStreamTagImport ────┘
//!   watches (build clusters)
//! ```
//!
//! Start-up order matters. Registering the test input index delivers the current index
//! contents to subscribers through a bounded channel, so the worker and the delta
//! forwarder are running before the index is registered, and the registry watch starts
//! only once the filter can see the registered index.

use crate::client::{ClusterClient, KubeClusterClient};
use crate::config_index::{ConfigIndex, IndexDelta, INDEX_NAME};
use crate::crd::TestImageStreamTagImport;
use crate::fanout::FanOut;
use crate::filter::{register_test_input_index, test_input_filter, PendingImportSource};
use crate::image_api::ImageStream;
use crate::metrics::ImportMetrics;
use crate::queue::WorkQueue;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::settings::Settings;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Run the image distribution controller until one of its tasks ends.
///
/// `ready` is set once the registry image stream cache has synced.
///
/// # Errors
///
/// Returns an error if the index cannot be registered or any task stops.
pub async fn run(
    settings: &Settings,
    registry: KubeClusterClient,
    build_clusters: Vec<KubeClusterClient>,
    index: Arc<dyn ConfigIndex>,
    metrics: Arc<dyn ImportMetrics>,
    ready: Arc<AtomicBool>,
) -> Result<()> {
    if build_clusters.is_empty() {
        anyhow::bail!("no build clusters configured");
    }

    let queue = WorkQueue::new(settings.queue_capacity);
    let clients: HashMap<String, KubeClusterClient> = build_clusters
        .iter()
        .map(|cluster| (cluster.cluster().to_string(), cluster.clone()))
        .collect();
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        clients,
        ReconcilerConfig::from(settings),
        metrics,
    ));

    let deltas = index.subscribe(INDEX_NAME);
    let (image_streams, image_stream_writer) = reflector::store::<ImageStream>();

    let mut pending: Vec<Arc<dyn PendingImportSource>> = Vec::new();
    let mut request_writers = Vec::new();
    for cluster in &build_clusters {
        let (reader, writer) = reflector::store::<TestImageStreamTagImport>();
        pending.push(Arc::new(reader));
        request_writers.push((cluster.clone(), writer));
    }

    let filter = test_input_filter(settings.allow_lists(), index.clone(), pending);
    let fan_out = Arc::new(
        FanOut::new(
            settings.build_cluster_names(),
            Arc::new(filter),
            queue.handle(),
        )
        .ignoring(settings.ignored_build_clusters.iter().cloned()),
    );

    let worker = queue.run(move |key| {
        let reconciler = reconciler.clone();
        async move { reconciler.process(key).await }
    });
    let worker = tokio::spawn(worker);
    let forwarder = tokio::spawn(forward_index_deltas(
        deltas,
        image_streams.clone(),
        fan_out.clone(),
    ));

    debug!(index = INDEX_NAME, "Registering config index");
    register_test_input_index(index.as_ref()).await?;

    let image_stream_watch = tokio::spawn(watch_image_streams(
        Api::all(registry.client().clone()),
        image_stream_writer,
        fan_out.clone(),
    ));

    let request_watches: Vec<BoxFuture<'static, Result<()>>> = request_writers
        .into_iter()
        .map(|(cluster, writer)| {
            watch_import_requests(
                cluster.cluster().to_string(),
                Api::all(cluster.client().clone()),
                writer,
                fan_out.clone(),
            )
            .boxed()
        })
        .collect();

    tokio::spawn(mark_ready(image_streams, ready));

    info!(
        registry = %registry.cluster(),
        build_clusters = build_clusters.len(),
        "Image distribution controller started"
    );

    // None of these should ever finish; if one does, the process exits
    tokio::select! {
        result = worker => {
            error!("CRITICAL: work queue worker exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("work queue worker exited unexpectedly without error")
        }
        result = forwarder => {
            error!("CRITICAL: index delta forwarder exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("index delta forwarder exited unexpectedly without error")
        }
        result = image_stream_watch => {
            error!("CRITICAL: image stream watch exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("image stream watch exited unexpectedly without error")
        }
        (result, _, _) = futures::future::select_all(request_watches) => {
            error!("CRITICAL: import request watch exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("import request watch exited unexpectedly without error")
        }
    }
}

/// Queue every relevant tag of each image stream the registry reports.
async fn watch_image_streams(
    api: Api<ImageStream>,
    writer: Writer<ImageStream>,
    fan_out: Arc<FanOut>,
) -> Result<()> {
    info!("Starting registry image stream watch");
    let mut events = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(stream) => {
                let queued = fan_out.on_image_stream(&stream).await?;
                if queued > 0 {
                    debug!(
                        namespace = stream.metadata.namespace.as_deref().unwrap_or_default(),
                        name = stream.metadata.name.as_deref().unwrap_or_default(),
                        queued,
                        "Queued image stream tags"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Image stream watch error"),
        }
    }
    Ok(())
}

/// Queue the image named by each speculative import request on `cluster`.
async fn watch_import_requests(
    cluster: String,
    api: Api<TestImageStreamTagImport>,
    writer: Writer<TestImageStreamTagImport>,
    fan_out: Arc<FanOut>,
) -> Result<()> {
    info!(cluster = %cluster, "Starting import request watch");
    let mut events = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(request) => {
                fan_out.on_import_request(&request).await?;
            }
            Err(e) => warn!(cluster = %cluster, error = %e, "Import request watch error"),
        }
    }
    Ok(())
}

/// Queue the images newly referenced by configuration changes.
async fn forward_index_deltas(
    mut deltas: mpsc::Receiver<IndexDelta>,
    image_streams: Store<ImageStream>,
    fan_out: Arc<FanOut>,
) -> Result<()> {
    while let Some(delta) = deltas.recv().await {
        let queued = fan_out.on_index_delta(&delta, &image_streams).await?;
        debug!(index_key = %delta.index_key, queued, "Forwarded index delta");
    }
    anyhow::bail!("config index subscription closed")
}

async fn mark_ready(image_streams: Store<ImageStream>, ready: Arc<AtomicBool>) {
    match image_streams.wait_until_ready().await {
        Ok(()) => {
            ready.store(true, Ordering::Relaxed);
            info!(
                image_streams = image_streams.state().len(),
                "Registry image stream cache synced"
            );
        }
        Err(e) => error!(error = %e, "Registry image stream cache was never populated"),
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
