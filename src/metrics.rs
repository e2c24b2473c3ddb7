// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the image distributor.
//!
//! Metrics are registered against a [`Registry`] owned by the process and handed to
//! the reconciler as an [`ImportMetrics`] trait object, so tests can observe counts
//! without touching global state.
//!
//! # Metrics
//!
//! - `test_images_distributor_imagestream_successful_import_count{cluster,namespace}`
//! - `test_images_distributor_imagestream_failed_import_count{cluster,namespace}`
//!
//! # Example
//!
//! ```rust
//! use image_distributor::metrics::{gather_metrics, ImportMetrics, PrometheusImportMetrics};
//! use prometheus::Registry;
//!
//! let registry = Registry::new();
//! let metrics = PrometheusImportMetrics::register(&registry).unwrap();
//! metrics.record_import("build01", "ocp", true);
//!
//! let text = gather_metrics(&registry).unwrap();
//! assert!(text.contains("test_images_distributor_imagestream_successful_import_count"));
//! ```

use crate::constants::CONTROLLER_NAME;
use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Records the outcome of image imports.
pub trait ImportMetrics: Send + Sync {
    /// Count one import attempt against `cluster` and `namespace`.
    fn record_import(&self, cluster: &str, namespace: &str, success: bool);
}

/// [`ImportMetrics`] backed by Prometheus counters.
#[derive(Clone)]
pub struct PrometheusImportMetrics {
    successful: CounterVec,
    failed: CounterVec,
}

impl PrometheusImportMetrics {
    /// Create the import counters and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let successful = CounterVec::new(
            Opts::new(
                "imagestream_successful_import_count",
                "Number of image stream imports that produced an image",
            )
            .namespace(CONTROLLER_NAME),
            &["cluster", "namespace"],
        )?;
        let failed = CounterVec::new(
            Opts::new(
                "imagestream_failed_import_count",
                "Number of image stream imports that failed",
            )
            .namespace(CONTROLLER_NAME),
            &["cluster", "namespace"],
        )?;

        registry.register(Box::new(successful.clone()))?;
        registry.register(Box::new(failed.clone()))?;

        Ok(Self { successful, failed })
    }
}

impl ImportMetrics for PrometheusImportMetrics {
    fn record_import(&self, cluster: &str, namespace: &str, success: bool) {
        let counter = if success {
            &self.successful
        } else {
            &self.failed
        };
        counter.with_label_values(&[cluster, namespace]).inc();
    }
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
