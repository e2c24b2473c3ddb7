// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `metrics.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_record_import_uses_labels() {
        let registry = Registry::new();
        let metrics = PrometheusImportMetrics::register(&registry).unwrap();

        metrics.record_import("build01", "ocp", true);
        metrics.record_import("build01", "ocp", true);
        metrics.record_import("build02", "ocp", false);

        #[allow(clippy::float_cmp)]
        {
            assert_eq!(metrics.successful.with_label_values(&["build01", "ocp"]).get(), 2.0);
            assert_eq!(metrics.failed.with_label_values(&["build01", "ocp"]).get(), 0.0);
            assert_eq!(metrics.failed.with_label_values(&["build02", "ocp"]).get(), 1.0);
        }
    }

    #[test]
    fn test_metric_names() {
        let registry = Registry::new();
        let metrics = PrometheusImportMetrics::register(&registry).unwrap();
        metrics.record_import("build01", "ocp", false);

        let text = gather_metrics(&registry).unwrap();
        assert!(text.contains(
            "test_images_distributor_imagestream_failed_import_count{cluster=\"build01\",namespace=\"ocp\"} 1"
        ));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PrometheusImportMetrics::register(&registry).unwrap();
        assert!(PrometheusImportMetrics::register(&registry).is_err());
    }

    #[test]
    fn test_registries_are_independent() {
        let first = Registry::new();
        let second = Registry::new();
        let a = PrometheusImportMetrics::register(&first).unwrap();
        let b = PrometheusImportMetrics::register(&second).unwrap();

        a.record_import("build01", "ocp", true);
        #[allow(clippy::float_cmp)]
        {
            assert_eq!(b.successful.with_label_values(&["build01", "ocp"]).get(), 0.0);
        }
    }
}
