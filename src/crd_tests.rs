// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use kube::{CustomResourceExt, Resource};

    fn spec(cluster: &str, namespace: &str, name: &str) -> TestImageStreamTagImportSpec {
        TestImageStreamTagImportSpec {
            cluster_name: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[test]
    fn test_crd_identity() {
        let crd = TestImageStreamTagImport::crd();
        assert_eq!(crd.spec.group, "ci.openshift.io");
        assert_eq!(crd.spec.names.kind, "TestImageStreamTagImport");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.versions[0].name, "v1");
        assert_eq!(TestImageStreamTagImport::plural(&()), "testimagestreamtagimports");
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let value = serde_json::to_value(spec("build01", "ocp", "4.16:cli")).unwrap();
        assert_eq!(value["clusterName"], "build01");
        assert_eq!(value["namespace"], "ocp");
        assert_eq!(value["name"], "4.16:cli");
    }

    #[test]
    fn test_refers_to() {
        let request = spec("build01", "ocp", "4.16:cli");
        assert!(request.refers_to("ocp", "4.16:cli"));
        assert!(!request.refers_to("ocp", "4.16:tests"));
        assert!(!request.refers_to("origin", "4.16:cli"));
    }

    #[test]
    fn test_routing_key() {
        let key = spec("build02", "ocp", "4.16:cli").routing_key();
        assert_eq!(key.cluster, "build02");
        assert_eq!(key.namespace, "ocp");
        assert_eq!(key.name, "4.16:cli");
    }

    #[test]
    fn test_image_requires_stream_and_tag() {
        assert!(spec("build01", "ocp", "4.16:cli").image().is_ok());
        assert!(spec("build01", "ocp", "4.16").image().is_err());
    }
}
