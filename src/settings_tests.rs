// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `settings.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::io::Write;

    const MINIMAL: &str = r"
registryCluster:
  name: app.ci
buildClusters:
  - name: build01
registryPublicDomain: registry.ci.openshift.org
";

    fn parse(raw: &str) -> Result<Settings, SettingsError> {
        Settings::from_yaml(raw, Path::new("settings.yaml"))
    }

    #[test]
    fn test_defaults() {
        let settings = parse(MINIMAL).unwrap();

        assert_eq!(settings.registry_cluster.name, "app.ci");
        assert_eq!(settings.build_cluster_names(), vec!["build01".to_string()]);
        assert_eq!(settings.pull_secret_source.namespace, "ci");
        assert_eq!(settings.pull_secret_source.name, "registry-pull-credentials");
        assert_eq!(settings.self_managed_namespaces, vec!["ci".to_string()]);
        assert_eq!(settings.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(settings.metrics_address, "0.0.0.0:8080");
        assert!(settings.ci_config_dir.is_none());
        assert!(!settings.dry_run);
    }

    #[test]
    fn test_full_document() {
        let raw = r"
registryCluster:
  name: app.ci
  kubeconfig: /etc/kubeconfigs/app.ci
buildClusters:
  - name: build01
    context: build01
  - name: build02
registryPublicDomain: registry.ci.openshift.org
internalRegistryHosts:
  - image-registry.openshift-image-registry.svc:5000
forbiddenRegistries:
  - registry.build01.ci.openshift.org
additionalImageStreamTags: [ci/ci-tools-build-root:latest]
additionalImageStreams: [ocp/4.16]
additionalImageStreamNamespaces: [origin]
pullSecretSource:
  namespace: test-credentials
  name: pull-secret
selfManagedNamespaces: []
ciConfigDir: /var/lib/ci-configs
queueCapacity: 16
metricsAddress: 127.0.0.1:9090
dryRun: true
";
        let settings = parse(raw).unwrap();

        assert_eq!(
            settings.registry_cluster.kubeconfig,
            Some(PathBuf::from("/etc/kubeconfigs/app.ci"))
        );
        assert_eq!(settings.build_clusters[0].context.as_deref(), Some("build01"));
        assert_eq!(settings.internal_registry_hosts.len(), 1);
        assert_eq!(settings.pull_secret_source.namespace, "test-credentials");
        assert!(settings.self_managed_namespaces.is_empty());
        assert_eq!(settings.queue_capacity, 16);
        assert!(settings.dry_run);

        let allow = settings.allow_lists();
        assert!(allow.tags.contains("ci/ci-tools-build-root:latest"));
        assert!(allow.streams.contains("ocp/4.16"));
        assert!(allow.namespaces.contains("origin"));
    }

    #[test]
    fn test_rejects_delimiter_in_cluster_name() {
        let raw = MINIMAL.replace("build01", "build_01");
        assert!(matches!(
            parse(&raw),
            Err(SettingsError::ClusterName { name, .. }) if name == "build_01"
        ));
    }

    #[test]
    fn test_rejects_empty_cluster_name() {
        let raw = MINIMAL.replace("name: build01", "name: \"\"");
        assert!(matches!(parse(&raw), Err(SettingsError::ClusterName { .. })));
    }

    #[test]
    fn test_rejects_duplicate_cluster() {
        let raw = MINIMAL.replace("  - name: build01", "  - name: build01\n  - name: app.ci");
        assert!(matches!(
            parse(&raw),
            Err(SettingsError::DuplicateCluster(name)) if name == "app.ci"
        ));
    }

    #[test]
    fn test_rejects_missing_build_clusters() {
        let raw = r"
registryCluster:
  name: app.ci
registryPublicDomain: registry.ci.openshift.org
";
        assert!(matches!(parse(raw), Err(SettingsError::NoBuildClusters)));
    }

    #[test]
    fn test_rejects_empty_domain_and_capacity() {
        let raw = MINIMAL.replace("registry.ci.openshift.org", "\"\"");
        assert!(matches!(parse(&raw), Err(SettingsError::EmptyPublicDomain)));

        let raw = format!("{MINIMAL}queueCapacity: 0\n");
        assert!(matches!(parse(&raw), Err(SettingsError::ZeroQueueCapacity)));
    }

    #[test]
    fn test_rejects_malformed_allow_listed_tags() {
        for value in ["ci/clonerefs", "clonerefs:latest", "ci/a/b:latest", "ci/a:b:c"] {
            let raw = format!("{MINIMAL}additionalImageStreamTags: [\"{value}\"]\n");
            assert!(
                matches!(parse(&raw), Err(SettingsError::InvalidImageStreamTag(v)) if v == value),
                "{value} should be rejected"
            );
        }

        let raw = format!("{MINIMAL}additionalImageStreamTags: [ci/clonerefs:latest]\n");
        assert!(parse(&raw).is_ok());
    }

    #[test]
    fn test_rejects_malformed_allow_listed_streams() {
        for value in ["clonerefs", "ci/clonerefs/extra"] {
            let raw = format!("{MINIMAL}additionalImageStreams: [\"{value}\"]\n");
            assert!(
                matches!(parse(&raw), Err(SettingsError::InvalidImageStream(v)) if v == value),
                "{value} should be rejected"
            );
        }

        let raw = format!("{MINIMAL}additionalImageStreams: [ci/clonerefs]\n");
        assert!(parse(&raw).is_ok());
    }

    #[test]
    fn test_ignored_build_clusters() {
        let raw = MINIMAL.replace(
            "  - name: build01",
            "  - name: build01\n  - name: build02\nignoredBuildClusters: [build02]",
        );
        let settings = parse(&raw).unwrap();
        assert_eq!(settings.ignored_build_clusters, vec!["build02".to_string()]);

        let raw = format!("{MINIMAL}ignoredBuildClusters: [build99]\n");
        assert!(matches!(
            parse(&raw),
            Err(SettingsError::UnknownIgnoredCluster(name)) if name == "build99"
        ));
    }

    #[test]
    fn test_parse_error_names_path() {
        let err = parse("registryCluster: [").unwrap_err();
        assert!(err.to_string().contains("settings.yaml"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.registry_public_domain, "registry.ci.openshift.org");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }
}
