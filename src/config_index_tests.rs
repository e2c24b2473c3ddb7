// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config_index.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::fs;

    fn config(name: &str, tags: &[(&str, &str, &str)], streams: &[(&str, &str)]) -> CiConfig {
        CiConfig {
            name: name.to_string(),
            input_image_tags: tags
                .iter()
                .map(|(ns, name, tag)| ImageReference::new(*ns, *name, *tag))
                .collect(),
            input_image_streams: streams
                .iter()
                .map(|(ns, name)| StreamReference::new(*ns, *name))
                .collect(),
        }
    }

    fn index_fn() -> IndexFn {
        Arc::new(test_input_index_keys)
    }

    #[test]
    fn test_index_keys() {
        let cfg = config("a", &[("ocp", "4.16", "cli")], &[("ci", "golang")]);
        assert_eq!(
            test_input_index_keys(&cfg),
            vec!["ocp/4.16:cli".to_string(), "imagestream_ci/golang".to_string()]
        );
        assert!(test_input_index_keys(&CiConfig::default()).is_empty());
    }

    #[tokio::test]
    async fn test_get_from_unknown_index_fails() {
        let index = InMemoryConfigIndex::new();
        assert!(matches!(
            index.get_from_index(INDEX_NAME, "ocp/4.16:cli"),
            Err(IndexError::UnknownIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_add_index_twice_fails() {
        let index = InMemoryConfigIndex::new();
        index.add_index(INDEX_NAME, index_fn()).await.unwrap();
        assert!(matches!(
            index.add_index(INDEX_NAME, index_fn()).await,
            Err(IndexError::DuplicateIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_reflects_updates() {
        let index = InMemoryConfigIndex::new();
        index.add_index(INDEX_NAME, index_fn()).await.unwrap();
        assert!(index.get_from_index(INDEX_NAME, "ocp/4.16:cli").unwrap().is_empty());

        index
            .upsert(config("a", &[("ocp", "4.16", "cli")], &[]))
            .await;
        let found = index.get_from_index(INDEX_NAME, "ocp/4.16:cli").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a");

        index.remove("a").await;
        assert!(index.get_from_index(INDEX_NAME, "ocp/4.16:cli").unwrap().is_empty());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_before_index_receives_initial_contents() {
        let index = InMemoryConfigIndex::new();
        index
            .replace_all(vec![config("a", &[("ocp", "4.16", "cli")], &[("ci", "golang")])])
            .await;
        let mut deltas = index.subscribe(INDEX_NAME);

        index.add_index(INDEX_NAME, index_fn()).await.unwrap();

        let first = deltas.recv().await.unwrap();
        let second = deltas.recv().await.unwrap();
        assert_eq!(first.index_key, "imagestream_ci/golang");
        assert_eq!(second.index_key, "ocp/4.16:cli");
        assert_eq!(second.added.len(), 1);
        assert!(second.removed.is_empty());
        assert!(deltas.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_changed_config_is_removed_and_added() {
        let index = InMemoryConfigIndex::new();
        index.add_index(INDEX_NAME, index_fn()).await.unwrap();
        index
            .upsert(config("a", &[("ocp", "4.16", "cli")], &[]))
            .await;
        let mut deltas = index.subscribe(INDEX_NAME);

        index
            .upsert(config("a", &[("ocp", "4.16", "cli")], &[("ci", "golang")]))
            .await;

        let mut received = vec![deltas.recv().await.unwrap(), deltas.recv().await.unwrap()];
        received.sort_by(|a, b| a.index_key.cmp(&b.index_key));

        assert_eq!(received[0].index_key, "imagestream_ci/golang");
        assert_eq!(received[0].added.len(), 1);
        assert!(received[0].removed.is_empty());

        assert_eq!(received[1].index_key, "ocp/4.16:cli");
        assert_eq!(received[1].added.len(), 1);
        assert_eq!(received[1].removed.len(), 1);
    }

    #[tokio::test]
    async fn test_removal_delta() {
        let index = InMemoryConfigIndex::new();
        index.add_index(INDEX_NAME, index_fn()).await.unwrap();
        index
            .upsert(config("a", &[("ocp", "4.16", "cli")], &[]))
            .await;
        let mut deltas = index.subscribe(INDEX_NAME);

        index.remove("a").await;

        let delta = deltas.recv().await.unwrap();
        assert_eq!(delta.index_key, "ocp/4.16:cli");
        assert!(delta.added.is_empty());
        assert_eq!(delta.removed.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let index = InMemoryConfigIndex::new();
        index.add_index(INDEX_NAME, index_fn()).await.unwrap();
        drop(index.subscribe(INDEX_NAME));
        let mut live = index.subscribe(INDEX_NAME);

        index
            .upsert(config("a", &[("ocp", "4.16", "cli")], &[]))
            .await;

        assert_eq!(live.recv().await.unwrap().index_key, "ocp/4.16:cli");
        assert_eq!(index.lock().subscribers[INDEX_NAME].len(), 1);
    }

    #[test]
    fn test_diff_index_unchanged_is_empty() {
        let mut index = Index::new();
        index.insert("k".to_string(), vec![config("a", &[], &[])]);
        assert!(diff_index(&index, &index.clone()).is_empty());
    }

    #[test]
    fn test_load_ci_configs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "inputImageTags:\n  - namespace: ocp\n    name: \"4.16\"\n    tag: cli\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("a.yml"),
            "name: explicit\ninputImageStreams:\n  - namespace: ci\n    name: golang\n",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let configs = load_ci_configs(dir.path()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "explicit");
        assert_eq!(configs[0].input_image_streams[0].name, "golang");
        assert_eq!(configs[1].name, "b");
        assert_eq!(
            configs[1].input_image_tags[0],
            ImageReference::new("ocp", "4.16", "cli")
        );
    }

    #[test]
    fn test_load_ci_configs_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.yaml"), "inputImageTags: 7\n").unwrap();
        assert!(matches!(
            load_ci_configs(dir.path()),
            Err(IndexError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_ci_configs_missing_dir() {
        assert!(matches!(
            load_ci_configs(Path::new("/nonexistent/ci-config")),
            Err(IndexError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryConfigIndex::new();
        let reload = tokio::spawn(reload_ci_configs(
            index.clone(),
            dir.path().to_path_buf(),
            std::time::Duration::from_millis(10),
        ));

        fs::write(
            dir.path().join("a.yaml"),
            "inputImageTags:\n  - namespace: ocp\n    name: \"4.16\"\n    tag: cli\n",
        )
        .unwrap();

        for _ in 0..100 {
            if !index.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        reload.abort();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_waits_one_interval_before_first_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.yaml"),
            "inputImageTags:\n  - namespace: ocp\n    name: \"4.16\"\n    tag: cli\n",
        )
        .unwrap();

        let index = InMemoryConfigIndex::new();
        let reload = tokio::spawn(reload_ci_configs(
            index.clone(),
            dir.path().to_path_buf(),
            std::time::Duration::from_secs(3600),
        ));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        reload.abort();
        assert!(index.is_empty());
    }
}
