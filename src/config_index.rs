// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Inverted index over CI configurations.
//!
//! The distributor only cares about one question: is a given image referenced by any
//! CI configuration? Configurations are indexed by the images they consume, and
//! subscribers are notified whenever the set of configurations behind an index key
//! changes.
//!
//! # Index keys
//!
//! | Key                              | Meaning                                        |
//! |----------------------------------|------------------------------------------------|
//! | `namespace/name:tag`             | The configuration consumes this exact tag      |
//! | `imagestream_namespace/name`     | The configuration consumes every tag of stream |
//!
//! # Delta delivery
//!
//! Each subscriber gets a bounded channel. Delivery awaits channel capacity, so a slow
//! subscriber slows down index updates instead of losing deltas. Subscribers whose
//! receiver was dropped are pruned on the next delivery. Subscribing before an index is
//! registered delivers the full initial contents as additions.
//!
//! # Example
//!
//! ```rust
//! use image_distributor::config_index::{test_input_index_keys, CiConfig, StreamReference};
//! use image_distributor::routing::ImageReference;
//!
//! let config = CiConfig {
//!     name: "openshift-origin-main".to_string(),
//!     input_image_tags: vec![ImageReference::new("ocp", "4.16", "cli")],
//!     input_image_streams: vec![StreamReference::new("ocp", "builder")],
//! };
//! assert_eq!(
//!     test_input_index_keys(&config),
//!     vec!["ocp/4.16:cli".to_string(), "imagestream_ocp/builder".to_string()]
//! );
//! ```

use crate::constants::{
    IMAGE_STREAM_INDEX_KEY_PREFIX, INDEX_DELTA_CHANNEL_CAPACITY, TEST_INPUT_INDEX_NAME,
};
use crate::routing::ImageReference;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Name of the index mapping test input images to configurations.
pub const INDEX_NAME: &str = TEST_INPUT_INDEX_NAME;

/// Errors produced by the config index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Lookup against an index that was never registered
    #[error("index {0:?} does not exist")]
    UnknownIndex(String),

    /// An index with the same name is already registered
    #[error("index {0:?} already exists")]
    DuplicateIndex(String),

    /// A configuration file or directory could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid YAML for [`CiConfig`]
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Reference to a whole image stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamReference {
    pub namespace: String,
    pub name: String,
}

impl StreamReference {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// The slice of a CI configuration the distributor indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiConfig {
    /// Unique configuration name
    #[serde(default)]
    pub name: String,

    /// Exact tags consumed by the configuration's tests
    #[serde(default)]
    pub input_image_tags: Vec<ImageReference>,

    /// Streams whose current tags are consumed by the configuration's tests
    #[serde(default)]
    pub input_image_streams: Vec<StreamReference>,
}

/// Change of the configurations behind one index key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexDelta {
    pub index_key: String,
    pub added: Vec<CiConfig>,
    pub removed: Vec<CiConfig>,
}

/// Computes the keys a configuration is indexed under.
pub type IndexFn = Arc<dyn Fn(&CiConfig) -> Vec<String> + Send + Sync>;

/// Query and subscription interface of the configuration subsystem.
#[async_trait]
pub trait ConfigIndex: Send + Sync {
    /// Register an index and build it from the current configurations.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DuplicateIndex`] if the name is taken.
    async fn add_index(&self, name: &str, index_fn: IndexFn) -> Result<(), IndexError>;

    /// Configurations indexed under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnknownIndex`] if the index was never registered.
    fn get_from_index(&self, name: &str, key: &str) -> Result<Vec<CiConfig>, IndexError>;

    /// Subscribe to changes of the named index. The index does not need to exist yet.
    fn subscribe(&self, name: &str) -> mpsc::Receiver<IndexDelta>;
}

/// Index keys for the configuration's test inputs.
#[must_use]
pub fn test_input_index_keys(config: &CiConfig) -> Vec<String> {
    let tags = config.input_image_tags.iter().map(ToString::to_string);
    let streams = config.input_image_streams.iter().map(|stream| {
        format!(
            "{IMAGE_STREAM_INDEX_KEY_PREFIX}{}/{}",
            stream.namespace, stream.name
        )
    });
    tags.chain(streams).collect()
}

type Index = BTreeMap<String, Vec<CiConfig>>;

struct RegisteredIndex {
    index_fn: IndexFn,
    entries: Index,
}

#[derive(Default)]
struct IndexState {
    configs: BTreeMap<String, CiConfig>,
    indexes: HashMap<String, RegisteredIndex>,
    subscribers: HashMap<String, Vec<mpsc::Sender<IndexDelta>>>,
}

fn build_index(configs: &BTreeMap<String, CiConfig>, index_fn: &IndexFn) -> Index {
    let mut index = Index::new();
    for config in configs.values() {
        for key in index_fn(config) {
            index.entry(key).or_default().push(config.clone());
        }
    }
    index
}

fn by_name(configs: Option<&Vec<CiConfig>>) -> BTreeMap<&str, &CiConfig> {
    configs
        .into_iter()
        .flatten()
        .map(|config| (config.name.as_str(), config))
        .collect()
}

/// Per-key differences between two versions of an index.
///
/// A configuration that changed while staying under the same key is reported as both
/// removed (old version) and added (new version).
#[must_use]
pub fn diff_index(old: &Index, new: &Index) -> Vec<IndexDelta> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut deltas = Vec::new();
    for key in keys {
        let before = by_name(old.get(key));
        let after = by_name(new.get(key));

        let mut delta = IndexDelta {
            index_key: key.clone(),
            ..Default::default()
        };
        for (name, config) in &before {
            if after.get(name) != Some(config) {
                delta.removed.push((*config).clone());
            }
        }
        for (name, config) in &after {
            if before.get(name) != Some(config) {
                delta.added.push((*config).clone());
            }
        }

        if !delta.added.is_empty() || !delta.removed.is_empty() {
            deltas.push(delta);
        }
    }
    deltas
}

/// In-memory [`ConfigIndex`] fed by [`load_ci_configs`] or direct updates.
#[derive(Clone, Default)]
pub struct InMemoryConfigIndex {
    state: Arc<Mutex<IndexState>>,
}

impl InMemoryConfigIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a configuration and notify subscribers.
    pub async fn upsert(&self, config: CiConfig) {
        self.update(|configs| {
            configs.insert(config.name.clone(), config);
        })
        .await;
    }

    /// Remove a configuration by name and notify subscribers.
    pub async fn remove(&self, name: &str) {
        self.update(|configs| {
            configs.remove(name);
        })
        .await;
    }

    /// Replace every configuration and notify subscribers.
    pub async fn replace_all(&self, configs: Vec<CiConfig>) {
        self.update(|current| {
            *current = configs
                .into_iter()
                .map(|config| (config.name.clone(), config))
                .collect();
        })
        .await;
    }

    /// Number of configurations currently known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, CiConfig>)) {
        let pending = {
            let mut state = self.lock();
            apply(&mut state.configs);

            let IndexState {
                configs,
                indexes,
                subscribers,
            } = &mut *state;
            let mut pending = Vec::new();
            for (name, index) in indexes.iter_mut() {
                let rebuilt = build_index(configs, &index.index_fn);
                let deltas = diff_index(&index.entries, &rebuilt);
                index.entries = rebuilt;
                if !deltas.is_empty() {
                    pending.push((name.clone(), deltas, subscribers.get(name).cloned().unwrap_or_default()));
                }
            }
            pending
        };

        for (name, deltas, senders) in pending {
            self.deliver(&name, deltas, senders).await;
        }
    }

    async fn deliver(&self, name: &str, deltas: Vec<IndexDelta>, senders: Vec<mpsc::Sender<IndexDelta>>) {
        if senders.is_empty() {
            return;
        }
        debug!(index = %name, deltas = deltas.len(), subscribers = senders.len(), "Delivering index deltas");

        let mut closed = false;
        for sender in &senders {
            for delta in &deltas {
                if sender.send(delta.clone()).await.is_err() {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            if let Some(subscribers) = self.lock().subscribers.get_mut(name) {
                subscribers.retain(|sender| !sender.is_closed());
            }
            warn!(index = %name, "Pruned closed index subscribers");
        }
    }
}

#[async_trait]
impl ConfigIndex for InMemoryConfigIndex {
    async fn add_index(&self, name: &str, index_fn: IndexFn) -> Result<(), IndexError> {
        let (deltas, senders) = {
            let mut state = self.lock();
            if state.indexes.contains_key(name) {
                return Err(IndexError::DuplicateIndex(name.to_string()));
            }
            let entries = build_index(&state.configs, &index_fn);
            let deltas = diff_index(&Index::new(), &entries);
            state
                .indexes
                .insert(name.to_string(), RegisteredIndex { index_fn, entries });
            let senders = state.subscribers.get(name).cloned().unwrap_or_default();
            (deltas, senders)
        };

        info!(index = %name, keys = deltas.len(), "Registered config index");
        self.deliver(name, deltas, senders).await;
        Ok(())
    }

    fn get_from_index(&self, name: &str, key: &str) -> Result<Vec<CiConfig>, IndexError> {
        let state = self.lock();
        let index = state
            .indexes
            .get(name)
            .ok_or_else(|| IndexError::UnknownIndex(name.to_string()))?;
        Ok(index.entries.get(key).cloned().unwrap_or_default())
    }

    fn subscribe(&self, name: &str) -> mpsc::Receiver<IndexDelta> {
        let (sender, receiver) = mpsc::channel(INDEX_DELTA_CHANNEL_CAPACITY);
        self.lock()
            .subscribers
            .entry(name.to_string())
            .or_default()
            .push(sender);
        receiver
    }
}

/// Load every `*.yaml` / `*.yml` file in `dir` as a [`CiConfig`].
///
/// Files are read in path order. A configuration without a `name` is named after its
/// file stem.
///
/// # Errors
///
/// Returns an error if the directory or any file cannot be read or parsed.
pub fn load_ci_configs(dir: &Path) -> Result<Vec<CiConfig>, IndexError> {
    let read_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| IndexError::Read { path, source }
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_error(dir))? {
        let path = entry.map_err(read_error(dir))?.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut configs = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(read_error(&path))?;
        let mut config: CiConfig =
            serde_yaml::from_str(&raw).map_err(|source| IndexError::Parse {
                path: path.clone(),
                source,
            })?;
        if config.name.is_empty() {
            config.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        configs.push(config);
    }

    info!(dir = %dir.display(), count = configs.len(), "Loaded CI configurations");
    Ok(configs)
}

/// Reload `dir` into `index` every `interval`, starting one interval from now.
///
/// The caller performs the initial load. Failed reloads keep the previous contents.
/// Only changed index keys produce deltas, so an unchanged directory is a no-op for
/// subscribers.
pub async fn reload_ci_configs(index: InMemoryConfigIndex, dir: PathBuf, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let path = dir.clone();
        match tokio::task::spawn_blocking(move || load_ci_configs(&path)).await {
            Ok(Ok(configs)) => {
                index.replace_all(configs).await;
                debug!(dir = %dir.display(), configs = index.len(), "Reloaded CI configurations");
            }
            Ok(Err(e)) => {
                error!(dir = %dir.display(), error = %e, "Failed to reload CI configurations");
            }
            Err(e) => error!(dir = %dir.display(), error = %e, "CI configuration reload task failed"),
        }
    }
}

#[cfg(test)]
#[path = "config_index_tests.rs"]
mod config_index_tests;
