// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ClusterClient`] for unit tests.
//!
//! Objects are stored as JSON keyed by kind, namespace and name. Every `create` and
//! `replace` is recorded so tests can assert on the exact writes a reconciliation made.
//! `ImageStreamImport` creation is simulated the way the API server does it: the
//! response is populated synchronously and, on success, the target image stream tag is
//! updated to the imported digest. Nothing else about the import is persisted.

use crate::client::ClusterClient;
use crate::client::ClusterObject;
use crate::image_api::{
    Image, ImageImportStatus, ImageStreamImport, ImageStreamImportStatus, ImageStreamTag,
    ImportResultStatus,
};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::Status;
use kube::Resource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type ObjectKey = (String, String, String);

/// A single recorded write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedWrite {
    pub verb: &'static str,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    writes: Vec<RecordedWrite>,
    imports: Vec<ImageStreamImport>,
    import_failure: Option<String>,
    resource_version: u64,
}

/// Cloneable handle to a shared in-memory cluster.
#[derive(Clone)]
pub struct FakeClusterClient {
    name: String,
    state: Arc<Mutex<FakeState>>,
}

fn object_key<K: ClusterObject>(namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        K::kind(&()).to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(Status::failure(&message, reason).with_code(code).boxed())
}

impl FakeClusterClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    /// Seed an object without recording a write.
    pub fn insert<K: ClusterObject>(&self, object: K) {
        let mut state = self.state.lock().unwrap();
        state.resource_version += 1;
        let version = state.resource_version;
        let mut object = object;
        object.meta_mut().resource_version = Some(version.to_string());
        let key = object_key::<K>(object.meta().namespace.as_deref(), object.meta().name.as_deref().unwrap_or_default());
        state.objects.insert(key, serde_json::to_value(&object).unwrap());
    }

    /// Builder form of [`Self::insert`].
    pub fn with<K: ClusterObject>(self, object: K) -> Self {
        self.insert(object);
        self
    }

    /// Read back a stored object.
    pub fn object<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&object_key::<K>(namespace, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// All writes since creation or the last [`Self::clear_writes`].
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    /// Import requests received, in order.
    pub fn imports(&self) -> Vec<ImageStreamImport> {
        self.state.lock().unwrap().imports.clone()
    }

    /// Make every subsequent import fail with `message`.
    pub fn fail_imports_with(&self, message: &str) {
        self.state.lock().unwrap().import_failure = Some(message.to_string());
    }

    fn record(state: &mut FakeState, verb: &'static str, key: &ObjectKey) {
        state.writes.push(RecordedWrite {
            verb,
            kind: key.0.clone(),
            namespace: key.1.clone(),
            name: key.2.clone(),
        });
    }

    fn import(state: &mut FakeState, mut request: ImageStreamImport) -> ImageStreamImport {
        state.imports.push(request.clone());

        let namespace = request.metadata.namespace.clone().unwrap_or_default();
        let stream = request.metadata.name.clone().unwrap_or_default();
        let spec = request.spec.images.first().cloned().unwrap_or_default();

        let status = match state.import_failure.clone() {
            Some(message) => ImageImportStatus {
                status: ImportResultStatus {
                    status: Some("Failure".to_string()),
                    message: Some(message),
                    ..Default::default()
                },
                ..Default::default()
            },
            None => {
                let digest = spec.from.name.rsplit('@').next().unwrap_or_default().to_string();
                let tag = spec.to.map(|to| to.name).unwrap_or_default();
                let image = Image {
                    metadata: ObjectMeta {
                        name: Some(digest),
                        ..Default::default()
                    },
                    docker_image_reference: spec.from.name.clone(),
                    ..Default::default()
                };

                state.resource_version += 1;
                let target = ImageStreamTag {
                    metadata: ObjectMeta {
                        namespace: Some(namespace.clone()),
                        name: Some(format!("{stream}:{tag}")),
                        resource_version: Some(state.resource_version.to_string()),
                        ..Default::default()
                    },
                    image: image.clone(),
                    ..Default::default()
                };
                let key = object_key::<ImageStreamTag>(Some(&namespace), &format!("{stream}:{tag}"));
                state.objects.insert(key, serde_json::to_value(&target).unwrap());

                ImageImportStatus {
                    status: ImportResultStatus {
                        status: Some("Success".to_string()),
                        ..Default::default()
                    },
                    image: Some(image),
                    tag: Some(tag),
                }
            }
        };

        request.status = Some(ImageStreamImportStatus {
            images: vec![status],
        });
        request
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    fn cluster(&self) -> &str {
        &self.name
    }

    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&object_key::<K>(namespace, name))
            .map(|value| serde_json::from_value(value.clone()).map_err(kube::Error::SerdeError))
            .transpose()
    }

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K, kube::Error> {
        let mut state = self.state.lock().unwrap();
        let name = object.meta().name.clone().unwrap_or_default();
        let key = object_key::<K>(object.meta().namespace.as_deref(), &name);
        Self::record(&mut state, "create", &key);

        if K::kind(&()) == ImageStreamImport::kind(&()) {
            let request: ImageStreamImport =
                serde_json::from_value(serde_json::to_value(object).unwrap()).unwrap();
            let response = Self::import(&mut state, request);
            return Ok(serde_json::from_value(serde_json::to_value(response).unwrap()).unwrap());
        }

        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} {name:?} already exists", key.0)));
        }

        state.resource_version += 1;
        let mut stored = object.clone();
        stored.meta_mut().resource_version = Some(state.resource_version.to_string());
        state.objects.insert(key, serde_json::to_value(&stored).unwrap());
        Ok(stored)
    }

    async fn replace<K: ClusterObject>(&self, object: &K) -> Result<K, kube::Error> {
        let mut state = self.state.lock().unwrap();
        let name = object.meta().name.clone().unwrap_or_default();
        let key = object_key::<K>(object.meta().namespace.as_deref(), &name);
        Self::record(&mut state, "replace", &key);

        let Some(current) = state.objects.get(&key) else {
            return Err(api_error(404, "NotFound", format!("{} {name:?} not found", key.0)));
        };
        let current_version = current["metadata"]["resourceVersion"].as_str().map(str::to_string);
        if object.meta().resource_version.is_some() && object.meta().resource_version != current_version {
            return Err(api_error(409, "Conflict", "the object has been modified".to_string()));
        }

        state.resource_version += 1;
        let mut stored = object.clone();
        stored.meta_mut().resource_version = Some(state.resource_version.to_string());
        state.objects.insert(key, serde_json::to_value(&stored).unwrap());
        Ok(stored)
    }
}
