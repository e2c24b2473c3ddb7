// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster API seam.
//!
//! The reconciler talks to the registry cluster and every build cluster through the
//! [`ClusterClient`] trait. Production code uses [`KubeClusterClient`], a thin wrapper
//! around `kube::Client`; tests substitute an in-memory implementation.
//!
//! Only three verbs are needed: `get`, `create` and `replace`. Updates are always
//! full replacements of an object that was read in the same reconciliation, so the
//! API server's optimistic concurrency check on `resourceVersion` applies.

use crate::constants::FIELD_MANAGER;
use crate::crd::TestImageStreamTagImport;
use crate::image_api::{ImageStream, ImageStreamImport, ImageStreamTag};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::PostParams;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A typed Kubernetes object the reconciler reads or writes.
pub trait ClusterObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Build a typed API handle. `namespace` is ignored for cluster-scoped kinds.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_object {
    ($($type:ty),* $(,)?) => {
        $(
            impl ClusterObject for $type {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(namespace) => Api::namespaced(client, namespace),
                        None => Api::all(client),
                    }
                }
            }
        )*
    };
}

namespaced_object!(
    ImageStream,
    ImageStreamTag,
    ImageStreamImport,
    Role,
    RoleBinding,
    Secret,
    TestImageStreamTagImport,
);

impl ClusterObject for Namespace {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

/// Read/create/replace access to one cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Name of the cluster, for logging and error context.
    fn cluster(&self) -> &str;

    /// Fetch an object, returning `None` if it does not exist.
    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error>;

    /// Create an object and return the server's response.
    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K, kube::Error>;

    /// Replace an existing object and return the server's response.
    async fn replace<K: ClusterObject>(&self, object: &K) -> Result<K, kube::Error>;
}

/// [`ClusterClient`] backed by a live API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    name: String,
    client: Client,
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// The underlying client, for watchers.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn cluster(&self) -> &str {
        &self.name
    }

    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        K::api(self.client.clone(), namespace).get_opt(name).await
    }

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K, kube::Error> {
        K::api(self.client.clone(), object.meta().namespace.as_deref())
            .create(&Self::post_params(), object)
            .await
    }

    async fn replace<K: ClusterObject>(&self, object: &K) -> Result<K, kube::Error> {
        K::api(self.client.clone(), object.meta().namespace.as_deref())
            .replace(&object.name_any(), &Self::post_params(), object)
            .await
    }
}

/// Whether the error reports that the object being created already exists.
#[must_use]
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists")
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
