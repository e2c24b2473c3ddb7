// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Idempotent provisioning of the objects an image import depends on.
//!
//! Every provisioned kind has a desired-state constructor that returns a skeleton
//! (identity only) and a mutate function. [`upsert`] reads the live object, creates
//! the skeleton with the mutation applied if it is missing, and otherwise applies the
//! mutation to the live object and replaces it only when something changed.
//!
//! Mutate functions set exactly the fields this controller owns. Labels, annotations
//! and spec fields written by other actors survive every upsert.
//!
//! # Example
//!
//! ```rust,no_run
//! use image_distributor::client::KubeClusterClient;
//! use image_distributor::resources::{image_manager_role, upsert};
//!
//! # async fn example(client: &KubeClusterClient) -> Result<(), image_distributor::errors::DistributorError> {
//! let (role, mutate) = image_manager_role("ocp");
//! let result = upsert(client, role, mutate).await?;
//! println!("role {result}");
//! # Ok(())
//! # }
//! ```

use crate::client::{is_already_exists, ClusterClient, ClusterObject};
use crate::constants::{
    DOCKER_CONFIG_JSON_KEY, DOCKER_CONFIG_JSON_TYPE, IMAGE_API_GROUP, IMAGE_MANAGER_ROLE_NAME,
    IMAGE_MANAGER_SERVICE_ACCOUNT, IMAGE_MANAGER_SERVICE_ACCOUNT_NAMESPACE, PULL_SECRET_NAME,
    RELEASE_ANNOTATION_PREFIX,
};
use crate::errors::DistributorError;
use crate::image_api::{ImageLookupPolicy, ImageStream};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// What [`upsert`] did to the live object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        })
    }
}

fn to_json<K: ClusterObject>(object: &K) -> Result<serde_json::Value, DistributorError> {
    serde_json::to_value(object).map_err(|source| DistributorError::Serialization {
        kind: K::kind(&()).to_string(),
        source,
    })
}

/// Create `skeleton` with `mutate` applied, or apply `mutate` to the live object.
///
/// The live object is only replaced when the mutation changed its serialized form, so
/// an upsert against an already-converged object performs no writes.
///
/// # Errors
///
/// Returns [`DistributorError::Api`] if any API call fails, including conflicts caused
/// by a concurrent writer between the read and the replace.
pub async fn upsert<C, K, F>(
    client: &C,
    skeleton: K,
    mutate: F,
) -> Result<OperationResult, DistributorError>
where
    C: ClusterClient,
    K: ClusterObject,
    F: Fn(&mut K) + Send + Sync,
{
    let namespace = skeleton.meta().namespace.clone();
    let name = skeleton.meta().name.clone().unwrap_or_default();
    let cluster = client.cluster();

    let existing: Option<K> = client
        .get(namespace.as_deref(), &name)
        .await
        .map_err(|e| DistributorError::api::<K>("get", cluster, namespace.as_deref(), &name, e))?;

    let result = match existing {
        None => {
            let mut desired = skeleton;
            mutate(&mut desired);
            client.create(&desired).await.map_err(|e| {
                DistributorError::api::<K>("create", cluster, namespace.as_deref(), &name, e)
            })?;
            OperationResult::Created
        }
        Some(mut live) => {
            let before = to_json(&live)?;
            mutate(&mut live);
            if to_json(&live)? == before {
                OperationResult::Unchanged
            } else {
                client.replace(&live).await.map_err(|e| {
                    DistributorError::api::<K>("replace", cluster, namespace.as_deref(), &name, e)
                })?;
                OperationResult::Updated
            }
        }
    };

    if result == OperationResult::Unchanged {
        debug!(
            cluster = %cluster,
            kind = %K::kind(&()),
            namespace = namespace.as_deref().unwrap_or_default(),
            name = %name,
            "Object already up to date"
        );
    } else {
        info!(
            cluster = %cluster,
            kind = %K::kind(&()),
            namespace = namespace.as_deref().unwrap_or_default(),
            name = %name,
            operation = %result,
            "Upserted object"
        );
    }

    Ok(result)
}

/// Make sure a namespace exists. A concurrent creation is not an error.
///
/// # Errors
///
/// Returns [`DistributorError::Api`] if the read fails or creation fails for any
/// reason other than the namespace already existing.
pub async fn ensure_namespace<C: ClusterClient>(
    client: &C,
    name: &str,
) -> Result<OperationResult, DistributorError> {
    let cluster = client.cluster();
    let existing: Option<Namespace> = client
        .get(None, name)
        .await
        .map_err(|e| DistributorError::api::<Namespace>("get", cluster, None, name, e))?;
    if existing.is_some() {
        return Ok(OperationResult::Unchanged);
    }

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match client.create(&namespace).await {
        Ok(_) => {
            info!(cluster = %cluster, namespace = %name, "Created namespace");
            Ok(OperationResult::Created)
        }
        Err(e) if is_already_exists(&e) => Ok(OperationResult::Unchanged),
        Err(e) => Err(DistributorError::api::<Namespace>(
            "create", cluster, None, name, e,
        )),
    }
}

fn namespaced_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Role granting access to image resources in `namespace`.
#[must_use]
pub fn image_manager_role(namespace: &str) -> (Role, impl Fn(&mut Role) + Send + Sync) {
    let skeleton = Role {
        metadata: namespaced_meta(namespace, IMAGE_MANAGER_ROLE_NAME),
        ..Default::default()
    };
    let mutate = |role: &mut Role| {
        role.rules = Some(vec![PolicyRule {
            api_groups: Some(vec![IMAGE_API_GROUP.to_string()]),
            resources: Some(
                ["imagestreamtags", "imagestreams", "imagestreams/layers"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            verbs: ["get", "list", "watch", "create", "update", "patch"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..Default::default()
        }]);
    };
    (skeleton, mutate)
}

/// Binding of [`image_manager_role`] to the CI service account.
#[must_use]
pub fn image_manager_role_binding(
    namespace: &str,
) -> (RoleBinding, impl Fn(&mut RoleBinding) + Send + Sync) {
    let skeleton = RoleBinding {
        metadata: namespaced_meta(namespace, IMAGE_MANAGER_ROLE_NAME),
        ..Default::default()
    };
    let mutate = |binding: &mut RoleBinding| {
        binding.role_ref = RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: IMAGE_MANAGER_ROLE_NAME.to_string(),
        };
        binding.subjects = Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: IMAGE_MANAGER_SERVICE_ACCOUNT.to_string(),
            namespace: Some(IMAGE_MANAGER_SERVICE_ACCOUNT_NAMESPACE.to_string()),
            ..Default::default()
        }]);
    };
    (skeleton, mutate)
}

/// Release annotations on `source` that are mirrored onto target streams.
#[must_use]
pub fn release_annotations(source: &ImageStream) -> BTreeMap<String, String> {
    source
        .metadata
        .annotations
        .iter()
        .flatten()
        .filter(|(key, _)| key.starts_with(RELEASE_ANNOTATION_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Target image stream with local lookup enabled and release annotations mirrored.
#[must_use]
pub fn image_stream_shell(
    namespace: &str,
    name: &str,
    source: &ImageStream,
) -> (ImageStream, impl Fn(&mut ImageStream) + Send + Sync) {
    let skeleton = ImageStream::shell(namespace, name);
    let annotations = release_annotations(source);
    let mutate = move |stream: &mut ImageStream| {
        stream.spec.lookup_policy = Some(ImageLookupPolicy { local: true });
        if !annotations.is_empty() {
            stream
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.clone());
        }
    };
    (skeleton, mutate)
}

/// Pull secret in `namespace` carrying the credentials from `source`.
///
/// Returns `None` if `source` has no docker config payload.
#[must_use]
pub fn pull_secret(
    namespace: &str,
    source: &Secret,
) -> Option<(Secret, impl Fn(&mut Secret) + Send + Sync)> {
    let credentials: ByteString = source.data.as_ref()?.get(DOCKER_CONFIG_JSON_KEY)?.clone();
    let skeleton = Secret {
        metadata: namespaced_meta(namespace, PULL_SECRET_NAME),
        ..Default::default()
    };
    let mutate = move |secret: &mut Secret| {
        secret.type_ = Some(DOCKER_CONFIG_JSON_TYPE.to_string());
        secret
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(DOCKER_CONFIG_JSON_KEY.to_string(), credentials.clone());
    };
    Some((skeleton, mutate))
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
