// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the image distributor.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Controller Identity
// ============================================================================

/// Name of this controller, used as the metrics namespace and log field
pub const CONTROLLER_NAME: &str = "test_images_distributor";

/// Field manager recorded on objects written by this controller
pub const FIELD_MANAGER: &str = "test-images-distributor";

// ============================================================================
// API Constants
// ============================================================================

/// API group of the OpenShift image API
pub const IMAGE_API_GROUP: &str = "image.openshift.io";

/// API version of the OpenShift image API
pub const IMAGE_API_VERSION: &str = "v1";

/// Object reference kind used for external image pull specs
pub const DOCKER_IMAGE_KIND: &str = "DockerImage";

// ============================================================================
// Routing
// ============================================================================

/// Separator between cluster name and image namespace in the encoded routing key.
///
/// Must never occur inside a cluster name or an image namespace.
pub const CLUSTER_NAMESPACE_DELIMITER: char = '_';

/// Separator between image stream name and tag
pub const STREAM_TAG_DELIMITER: char = ':';

// ============================================================================
// Config Index
// ============================================================================

/// Name of the index mapping test input image references to CI configurations
pub const TEST_INPUT_INDEX_NAME: &str = "config-by-test-input-imagestreamtag";

/// Prefix distinguishing stream-level index keys from tag-level keys
pub const IMAGE_STREAM_INDEX_KEY_PREFIX: &str = "imagestream_";

// ============================================================================
// Provisioned Resources
// ============================================================================

/// Name of the pull secret created in every target namespace
pub const PULL_SECRET_NAME: &str = "registry-pull-credentials";

/// Default namespace of the pull secret the target copy is sourced from
pub const DEFAULT_PULL_SECRET_SOURCE_NAMESPACE: &str = "ci";

/// Name shared by the RBAC role and role binding
pub const IMAGE_MANAGER_ROLE_NAME: &str = "ci-operator-image-manager";

/// Service account granted access to image resources
pub const IMAGE_MANAGER_SERVICE_ACCOUNT: &str = "ci-operator";

/// Namespace of the service account granted access to image resources
pub const IMAGE_MANAGER_SERVICE_ACCOUNT_NAMESPACE: &str = "ci";

/// Annotation prefix mirrored from source image streams onto target image streams
pub const RELEASE_ANNOTATION_PREFIX: &str = "release.openshift.io";

/// Secret data key holding docker registry credentials
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Secret type for docker registry credentials
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Interval between reloads of the CI configuration directory (5 minutes)
pub const CONFIG_RELOAD_INTERVAL_SECS: u64 = 300;

// ============================================================================
// Work Queue
// ============================================================================

/// Default capacity of the bounded work queue channel
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the channel between the config index and the delta forwarder
pub const INDEX_DELTA_CHANNEL_CAPACITY: usize = 256;

/// Initial requeue delay after a failed reconciliation (100ms)
pub const REQUEUE_INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum requeue delay after repeated failures (5 minutes)
pub const REQUEUE_MAX_INTERVAL_SECS: u64 = 300;

// ============================================================================
// HTTP
// ============================================================================

/// Default bind address of the metrics and health server
pub const DEFAULT_METRICS_ADDRESS: &str = "0.0.0.0:8080";
