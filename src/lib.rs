// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Image Distributor - cross-cluster image distribution for CI
//!
//! The image distributor watches the image streams of a central registry cluster and
//! imports every image that CI needs into each build cluster, so test workloads pull
//! from a local, already-resolved copy.
//!
//! ## Overview
//!
//! - A relevance filter decides which registry tags any CI configuration, explicit
//!   allow-list or speculative import request refers to
//! - Each relevant tag is fanned out into one work item per build cluster
//! - A single worker reconciles work items: it provisions the namespace, RBAC, image
//!   stream and pull secret on the build cluster, then performs a synchronous
//!   `ImageStreamImport` unless the target already points at the source digest
//!
//! ## Modules
//!
//! - [`routing`] - Work item keys and their two-field wire encoding
//! - [`image_api`] - OpenShift image API types
//! - [`crd`] - `TestImageStreamTagImport` speculative import requests
//! - [`config_index`] - Inverted index over CI configurations
//! - [`filter`] - Relevance filter for registry tags
//! - [`fanout`] - Registry events to per-cluster work items
//! - [`queue`] - Bounded, deduplicating work queue
//! - [`reconciler`] - Per-cluster reconciliation pipeline
//! - [`resources`] - Idempotent upserts of provisioned objects
//! - [`client`] - Cluster API seam
//! - [`controller`] - Process wiring
//!
//! ## Example
//!
//! ```rust
//! use image_distributor::routing::{ImageReference, RoutingKey};
//!
//! let image = ImageReference::new("ocp", "4.16", "cli");
//! let key = RoutingKey::for_image("build01", &image);
//!
//! let encoded = key.encode();
//! assert_eq!(encoded.to_string(), "build01_ocp/4.16:cli");
//! assert_eq!(RoutingKey::decode(&encoded).unwrap(), key);
//! ```

pub mod client;
pub mod config_index;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod errors;
pub mod fanout;
pub mod filter;
pub mod image_api;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod resources;
pub mod retry;
pub mod routing;
pub mod server;
pub mod settings;

#[cfg(test)]
pub(crate) mod fake_client;
