// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # svcdir - Concurrent Service Name Directory
//!
//! An in-memory directory mapping symbolic `(service_type, instance)`
//! addresses to live `(node, port)` bindings for cluster IPC. A service
//! publishes the instance ranges it serves; clients resolve an instance to
//! a binding with closest-first or round-robin selection, fan a message out
//! to every local port in a range, or subscribe to be told the moment a
//! binding appears or disappears.
//!
//! ## Quick Start
//!
//! ```rust
//! use svcdir::{Scope, ServiceDirectory};
//!
//! let own_node = 0x0101;
//! let dir = ServiceDirectory::new(own_node);
//!
//! // Serve instances 0..=99 of service type 4711 on port worker-1.
//! dir.publish(4711, 0, 99, Scope::Cluster, 500, 1).unwrap();
//!
//! // Resolve instance 42 - closest-first: local bindings win.
//! let binding = dir.translate(4711, 42, None).unwrap();
//! assert_eq!((binding.node, binding.port), (own_node, 500));
//!
//! dir.withdraw(4711, 42, 500, 1).unwrap();
//! assert!(dir.translate(4711, 42, None).is_none());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      ServiceDirectory                        |
//! |  power-of-two hash buckets, ArcSwap chain snapshots          |
//! |  directory lock: structure + local publication quota         |
//! +--------------------------------------------------------------+
//! |                      Service (per type)                      |
//! |  sorted disjoint range array  |  subscription list  |  lock  |
//! +--------------------------------------------------------------+
//! |                   ServiceRange [lower,upper]                 |
//! |  BindingSet: local list / all list (rotation order)          |
//! +--------------------------------------------------------------+
//! ```
//!
//! Reads (translate, lookup, multicast, dump) find the service without
//! taking the directory lock; the per-type lock covers the short
//! search-and-rotate critical section. Entries removed concurrently stay
//! valid for readers already holding a reference and are freed at the last
//! `Arc` drop.
//!
//! ## Subscriptions
//!
//! ```rust
//! use svcdir::{ChannelSink, EventFilter, ServiceDirectory, Scope, Subscription};
//!
//! let dir = ServiceDirectory::new(0x0101);
//! let (sink, events) = ChannelSink::unbounded();
//! let sub = Subscription::new(4711, 0, 99, EventFilter::PORTS, sink);
//! dir.subscribe(&sub);
//!
//! dir.publish(4711, 10, 19, Scope::Cluster, 500, 1).unwrap();
//! let event = events.try_recv().unwrap();
//! assert!(event.first_report); // this publish created the range
//! ```
//!
//! Delivery is synchronous with the mutation and ordered per type; see
//! [`subscription`] for the filter semantics.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ServiceDirectory`] | The directory; entry point for every operation |
//! | [`Publication`] | One bound range-instance at one node/port |
//! | [`Subscription`] | Standing interest in a `(type, range)` window |
//! | [`Scope`] | Binding visibility (zone / cluster / node) |
//! | [`DumpCursor`] | Resumable cursor for paginated enumeration |
//! | [`DistributionHook`] | Boundary to the cluster distribution layer |

/// Directory sizing constants and runtime configuration.
pub mod config;
/// Distribution-layer boundary (publish/withdraw propagation hook).
pub mod distr;
/// Subscriptions, filters and event sinks.
pub mod subscription;
/// The name table itself: directory, services, ranges, bindings, dump.
pub mod table;

pub use config::{ConfigError, DirectoryConfig, DIRECTORY_BUCKETS, MAX_LOCAL_PUBLICATIONS};
pub use distr::{DistributionHook, NoDistribution};
pub use subscription::{
    ChannelSink, ClosureSink, EventFilter, EventKind, EventSink, ServiceEvent, Subscription,
};
pub use table::{
    Binding, DestList, DumpCursor, DumpError, InvalidScope, NodeId, PortId, Publication,
    PublicationRecord, PublishError, Scope, ServiceDirectory,
};
