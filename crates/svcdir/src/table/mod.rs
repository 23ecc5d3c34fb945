// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The service name directory.
//!
//! A fixed power-of-two array of hash buckets maps service types to
//! per-type service entries. Lookups traverse buckets without blocking: each
//! bucket holds an [`ArcSwap`] snapshot of its chain, so readers load a
//! consistent snapshot while writers (serialized by the directory lock)
//! publish a new one. An entry removed from its bucket stays dereferenceable
//! for any reader that already obtained a reference; deallocation happens at
//! the last `Arc` drop, never synchronously with the unlink.
//!
//! # Locking
//!
//! Two lock levels, always acquired in this order and never more than one
//! of each:
//! - the directory lock: bucket structural changes (service create/unlink)
//!   and the local publication counter;
//! - one service lock: that type's range array, binding sets and
//!   subscription list.
//!
//! Subscription callbacks and distribution hooks fire while these locks are
//! held, which is what makes delivery observe exact linearization points.

mod binding;
mod dest;
mod dump;
mod publication;
mod service;

pub use dest::{Binding, DestList};
pub use dump::{DumpCursor, DumpError, PublicationRecord};
pub use publication::{InvalidScope, NodeId, PortId, Publication, Scope};

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::{ConfigError, DirectoryConfig};
use crate::distr::{DistributionHook, NoDistribution};
use crate::subscription::Subscription;
use service::Service;

/// Why a publication was rejected.
///
/// Rejection leaves the directory untouched: every error path runs before
/// anything is linked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// `lower > upper`.
    InvalidRange(u32, u32),
    /// The range shares instances with an existing range without matching
    /// it exactly.
    Overlap,
    /// An identical `(port, key)` binding already exists on this range.
    Duplicate,
    /// The local publication quota is exhausted.
    QuotaExceeded(u32),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::InvalidRange(lower, upper) => {
                write!(f, "invalid instance range: lower {} > upper {}", lower, upper)
            }
            PublishError::Overlap => write!(f, "range overlaps an existing range inexactly"),
            PublishError::Duplicate => write!(f, "identical binding already published"),
            PublishError::QuotaExceeded(max) => {
                write!(f, "local publication limit reached ({})", max)
            }
        }
    }
}

impl std::error::Error for PublishError {}

/// Directory-wide mutable state, guarded by the directory lock.
struct DirectoryState {
    local_publications: u32,
}

/// Concurrent service name directory.
///
/// Maps `(service_type, instance)` addresses to live `(node, port)`
/// bindings. See the crate documentation for the full operation set.
pub struct ServiceDirectory {
    pub(crate) buckets: Box<[ArcSwap<Vec<Arc<Service>>>]>,
    pub(crate) mask: usize,
    state: Mutex<DirectoryState>,
    config: DirectoryConfig,
    hook: Arc<dyn DistributionHook>,
}

impl ServiceDirectory {
    /// Directory with default sizing, no distribution layer.
    pub fn new(own_node: NodeId) -> Self {
        Self::build(DirectoryConfig::new(own_node), Arc::new(NoDistribution))
    }

    /// Directory with explicit configuration and distribution hook.
    pub fn with_config(
        config: DirectoryConfig,
        hook: Arc<dyn DistributionHook>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, hook))
    }

    fn build(config: DirectoryConfig, hook: Arc<dyn DistributionHook>) -> Self {
        let buckets: Box<[ArcSwap<Vec<Arc<Service>>>]> = (0..config.buckets)
            .map(|_| ArcSwap::from_pointee(Vec::new()))
            .collect();
        Self {
            mask: config.buckets - 1,
            buckets,
            state: Mutex::new(DirectoryState {
                local_publications: 0,
            }),
            config,
            hook,
        }
    }

    /// This node's own address.
    pub fn own_node(&self) -> NodeId {
        self.config.own_node
    }

    /// Publications currently owned by this node.
    pub fn local_publication_count(&self) -> u32 {
        self.state.lock().local_publications
    }

    /// Number of live service entries. Primarily for tests and monitoring.
    pub fn service_count(&self) -> usize {
        self.buckets.iter().map(|slot| slot.load().len()).sum()
    }

    pub(crate) fn bucket_index(&self, service_type: u32) -> usize {
        service_type as usize & self.mask
    }

    /// Lock-free service lookup by type.
    fn find_service(&self, service_type: u32) -> Option<Arc<Service>> {
        let chain = self.buckets[self.bucket_index(service_type)].load();
        chain
            .iter()
            .find(|s| s.service_type == service_type)
            .cloned()
    }

    /// Find or create the service entry for `service_type`.
    ///
    /// Requires the directory lock (witnessed by `_dir`): creation swaps a
    /// new bucket snapshot in.
    fn find_or_create_service(
        &self,
        _dir: &mut DirectoryState,
        service_type: u32,
    ) -> Arc<Service> {
        if let Some(service) = self.find_service(service_type) {
            return service;
        }
        let service = Arc::new(Service::new(service_type));
        let slot = &self.buckets[self.bucket_index(service_type)];
        let mut chain = (*slot.load_full()).clone();
        chain.insert(0, service.clone());
        slot.store(Arc::new(chain));
        log::debug!("[ServiceDirectory] created entry for type {}", service_type);
        service
    }

    /// Unlink a service entry from its bucket.
    ///
    /// Requires the directory lock. The entry stays alive for concurrent
    /// readers holding a reference; it is freed at the last `Arc` drop.
    fn unlink_service(&self, _dir: &mut DirectoryState, service: &Arc<Service>) {
        let slot = &self.buckets[self.bucket_index(service.service_type)];
        let chain: Vec<Arc<Service>> = slot
            .load()
            .iter()
            .filter(|s| !Arc::ptr_eq(s, service))
            .cloned()
            .collect();
        slot.store(Arc::new(chain));
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_locked(
        &self,
        dir: &mut DirectoryState,
        service_type: u32,
        lower: u32,
        upper: u32,
        scope: Scope,
        node: NodeId,
        port: PortId,
        key: u32,
    ) -> Result<Arc<Publication>, PublishError> {
        if lower > upper {
            log::debug!(
                "[ServiceDirectory] rejected publication {{{},{},{}}}: invalid range",
                service_type,
                lower,
                upper
            );
            return Err(PublishError::InvalidRange(lower, upper));
        }

        let service = self.find_or_create_service(dir, service_type);
        let mut inner = service.inner.lock();
        let result = inner.insert_publication(
            self.config.own_node,
            service_type,
            lower,
            upper,
            scope,
            node,
            port,
            key,
        );
        // Don't leave a just-created empty entry behind on rejection.
        if result.is_err() && inner.is_garbage() {
            drop(inner);
            self.unlink_service(dir, &service);
        }
        result
    }

    fn remove_locked(
        &self,
        dir: &mut DirectoryState,
        service_type: u32,
        instance: u32,
        node: NodeId,
        port: PortId,
        key: u32,
    ) -> Option<Arc<Publication>> {
        let service = self.find_service(service_type)?;
        let mut inner = service.inner.lock();
        let publ = inner.remove_publication(self.config.own_node, instance, node, port, key);
        if inner.is_garbage() {
            drop(inner);
            self.unlink_service(dir, &service);
        }
        publ
    }

    /// Record a publication from any node.
    ///
    /// This is the raw insertion path the distribution layer uses for
    /// remote publications; it does not touch the local quota or the hook.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_publication(
        &self,
        service_type: u32,
        lower: u32,
        upper: u32,
        scope: Scope,
        node: NodeId,
        port: PortId,
        key: u32,
    ) -> Result<Arc<Publication>, PublishError> {
        let mut dir = self.state.lock();
        self.insert_locked(&mut dir, service_type, lower, upper, scope, node, port, key)
    }

    /// Remove a publication from any node.
    ///
    /// Not-found returns `None` without logging: a remote withdraw may
    /// chase a publish this node rejected, which is an expected race.
    pub fn remove_publication(
        &self,
        service_type: u32,
        instance: u32,
        node: NodeId,
        port: PortId,
        key: u32,
    ) -> Option<Arc<Publication>> {
        let mut dir = self.state.lock();
        self.remove_locked(&mut dir, service_type, instance, node, port, key)
    }

    /// Publish a binding owned by this node.
    ///
    /// Applies the local quota, then inserts with `node = own_node` and
    /// hands the new publication to the distribution hook.
    pub fn publish(
        &self,
        service_type: u32,
        lower: u32,
        upper: u32,
        scope: Scope,
        port: PortId,
        key: u32,
    ) -> Result<Arc<Publication>, PublishError> {
        let mut dir = self.state.lock();
        if dir.local_publications >= self.config.max_publications {
            log::warn!(
                "[ServiceDirectory] publication failed, local limit reached ({})",
                self.config.max_publications
            );
            return Err(PublishError::QuotaExceeded(self.config.max_publications));
        }
        let publ = self.insert_locked(
            &mut dir,
            service_type,
            lower,
            upper,
            scope,
            self.config.own_node,
            port,
            key,
        )?;
        dir.local_publications += 1;
        self.hook.on_publish(&publ);
        Ok(publ)
    }

    /// Withdraw a binding owned by this node.
    pub fn withdraw(
        &self,
        service_type: u32,
        instance: u32,
        port: PortId,
        key: u32,
    ) -> Option<Arc<Publication>> {
        let mut dir = self.state.lock();
        match self.remove_locked(
            &mut dir,
            service_type,
            instance,
            self.config.own_node,
            port,
            key,
        ) {
            Some(publ) => {
                dir.local_publications = dir.local_publications.saturating_sub(1);
                self.hook.on_withdraw(&publ);
                Some(publ)
            }
            None => {
                log::warn!(
                    "[ServiceDirectory] unable to withdraw unknown publication \
                     (type={}, instance={}, port={}, key={})",
                    service_type,
                    instance,
                    port,
                    key
                );
                None
            }
        }
    }

    /// Attach a subscription, creating the service entry when necessary.
    ///
    /// The initial snapshot (unless filtered) is delivered before this
    /// returns, and strictly before any later publish on the same type.
    pub fn subscribe(&self, sub: &Arc<Subscription>) {
        let mut dir = self.state.lock();
        let service = self.find_or_create_service(&mut dir, sub.service_type());
        let mut inner = service.inner.lock();
        inner.subscribe(sub.clone());
    }

    /// Detach a subscription and collect the service entry if it became
    /// garbage.
    pub fn unsubscribe(&self, sub: &Arc<Subscription>) {
        let mut dir = self.state.lock();
        if let Some(service) = self.find_service(sub.service_type()) {
            let mut inner = service.inner.lock();
            inner.subscriptions.retain(|s| !Arc::ptr_eq(s, sub));
            if inner.is_garbage() {
                drop(inner);
                self.unlink_service(&mut dir, &service);
            }
        }
    }

    /// Resolve one instance to a single binding.
    ///
    /// - `dest_node = None`: closest-first - prefer the head of the local
    ///   list while any local binding exists, else take the head of the
    ///   full list.
    /// - `dest_node = Some(own_node)`: the binding must be local; a type
    ///   that only has remote bindings does not match.
    /// - `dest_node = Some(other)`: round-robin over the full list.
    ///
    /// Every branch rotates the chosen entry to the tail of the list it
    /// came from, so repeated calls cycle through the members.
    pub fn translate(
        &self,
        service_type: u32,
        instance: u32,
        dest_node: Option<NodeId>,
    ) -> Option<Binding> {
        let service = self.find_service(service_type)?;
        let mut inner = service.inner.lock();
        let index = inner.find_range(instance)?;
        let set = &mut inner.ranges[index].bindings;

        let publ = match dest_node {
            None => {
                if !set.local.is_empty() {
                    set.local.select_rotate()
                } else {
                    set.all.select_rotate()
                }
            }
            Some(node) if node == self.config.own_node => set.local.select_rotate(),
            Some(_) => set.all.select_rotate(),
        }?;

        Some(Binding::new(publ.node, publ.port))
    }

    /// Collect the anycast destination set for one instance.
    ///
    /// Only publications with exactly the requested scope qualify; the
    /// caller's own `(exclude_port, own_node)` binding is skipped. With
    /// `all = false` the scan stops at the first acceptable binding and
    /// rotates it to the tail (round robin across repeated calls); with
    /// `all = true` every match is collected. Destinations are
    /// deduplicated by `(node, port)`.
    pub fn lookup(
        &self,
        service_type: u32,
        instance: u32,
        scope: Scope,
        exclude_port: PortId,
        all: bool,
    ) -> DestList {
        let mut dests = DestList::new();
        let Some(service) = self.find_service(service_type) else {
            return dests;
        };
        let mut inner = service.inner.lock();
        let Some(index) = inner.find_range(instance) else {
            return dests;
        };

        let list = &mut inner.ranges[index].bindings.all;
        for i in 0..list.len() {
            let Some(publ) = list.get(i) else { break };
            if publ.scope != scope {
                continue;
            }
            if publ.port == exclude_port && publ.node == self.config.own_node {
                continue;
            }
            dests.push(publ.node, publ.port);
            if all {
                continue;
            }
            list.rotate_to_tail(i);
            break;
        }
        dests
    }

    /// Collect node-local ports bound anywhere in `[lower, upper]`.
    ///
    /// With `exact` only publications of exactly the requested scope
    /// qualify; otherwise coarser scopes are included as well. This is the
    /// node-local multicast fan-out.
    pub fn multicast_lookup(
        &self,
        service_type: u32,
        lower: u32,
        upper: u32,
        scope: Scope,
        exact: bool,
    ) -> Vec<PortId> {
        let mut ports = Vec::new();
        let Some(service) = self.find_service(service_type) else {
            return ports;
        };
        let inner = service.inner.lock();
        for range in &inner.ranges[inner.locate_range(lower)..] {
            if range.lower > upper {
                break;
            }
            for publ in range.bindings.local.iter() {
                if (publ.scope == scope || (!exact && publ.scope < scope))
                    && !ports.contains(&publ.port)
                {
                    ports.push(publ.port);
                }
            }
        }
        ports
    }

    /// Distinct nodes publishing anywhere in `[lower, upper]`.
    ///
    /// Used for broadcast planning.
    pub fn collect_destination_nodes(
        &self,
        service_type: u32,
        lower: u32,
        upper: u32,
    ) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        let Some(service) = self.find_service(service_type) else {
            return nodes;
        };
        let inner = service.inner.lock();
        for range in &inner.ranges[inner.locate_range(lower)..] {
            if range.lower > upper {
                break;
            }
            for publ in range.bindings.all.iter() {
                if !nodes.contains(&publ.node) {
                    nodes.push(publ.node);
                }
            }
        }
        nodes
    }

    /// Feed every exact-scope binding of a type into an external group
    /// membership structure as `(node, port, range_lower)` triples.
    ///
    /// `add_member` runs under the service lock and must not call back into
    /// the directory.
    pub fn build_group<F>(&self, service_type: u32, scope: Scope, mut add_member: F)
    where
        F: FnMut(NodeId, PortId, u32),
    {
        let Some(service) = self.find_service(service_type) else {
            return;
        };
        let inner = service.inner.lock();
        for range in &inner.ranges {
            for publ in range.bindings.all.iter() {
                if publ.scope != scope {
                    continue;
                }
                add_member(publ.node, publ.port, publ.lower);
            }
        }
    }

    /// Remove every remaining publication and unlink every service entry.
    ///
    /// Each publication leaves through the normal removal path, so
    /// `Withdrawn` events fire and the local counter stays consistent.
    /// Entries referenced by concurrent readers stay alive until those
    /// references drop.
    pub fn shutdown(&self) {
        let mut dir = self.state.lock();
        for slot in self.buckets.iter() {
            let chain = slot.load_full();
            if chain.is_empty() {
                continue;
            }
            for service in chain.iter() {
                let mut inner = service.inner.lock();
                while let Some(publ) = inner.first_publication() {
                    let removed = inner.remove_publication(
                        self.config.own_node,
                        publ.lower,
                        publ.node,
                        publ.port,
                        publ.key,
                    );
                    if let Some(removed) = removed {
                        if removed.node == self.config.own_node {
                            dir.local_publications = dir.local_publications.saturating_sub(1);
                        }
                    } else {
                        break;
                    }
                }
            }
            slot.store(Arc::new(Vec::new()));
        }
    }
}

impl fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("own_node", &self.config.own_node)
            .field("buckets", &self.buckets.len())
            .field("services", &self.service_count())
            .field("local_publications", &self.local_publication_count())
            .finish()
    }
}
