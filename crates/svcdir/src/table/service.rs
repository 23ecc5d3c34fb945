// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-type service entry: the sorted range array and its binding sets.
//!
//! All ranges of one service type live in a growable array sorted ascending
//! by lower bound, pairwise disjoint and never coalesced. The array is
//! binary searched on the hot lookup path; insertion and deletion shift
//! entries to keep it dense. Everything here runs under the owning
//! [`Service`]'s lock, including subscription delivery.

use std::sync::Arc;

use parking_lot::Mutex;

use super::binding::BindingSet;
use super::publication::{NodeId, PortId, Publication, Scope};
use super::PublishError;
use crate::subscription::{EventKind, Subscription};

/// One disjoint `[lower, upper]` instance range and its bindings.
#[derive(Debug)]
pub(crate) struct ServiceRange {
    pub lower: u32,
    pub upper: u32,
    pub bindings: BindingSet,
}

/// State of one service type, guarded by the service lock.
#[derive(Debug, Default)]
pub(crate) struct ServiceInner {
    /// Live ranges, sorted ascending by `lower`. The vector only ever grows
    /// its capacity; its length is the live-entry count.
    pub ranges: Vec<ServiceRange>,
    pub subscriptions: Vec<Arc<Subscription>>,
}

/// All published ranges of one service type.
pub(crate) struct Service {
    pub service_type: u32,
    pub inner: Mutex<ServiceInner>,
}

impl Service {
    pub fn new(service_type: u32) -> Self {
        Self {
            service_type,
            inner: Mutex::new(ServiceInner {
                ranges: Vec::with_capacity(1),
                subscriptions: Vec::new(),
            }),
        }
    }
}

impl ServiceInner {
    /// Binary search for the unique range containing `instance`.
    pub fn find_range(&self, instance: u32) -> Option<usize> {
        let mut low = 0isize;
        let mut high = self.ranges.len() as isize - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let range = &self.ranges[mid as usize];
            if instance < range.lower {
                high = mid - 1;
            } else if instance > range.upper {
                low = mid + 1;
            } else {
                return Some(mid as usize);
            }
        }
        None
    }

    /// Position of `instance` in the range array.
    ///
    /// Returns the index of the containing range if one exists, otherwise
    /// the index where a range starting at `instance` would be inserted,
    /// which is also the first index a forward range scan must visit.
    pub fn locate_range(&self, instance: u32) -> usize {
        let mut low = 0isize;
        let mut high = self.ranges.len() as isize - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let range = &self.ranges[mid as usize];
            if instance < range.lower {
                high = mid - 1;
            } else if instance > range.upper {
                low = mid + 1;
            } else {
                return mid as usize;
            }
        }
        low as usize
    }

    /// Insert one publication, creating its range slot when needed.
    ///
    /// Enforces the strict non-overlap invariant: a range sharing any
    /// instance with an existing one must match it exactly, and an exact
    /// match rejects duplicate `(port, key)` bindings. All rejections
    /// happen before anything is linked in.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_publication(
        &mut self,
        own_node: NodeId,
        service_type: u32,
        lower: u32,
        upper: u32,
        scope: Scope,
        node: NodeId,
        port: PortId,
        key: u32,
    ) -> Result<Arc<Publication>, PublishError> {
        let mut created_range = false;

        let index = match self.find_range(lower) {
            Some(index) => {
                let range = &self.ranges[index];

                // Lower end overlaps an existing entry: exact match required.
                if range.lower != lower || range.upper != upper {
                    return Err(PublishError::Overlap);
                }

                // Identical binding already present?
                if range.bindings.all.iter().any(|p| p.matches(node, port, key)) {
                    return Err(PublishError::Duplicate);
                }
                index
            }
            None => {
                let inspos = self.locate_range(lower);

                // Upper end must not reach into the next entry.
                if inspos < self.ranges.len() && upper >= self.ranges[inspos].lower {
                    return Err(PublishError::Overlap);
                }

                self.ranges.insert(
                    inspos,
                    ServiceRange {
                        lower,
                        upper,
                        bindings: BindingSet::new(),
                    },
                );
                created_range = true;
                inspos
            }
        };

        let publ = Arc::new(Publication::new(
            service_type,
            lower,
            upper,
            scope,
            node,
            port,
            key,
        ));

        let bindings = &mut self.ranges[index].bindings;
        bindings.all.add(publ.clone());
        if node == own_node {
            bindings.local.add(publ.clone());
        }

        log::debug!(
            "[Service] inserted publication {} (created_range={})",
            publ,
            created_range
        );

        for sub in &self.subscriptions {
            sub.report_overlap(
                EventKind::Published,
                publ.lower,
                publ.upper,
                publ.port,
                publ.node,
                publ.scope,
                created_range,
            );
        }

        Ok(publ)
    }

    /// Remove the publication matching `(port, key, node)` from the range
    /// containing `instance`.
    ///
    /// Not-found is a normal outcome: a remote withdraw may chase a remote
    /// publish this node rejected, so the requested binding was never
    /// recorded here. When the last binding leaves a range, the range slot
    /// is deleted and the array compacted.
    pub fn remove_publication(
        &mut self,
        own_node: NodeId,
        instance: u32,
        node: NodeId,
        port: PortId,
        key: u32,
    ) -> Option<Arc<Publication>> {
        let index = self.find_range(instance)?;

        let range = &mut self.ranges[index];
        let pos = range.bindings.all.position(|p| p.matches(node, port, key))?;
        let publ = range.bindings.all.get(pos)?.clone();

        range.bindings.all.remove_entry(&publ);
        if publ.node == own_node {
            range.bindings.local.remove_entry(&publ);
        }

        // Contract the range array if this was the last binding.
        let removed_range = range.bindings.is_empty();
        if removed_range {
            self.ranges.remove(index);
        }

        for sub in &self.subscriptions {
            sub.report_overlap(
                EventKind::Withdrawn,
                publ.lower,
                publ.upper,
                publ.port,
                publ.node,
                publ.scope,
                removed_range,
            );
        }

        Some(publ)
    }

    /// Attach a subscription and deliver its initial snapshot.
    ///
    /// Unless the filter suppresses status events, every publication of
    /// every range overlapping the subscribed window is reported once, with
    /// the transition marker set on the first publication of each range.
    pub fn subscribe(&mut self, sub: Arc<Subscription>) {
        let no_status = sub
            .filter()
            .contains(crate::subscription::EventFilter::NO_STATUS);

        self.subscriptions.push(sub.clone());

        if no_status {
            return;
        }

        for range in &self.ranges {
            if !sub.overlaps(range.lower, range.upper) {
                continue;
            }
            let mut must_report = true;
            for publ in range.bindings.all.iter() {
                sub.report_overlap(
                    EventKind::Published,
                    range.lower,
                    range.upper,
                    publ.port,
                    publ.node,
                    publ.scope,
                    must_report,
                );
                must_report = false;
            }
        }
    }

    /// First publication in range order, if any. Used by the shutdown purge.
    pub fn first_publication(&self) -> Option<Arc<Publication>> {
        self.ranges
            .first()
            .and_then(|range| range.bindings.all.get(0))
            .cloned()
    }

    /// A service with no ranges and no subscriptions is garbage.
    pub fn is_garbage(&self) -> bool {
        self.ranges.is_empty() && self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{ChannelSink, EventFilter, ServiceEvent};

    const OWN: NodeId = 1;
    const TYPE: u32 = 4000;

    fn insert(
        inner: &mut ServiceInner,
        lower: u32,
        upper: u32,
        node: NodeId,
        port: PortId,
        key: u32,
    ) -> Result<Arc<Publication>, PublishError> {
        inner.insert_publication(OWN, TYPE, lower, upper, Scope::Cluster, node, port, key)
    }

    #[test]
    fn test_find_range_binary_search() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();
        insert(&mut inner, 30, 39, OWN, 101, 2).unwrap();
        insert(&mut inner, 50, 59, OWN, 102, 3).unwrap();

        assert_eq!(inner.find_range(10), Some(0));
        assert_eq!(inner.find_range(35), Some(1));
        assert_eq!(inner.find_range(59), Some(2));
        assert_eq!(inner.find_range(9), None);
        assert_eq!(inner.find_range(25), None);
        assert_eq!(inner.find_range(60), None);
    }

    #[test]
    fn test_locate_range_insertion_points() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();
        insert(&mut inner, 30, 39, OWN, 101, 2).unwrap();

        assert_eq!(inner.locate_range(5), 0);
        assert_eq!(inner.locate_range(15), 0); // containing index
        assert_eq!(inner.locate_range(25), 1);
        assert_eq!(inner.locate_range(35), 1);
        assert_eq!(inner.locate_range(99), 2);
    }

    #[test]
    fn test_insert_keeps_ranges_sorted() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 50, 59, OWN, 100, 1).unwrap();
        insert(&mut inner, 10, 19, OWN, 101, 2).unwrap();
        insert(&mut inner, 30, 39, OWN, 102, 3).unwrap();

        let lowers: Vec<u32> = inner.ranges.iter().map(|r| r.lower).collect();
        assert_eq!(lowers, vec![10, 30, 50]);
    }

    #[test]
    fn test_partial_overlap_rejected() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 20, OWN, 100, 1).unwrap();

        // Same lower, different upper.
        assert_eq!(
            insert(&mut inner, 10, 25, OWN, 101, 2),
            Err(PublishError::Overlap)
        );
        // Lower inside the existing range.
        assert_eq!(
            insert(&mut inner, 15, 30, OWN, 101, 2),
            Err(PublishError::Overlap)
        );
        // New upper reaching into the existing range from below.
        assert_eq!(
            insert(&mut inner, 5, 10, OWN, 101, 2),
            Err(PublishError::Overlap)
        );
        assert_eq!(inner.ranges.len(), 1);
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 20, OWN, 100, 1).unwrap();

        assert_eq!(
            insert(&mut inner, 10, 20, OWN, 100, 1),
            Err(PublishError::Duplicate)
        );
        // Different key on the same port: distinct binding, accepted.
        insert(&mut inner, 10, 20, OWN, 100, 2).unwrap();
        // Different port, same key: also distinct.
        insert(&mut inner, 10, 20, OWN, 101, 1).unwrap();
        assert_eq!(inner.ranges[0].bindings.all.len(), 3);
    }

    #[test]
    fn test_wildcard_node_blocks_duplicates_from_any_node() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 20, 0, 100, 1).unwrap();
        assert_eq!(
            insert(&mut inner, 10, 20, 42, 100, 1),
            Err(PublishError::Duplicate)
        );
    }

    #[test]
    fn test_local_list_membership() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 20, OWN, 100, 1).unwrap();
        insert(&mut inner, 10, 20, 99, 200, 2).unwrap();

        let set = &inner.ranges[0].bindings;
        assert_eq!(set.all.len(), 2);
        assert_eq!(set.local.len(), 1);
        assert_eq!(set.local.get(0).unwrap().port, 100);
    }

    #[test]
    fn test_remove_last_binding_compacts_array() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();
        insert(&mut inner, 30, 39, OWN, 101, 2).unwrap();

        let removed = inner.remove_publication(OWN, 15, OWN, 100, 1).unwrap();
        assert_eq!(removed.port, 100);
        assert_eq!(inner.ranges.len(), 1);
        assert_eq!(inner.find_range(15), None);
        assert_eq!(inner.find_range(35), Some(0));
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();

        assert!(inner.remove_publication(OWN, 15, OWN, 100, 999).is_none());
        assert!(inner.remove_publication(OWN, 99, OWN, 100, 1).is_none());
        assert_eq!(inner.ranges.len(), 1);
    }

    #[test]
    fn test_insert_events_carry_created_flag() {
        let mut inner = ServiceInner::default();
        let (sink, rx) = ChannelSink::unbounded();
        let sub = Subscription::new(TYPE, 0, 100, EventFilter::PORTS, sink);
        inner.subscribe(sub);

        insert(&mut inner, 10, 20, OWN, 100, 1).unwrap();
        insert(&mut inner, 10, 20, OWN, 101, 2).unwrap();

        let first: ServiceEvent = rx.try_recv().unwrap();
        let second: ServiceEvent = rx.try_recv().unwrap();
        assert!(first.first_report, "range was created by the first insert");
        assert!(!second.first_report, "second insert reuses the range");
        assert_eq!(first.kind, EventKind::Published);
    }

    #[test]
    fn test_remove_events_carry_removed_flag() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 20, OWN, 100, 1).unwrap();
        insert(&mut inner, 10, 20, OWN, 101, 2).unwrap();

        let (sink, rx) = ChannelSink::unbounded();
        let sub = Subscription::new(
            TYPE,
            0,
            100,
            EventFilter::PORTS | EventFilter::NO_STATUS,
            sink,
        );
        inner.subscribe(sub);

        inner.remove_publication(OWN, 10, OWN, 100, 1).unwrap();
        inner.remove_publication(OWN, 10, OWN, 101, 2).unwrap();

        let first: ServiceEvent = rx.try_recv().unwrap();
        let second: ServiceEvent = rx.try_recv().unwrap();
        assert_eq!(first.kind, EventKind::Withdrawn);
        assert!(!first.first_report, "one binding left, range survives");
        assert!(second.first_report, "last withdraw removes the range");
    }

    #[test]
    fn test_subscribe_snapshot_one_transition_per_range() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();
        insert(&mut inner, 10, 19, OWN, 101, 2).unwrap();
        insert(&mut inner, 30, 39, OWN, 102, 3).unwrap();

        let (sink, rx) = ChannelSink::unbounded();
        inner.subscribe(Subscription::new(TYPE, 0, 100, EventFilter::PORTS, sink));

        let events: Vec<ServiceEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        let transitions = events.iter().filter(|e| e.first_report).count();
        assert_eq!(transitions, 2, "one transition marker per range");
    }

    #[test]
    fn test_subscribe_snapshot_skips_non_overlapping_ranges() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();
        insert(&mut inner, 30, 39, OWN, 101, 2).unwrap();

        let (sink, rx) = ChannelSink::unbounded();
        inner.subscribe(Subscription::new(TYPE, 0, 15, EventFilter::PORTS, sink));

        let events: Vec<ServiceEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].lower, 10);
    }

    #[test]
    fn test_no_status_suppresses_snapshot_only() {
        let mut inner = ServiceInner::default();
        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();

        let (sink, rx) = ChannelSink::unbounded();
        inner.subscribe(Subscription::new(
            TYPE,
            0,
            100,
            EventFilter::PORTS | EventFilter::NO_STATUS,
            sink,
        ));
        assert!(rx.try_recv().is_err(), "snapshot suppressed");

        insert(&mut inner, 10, 19, OWN, 101, 2).unwrap();
        assert!(rx.try_recv().is_ok(), "live events still delivered");
    }

    #[test]
    fn test_is_garbage() {
        let mut inner = ServiceInner::default();
        assert!(inner.is_garbage());

        insert(&mut inner, 10, 19, OWN, 100, 1).unwrap();
        assert!(!inner.is_garbage());

        inner.remove_publication(OWN, 10, OWN, 100, 1).unwrap();
        assert!(inner.is_garbage());
    }
}
