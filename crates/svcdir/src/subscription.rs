// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriptions and overlap event delivery.
//!
//! A [`Subscription`] registers a standing interest in one service type over
//! an instance window `[lower, upper]`. Whenever a binding whose range
//! overlaps that window is published or withdrawn, the directory delivers a
//! [`ServiceEvent`] to the subscription's [`EventSink`] - synchronously,
//! while the owning service's lock is still held, so the sink observes a
//! fully consistent table and events for one type arrive in mutation order.
//!
//! # Thread Safety
//!
//! Sinks are called from whichever thread performed the mutation, with the
//! service lock held. They must be `Send + Sync`, must not block, and must
//! not call back into the directory.

use std::fmt;
use std::sync::Arc;

use crate::table::{NodeId, PortId, Scope};

/// What happened to a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A binding overlapping the subscribed window appeared.
    Published,
    /// A binding overlapping the subscribed window disappeared.
    Withdrawn,
}

/// One overlap notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEvent {
    pub kind: EventKind,
    pub service_type: u32,
    /// Lower bound of the range the binding belongs to.
    pub lower: u32,
    /// Upper bound of the range the binding belongs to.
    pub upper: u32,
    pub port: PortId,
    pub node: NodeId,
    pub scope: Scope,
    /// Range-transition marker.
    ///
    /// On a live `Published` event: this publication created its range. On a
    /// live `Withdrawn` event: removing it emptied the range. During the
    /// subscribe-time snapshot: set on the first publication reported for
    /// each overlapping range.
    pub first_report: bool,
}

/// Subscription filter bits.
///
/// The default (empty) filter delivers only range transitions: events with
/// `first_report` set. `PORTS` widens delivery to every binding change
/// inside the window; `NO_STATUS` suppresses the subscribe-time snapshot of
/// bindings that already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFilter(u32);

impl EventFilter {
    /// Report every individual binding change, not just range transitions.
    pub const PORTS: EventFilter = EventFilter(0x1);
    /// Skip the initial snapshot of already-existing bindings.
    pub const NO_STATUS: EventFilter = EventFilter(0x2);

    pub const fn empty() -> Self {
        EventFilter(0)
    }

    pub const fn contains(self, other: EventFilter) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EventFilter {
    type Output = EventFilter;

    fn bitor(self, rhs: EventFilter) -> EventFilter {
        EventFilter(self.0 | rhs.0)
    }
}

/// Receiver end of subscription delivery.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: ServiceEvent);
}

/// Adapter turning any closure into an [`EventSink`].
pub struct ClosureSink<F>(F);

impl<F: Fn(ServiceEvent) + Send + Sync> ClosureSink<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: Fn(ServiceEvent) + Send + Sync> EventSink for ClosureSink<F> {
    fn notify(&self, event: ServiceEvent) {
        (self.0)(event);
    }
}

/// [`EventSink`] forwarding events over a crossbeam channel.
///
/// Keeps delivery out of the subscriber's way: the mutating thread only
/// enqueues, the subscriber drains the receiver at its own pace. Events
/// sent after the receiver is dropped are discarded.
pub struct ChannelSink {
    tx: crossbeam::channel::Sender<ServiceEvent>,
}

impl ChannelSink {
    /// Create an unbounded sink/receiver pair.
    pub fn unbounded() -> (Arc<ChannelSink>, crossbeam::channel::Receiver<ServiceEvent>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Arc::new(ChannelSink { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: ServiceEvent) {
        let _ = self.tx.send(event);
    }
}

/// A standing interest registration on `(service_type, lower, upper)`.
///
/// Shared (`Arc`) between the external subscriber and the directory's
/// per-service subscription list, because event delivery may race removal;
/// the registration is freed when the last owner lets go.
pub struct Subscription {
    service_type: u32,
    lower: u32,
    upper: u32,
    filter: EventFilter,
    sink: Arc<dyn EventSink>,
}

impl Subscription {
    pub fn new(
        service_type: u32,
        lower: u32,
        upper: u32,
        filter: EventFilter,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_type,
            lower,
            upper,
            filter,
            sink,
        })
    }

    pub fn service_type(&self) -> u32 {
        self.service_type
    }

    pub fn lower(&self) -> u32 {
        self.lower
    }

    pub fn upper(&self) -> u32 {
        self.upper
    }

    pub fn filter(&self) -> EventFilter {
        self.filter
    }

    /// Closed-interval intersection with the subscribed window.
    pub fn overlaps(&self, found_lower: u32, found_upper: u32) -> bool {
        found_lower.max(self.lower) <= found_upper.min(self.upper)
    }

    /// Deliver one overlap event, subject to the overlap and filter gates.
    ///
    /// `must` marks range transitions; without the `PORTS` filter bit those
    /// are the only events that pass.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn report_overlap(
        &self,
        kind: EventKind,
        found_lower: u32,
        found_upper: u32,
        port: PortId,
        node: NodeId,
        scope: Scope,
        must: bool,
    ) {
        if !self.overlaps(found_lower, found_upper) {
            return;
        }
        if !must && !self.filter.contains(EventFilter::PORTS) {
            return;
        }
        self.sink.notify(ServiceEvent {
            kind,
            service_type: self.service_type,
            lower: found_lower,
            upper: found_upper,
            port,
            node,
            scope,
            first_report: must,
        });
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("service_type", &self.service_type)
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .field("filter", &self.filter)
            .finish()
    }
}
