// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Boundary to the per-node distribution layer.
//!
//! The directory itself is purely local. Propagating local publishes and
//! withdraws to other nodes is the distribution layer's job; it plugs in
//! through [`DistributionHook`] and feeds remote changes back through
//! `ServiceDirectory::insert_publication` / `remove_publication`.

use crate::table::Publication;

/// Callbacks invoked after a successful local publish or withdraw.
///
/// Both are called while the directory lock is still held, so the hook
/// observes mutations in exactly the order they were applied and no later
/// publish can overtake a pending notification. Implementations must be
/// quick, must not block, and must not call back into the directory.
pub trait DistributionHook: Send + Sync {
    fn on_publish(&self, publication: &Publication);
    fn on_withdraw(&self, publication: &Publication);
}

/// Hook for standalone deployments: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDistribution;

impl DistributionHook for NoDistribution {
    fn on_publish(&self, _publication: &Publication) {}
    fn on_withdraw(&self, _publication: &Publication) {}
}
