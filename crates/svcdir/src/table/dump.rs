// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resumable paginated enumeration of the directory.
//!
//! External listing tools page through the whole table one bounded batch at
//! a time. The cursor remembers `(last_type, last_lower, last_key)` between
//! pages; consistency across pages is best-effort - entries added or removed
//! between calls may be missed or repeated, and a remembered position that
//! no longer exists surfaces as [`DumpError::ResumePointInvalid`] so the
//! caller can restart from scratch.

use std::fmt;

use super::publication::{NodeId, PortId, Publication, Scope};
use super::service::ServiceInner;
use super::ServiceDirectory;

/// Flattened view of one publication, safe to hand across the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationRecord {
    pub service_type: u32,
    pub lower: u32,
    pub upper: u32,
    pub scope: Scope,
    pub node: NodeId,
    pub port: PortId,
    pub key: u32,
}

impl From<&Publication> for PublicationRecord {
    fn from(publ: &Publication) -> Self {
        Self {
            service_type: publ.service_type,
            lower: publ.lower,
            upper: publ.upper,
            scope: publ.scope,
            node: publ.node,
            port: publ.port,
            key: publ.key,
        }
    }
}

/// Pagination state across `dump_next` calls.
///
/// A fresh cursor starts at the beginning of the table. After a partial
/// page the cursor points at the first record not yet delivered.
#[derive(Debug, Clone, Default)]
pub struct DumpCursor {
    pub(crate) last_type: u32,
    pub(crate) last_lower: u32,
    pub(crate) last_key: u32,
    pub(crate) done: bool,
}

impl DumpCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the whole table has been delivered.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Errors raised by paginated enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpError {
    /// The position remembered by the cursor no longer exists; restart the
    /// dump with a fresh cursor.
    ResumePointInvalid,
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::ResumePointInvalid => write!(f, "dump resume point no longer exists"),
        }
    }
}

impl std::error::Error for DumpError {}

impl ServiceDirectory {
    /// Produce the next page of at most `max_records` publication records.
    ///
    /// Each service entry is read under its own lock; the directory lock is
    /// not taken, so dumping never blocks publishers on other types.
    /// Returns an empty page once the cursor is done.
    pub fn dump_next(
        &self,
        cursor: &mut DumpCursor,
        max_records: usize,
    ) -> Result<Vec<PublicationRecord>, DumpError> {
        let mut out = Vec::new();
        if cursor.done || max_records == 0 {
            return Ok(out);
        }

        let mut bucket = if cursor.last_type != 0 {
            self.bucket_index(cursor.last_type)
        } else {
            0
        };

        while bucket < self.buckets.len() {
            let chain = self.buckets[bucket].load_full();

            let mut start = 0;
            if cursor.last_type != 0 {
                // Resume inside this bucket's chain, at the remembered type.
                start = chain
                    .iter()
                    .position(|s| s.service_type == cursor.last_type)
                    .ok_or(DumpError::ResumePointInvalid)?;
            }

            for service in chain.iter().skip(start) {
                let inner = service.inner.lock();
                let page_full = dump_service(&inner, cursor, max_records, &mut out)?;
                if page_full {
                    cursor.last_type = service.service_type;
                    return Ok(out);
                }
            }

            cursor.last_type = 0;
            bucket += 1;
        }

        cursor.done = true;
        Ok(out)
    }
}

/// Emit one service's publications in range order, resuming from and
/// updating the cursor. Returns `true` when the page filled up mid-service.
fn dump_service(
    inner: &ServiceInner,
    cursor: &mut DumpCursor,
    max_records: usize,
    out: &mut Vec<PublicationRecord>,
) -> Result<bool, DumpError> {
    let mut index = 0;
    if cursor.last_lower != 0 {
        index = inner
            .find_range(cursor.last_lower)
            .ok_or(DumpError::ResumePointInvalid)?;
    }

    while index < inner.ranges.len() {
        let range = &inner.ranges[index];

        let mut skip = 0;
        if cursor.last_key != 0 {
            skip = range
                .bindings
                .all
                .position(|p| p.key == cursor.last_key)
                .ok_or(DumpError::ResumePointInvalid)?;
            cursor.last_key = 0;
        }

        for publ in range.bindings.all.iter().skip(skip) {
            if out.len() == max_records {
                // Remember the first record that did not fit.
                cursor.last_lower = range.lower;
                cursor.last_key = publ.key;
                return Ok(true);
            }
            out.push(PublicationRecord::from(publ.as_ref()));
        }

        index += 1;
    }

    cursor.last_lower = 0;
    Ok(false)
}
