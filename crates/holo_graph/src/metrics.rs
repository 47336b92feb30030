//! In-process counters for statistics requests.
//!
//! Lock-free so partition units can update them without coordination. They
//! are diagnostics only and never feed back into query results.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StatsMetrics {
    /// Requests that passed column resolution.
    requests: AtomicU64,
    partitions_succeeded: AtomicU64,
    partitions_failed: AtomicU64,
    vertices_processed: AtomicU64,
    /// Tag rows found and decoded, one per (vertex, tag) hit.
    tag_rows_read: AtomicU64,
    edges_scanned: AtomicU64,
    rows_emitted: AtomicU64,
    /// Malformed keys, undecodable rows and type mismatches skipped while folding.
    codec_errors_absorbed: AtomicU64,
}

/// Point-in-time copy of [`StatsMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsMetricsSnapshot {
    pub requests: u64,
    pub partitions_succeeded: u64,
    pub partitions_failed: u64,
    pub vertices_processed: u64,
    pub tag_rows_read: u64,
    pub edges_scanned: u64,
    pub rows_emitted: u64,
    pub codec_errors_absorbed: u64,
}

impl StatsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partition(&self, succeeded: bool) {
        if succeeded {
            self.partitions_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.partitions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records the work done by one partition unit.
    pub fn record_scan(&self, vertices: u64, tag_rows: u64, edges: u64) {
        self.vertices_processed.fetch_add(vertices, Ordering::Relaxed);
        self.tag_rows_read.fetch_add(tag_rows, Ordering::Relaxed);
        self.edges_scanned.fetch_add(edges, Ordering::Relaxed);
    }

    pub fn record_rows_emitted(&self, rows: u64) {
        self.rows_emitted.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_codec_errors(&self, count: u64) {
        if count > 0 {
            self.codec_errors_absorbed
                .fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsMetricsSnapshot {
        StatsMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            partitions_succeeded: self.partitions_succeeded.load(Ordering::Relaxed),
            partitions_failed: self.partitions_failed.load(Ordering::Relaxed),
            vertices_processed: self.vertices_processed.load(Ordering::Relaxed),
            tag_rows_read: self.tag_rows_read.load(Ordering::Relaxed),
            edges_scanned: self.edges_scanned.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            codec_errors_absorbed: self.codec_errors_absorbed.load(Ordering::Relaxed),
        }
    }
}
