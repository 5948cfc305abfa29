//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Booking engine (bookings created, orphaned, closed, polls)
//! - Streaming transfers (bytes served, aborted transfers)
//! - Catalog tooling (failed commands)

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts};

// =============================================================================
// Booking Engine
// =============================================================================

/// Bookings created.
pub static BOOKINGS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("fileport_bookings_created_total", "Total bookings created").unwrap()
});

/// Bookings found orphaned by polling.
pub static BOOKINGS_ORPHANED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fileport_bookings_orphaned_total",
            "Total bookings whose transfer vanished before completion",
        ),
        &["reason"], // "process_gone", "file_shrank"
    )
    .unwrap()
});

/// Bookings closed.
pub static BOOKINGS_CLOSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fileport_bookings_closed_total", "Total bookings closed"),
        &["via"], // "close", "download"
    )
    .unwrap()
});

/// Booking status evaluations.
pub static BOOKING_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fileport_booking_polls_total", "Booking status evaluations"),
        &["state"], // "polling", "ready", "orphaned"
    )
    .unwrap()
});

// =============================================================================
// Streaming Transfers
// =============================================================================

/// Bytes delivered to clients.
pub static BYTES_STREAMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fileport_bytes_streamed_total", "Bytes streamed to clients"),
        &["mode"], // "staged", "catalog"
    )
    .unwrap()
});

/// Transfers that ended before the declared length was delivered.
pub static TRANSFERS_ABORTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fileport_transfers_aborted_total",
            "Streaming transfers aborted by an error or a disconnect",
        ),
        &["mode"],
    )
    .unwrap()
});

// =============================================================================
// Catalog
// =============================================================================

/// Catalog command failures.
pub static CATALOG_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fileport_catalog_failures_total",
            "Catalog operations that failed",
        ),
        &["operation"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Bookings
        Box::new(BOOKINGS_CREATED.clone()),
        Box::new(BOOKINGS_ORPHANED.clone()),
        Box::new(BOOKINGS_CLOSED.clone()),
        Box::new(BOOKING_POLLS.clone()),
        // Transfers
        Box::new(BYTES_STREAMED.clone()),
        Box::new(TRANSFERS_ABORTED.clone()),
        // Catalog
        Box::new(CATALOG_FAILURES.clone()),
    ]
}
