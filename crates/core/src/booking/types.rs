//! Booking status reporting types.

use serde::Serialize;

use super::cleanup::CleanupFailure;

/// Derived state of an open or just-orphaned booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    /// Bytes are still arriving.
    Polling,
    /// The staged file has reached its expected size.
    Ready,
    /// The transfer vanished before completion; the partial file is gone.
    Orphaned,
}

impl BookingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::Polling => "polling",
            BookingState::Ready => "ready",
            BookingState::Orphaned => "orphaned",
        }
    }
}

/// One booking as reported by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingStatus {
    pub booking_id: i64,
    pub action_id: i64,
    pub transaction_id: i64,
    pub file_name: String,
    pub expected_size: u64,
    /// Size found on disk, or `-1` once orphaned.
    pub observed_size: i64,
    pub completion_url: Option<String>,
    pub state: BookingState,
}

/// Outcome of closing bookings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    /// Bookings moved to Closed by this call.
    pub closed: Vec<i64>,
    /// Requested bookings that were already Closed or Orphaned.
    pub skipped: Vec<i64>,
    /// Staged paths that could not be removed.
    pub cleanup_failures: Vec<CleanupFailure>,
}
