//! Session-wide counters.
//!
//! Updated from the tick path with relaxed atomics; readers take a
//! [`StatsSnapshot`] which is internally consistent only per field.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    encode_failures: AtomicU64,
    capture_failures: AtomicU64,
    messages_rejected: AtomicU64,
    commands_applied: AtomicU64,
    replies_sent: AtomicU64,
    replies_dropped: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub encode_failures: u64,
    pub capture_failures: u64,
    pub messages_rejected: u64,
    pub commands_applied: u64,
    pub replies_sent: u64,
    pub replies_dropped: u64,
}

impl StatsSnapshot {
    /// `(key, value)` pairs for a `STATS` reply, in field order.
    pub fn to_args(&self) -> Vec<(String, String)> {
        [
            ("frames_sent", self.frames_sent),
            ("frames_dropped", self.frames_dropped),
            ("encode_failures", self.encode_failures),
            ("capture_failures", self.capture_failures),
            ("messages_rejected", self.messages_rejected),
            ("commands_applied", self.commands_applied),
            ("replies_sent", self.replies_sent),
            ("replies_dropped", self.replies_dropped),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_dropped(&self) {
        self.replies_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
        }
    }
}
