//! Relay counters, shared between the relay loop and whoever reports them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct RelayStats {
    frames_forwarded: AtomicU64,
    frames_dropped: AtomicU64,
    commands_forwarded: AtomicU64,
    commands_rejected: AtomicU64,
    commands_dropped: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelaySnapshot {
    pub frames_forwarded: u64,
    /// Frames the downstream publisher could not queue.
    pub frames_dropped: u64,
    pub commands_forwarded: u64,
    /// Control messages that failed to decode or validate.
    pub commands_rejected: u64,
    /// Valid commands the upstream publisher could not queue.
    pub commands_dropped: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_forwarded(&self) {
        Self::bump(&self.frames_forwarded);
    }

    pub fn record_frame_dropped(&self) {
        Self::bump(&self.frames_dropped);
    }

    pub fn record_command_forwarded(&self) {
        Self::bump(&self.commands_forwarded);
    }

    pub fn record_command_rejected(&self) {
        Self::bump(&self.commands_rejected);
    }

    pub fn record_command_dropped(&self) {
        Self::bump(&self.commands_dropped);
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            commands_forwarded: self.commands_forwarded.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_events() {
        // Arrange
        let stats = RelayStats::new();

        // Act
        stats.record_frame_forwarded();
        stats.record_frame_forwarded();
        stats.record_command_rejected();

        // Assert
        assert_eq!(
            stats.snapshot(),
            RelaySnapshot {
                frames_forwarded: 2,
                commands_rejected: 1,
                ..RelaySnapshot::default()
            }
        );
    }

    #[test]
    fn test_snapshot_serializes_with_field_names() {
        let json = serde_json::to_value(RelayStats::new().snapshot()).unwrap();
        assert_eq!(json["frames_dropped"], 0);
        assert_eq!(json.as_object().unwrap().len(), 5);
    }
}
