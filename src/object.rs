//! object.rs
//! Process-wide modification clock shared by every pipeline entity.

use std::sync::atomic::{AtomicU64, Ordering};

static CLOCK: AtomicU64 = AtomicU64::new(0);

/// Timestamp carrier embedded in nodes, ports, algorithms and executives.
/// A value of 0 means "never modified".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Object {
    timestamp: u64,
}

impl Object {
    pub fn new() -> Self { Self::default() }

    /// Stamps the object with the next value of the global clock.
    #[inline(always)]
    pub fn modified(&mut self) {
        self.timestamp = CLOCK.fetch_add(1, Ordering::Relaxed) + 1;
    }

    #[inline(always)]
    pub fn timestamp(&self) -> u64 { self.timestamp }

    /// Latest value handed out by the global clock.
    pub fn now() -> u64 { CLOCK.load(Ordering::Relaxed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_object_is_unmodified() {
        assert_eq!(Object::new().timestamp(), 0);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut a = Object::new();
        let mut b = Object::new();
        a.modified();
        b.modified();
        assert!(a.timestamp() > 0);
        assert!(b.timestamp() > a.timestamp());

        let before = a.timestamp();
        a.modified();
        assert!(a.timestamp() > before);
        assert!(a.timestamp() > b.timestamp());
    }

    #[test]
    fn test_now_tracks_latest_stamp() {
        let mut a = Object::new();
        a.modified();
        assert!(Object::now() >= a.timestamp());
        let seen = Object::now();
        a.modified();
        assert!(a.timestamp() > seen);
    }
}
