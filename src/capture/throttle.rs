// src/capture/throttle.rs
//! Leading-edge throttle with trailing coalescing
//!
//! The first item in a quiet period goes out immediately. Items arriving
//! inside the window replace each other; the survivor is released when the
//! window closes. At most one item leaves per window.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Throttle<T> {
    window: Duration,
    last_emit: Option<Instant>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: None,
            pending: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Offer an item; returns it when it may be sent right away
    pub fn offer(&mut self, now: Instant, item: T) -> Option<T> {
        match self.last_emit {
            Some(last) if now < last + self.window => {
                // Most recent wins
                self.pending = Some(item);
                None
            }
            _ => {
                self.last_emit = Some(now);
                self.pending = None;
                Some(item)
            }
        }
    }

    /// When the pending item becomes due
    pub fn deadline(&self) -> Option<Instant> {
        match (&self.pending, self.last_emit) {
            (Some(_), Some(last)) => Some(last + self.window),
            _ => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Release the pending item if its window has closed
    pub fn fire(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last_emit = Some(now);
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drop the pending item and forget the last emission
    pub fn cancel(&mut self) {
        self.pending = None;
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(50);

    #[test]
    fn test_first_item_passes() {
        let mut throttle = Throttle::new(WINDOW);
        let now = Instant::now();

        assert_eq!(throttle.offer(now, 1), Some(1));
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn test_burst_coalesces_to_latest() {
        let mut throttle = Throttle::new(WINDOW);
        let start = Instant::now();

        let mut emitted = Vec::new();
        for i in 0..100u32 {
            let now = start + Duration::from_micros(i as u64 * 400);
            emitted.extend(throttle.offer(now, i));
        }

        // Only the leading item went out inside the window
        assert_eq!(emitted, vec![0]);
        assert_eq!(throttle.deadline(), Some(start + WINDOW));

        // Not yet due
        assert_eq!(throttle.fire(start + Duration::from_millis(49)), None);

        assert_eq!(throttle.fire(start + WINDOW), Some(99));
        assert!(!throttle.has_pending());
        assert_eq!(throttle.deadline(), None);
    }

    #[test]
    fn test_trailing_emission_starts_new_window() {
        let mut throttle = Throttle::new(WINDOW);
        let start = Instant::now();

        throttle.offer(start, 'a');
        throttle.offer(start + Duration::from_millis(10), 'b');
        assert_eq!(throttle.fire(start + WINDOW), Some('b'));

        // Inside the window opened by the trailing emission
        assert_eq!(throttle.offer(start + Duration::from_millis(60), 'c'), None);
        assert_eq!(
            throttle.deadline(),
            Some(start + WINDOW + WINDOW)
        );

        // After a quiet window the next item passes immediately
        assert_eq!(throttle.fire(start + Duration::from_millis(100)), Some('c'));
        assert_eq!(throttle.offer(start + Duration::from_millis(200), 'd'), Some('d'));
    }

    #[test]
    fn test_cancel_drops_pending() {
        let mut throttle = Throttle::new(WINDOW);
        let start = Instant::now();

        throttle.offer(start, 1);
        throttle.offer(start + Duration::from_millis(5), 2);
        throttle.cancel();

        assert_eq!(throttle.deadline(), None);
        assert_eq!(throttle.fire(start + WINDOW), None);
        assert_eq!(throttle.offer(start + Duration::from_millis(6), 3), Some(3));
    }
}
