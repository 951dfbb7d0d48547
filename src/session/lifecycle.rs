// src/session/lifecycle.rs
//! Inactivity cutoff and session termination
//!
//! A single check timer runs while the session is armed. Each qualifying
//! interaction pushes it back; when it fires the persisted `last_event_at` is
//! compared against the cutoff and the session either re-arms or terminates.
//!
//! ```text
//!        interaction / re-arm
//!           ┌──────────┐
//!           ▼          │
//!       ┌───────┐  timer, stale   ┌─────────────┐  teardown   ┌────────────┐
//!       │ Armed │ ──────────────► │ Terminating │ ──────────► │ Terminated │
//!       └───────┘                 └─────────────┘             └────────────┘
//! ```

use crate::identity::visitor::IdentityStore;
use crate::observability::SESSIONS_TERMINATED;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Armed,
    Terminating,
    Terminated,
}

/// Result of a check-timer firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Still active; the timer was pushed back
    Rearmed,

    /// Inactive past the cutoff; run `terminate`
    Terminate,

    /// Fired after termination
    Ignored,
}

/// Side effects of terminating a session, in order
pub trait SessionTeardown {
    fn emit_inactivity(&mut self);

    fn close_transport(&mut self);

    fn stop_capture(&mut self);
}

#[derive(Debug)]
pub struct SessionLifecycle {
    phase: LifecyclePhase,
    check_interval: Duration,
    deadline: Option<Instant>,
}

impl SessionLifecycle {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            phase: LifecyclePhase::Armed,
            check_interval,
            deadline: None,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == LifecyclePhase::Terminated
    }

    /// Start or push back the check timer
    pub fn arm(&mut self, now: Instant) {
        if self.phase == LifecyclePhase::Armed {
            self.deadline = Some(now + self.check_interval);
        }
    }

    /// Cancel the check timer without terminating
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Handle the check timer firing
    pub fn on_timer(&mut self, now: Instant, store: &IdentityStore) -> TimerOutcome {
        if self.phase != LifecyclePhase::Armed {
            return TimerOutcome::Ignored;
        }

        self.deadline = None;

        if store.should_start_new_session() {
            debug!("Session inactive for longer than {:?}", store.cutoff());
            TimerOutcome::Terminate
        } else {
            self.arm(now);
            TimerOutcome::Rearmed
        }
    }

    /// Run the termination sequence once; later calls return `false`
    pub fn terminate(&mut self, teardown: &mut dyn SessionTeardown, store: &IdentityStore) -> bool {
        if self.phase != LifecyclePhase::Armed {
            return false;
        }

        self.phase = LifecyclePhase::Terminating;
        self.deadline = None;

        teardown.emit_inactivity();
        teardown.close_transport();
        teardown.stop_capture();
        store.delete_session_id();

        self.phase = LifecyclePhase::Terminated;
        metrics::counter!(SESSIONS_TERMINATED).increment(1);
        info!("Session terminated after inactivity");

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::storage::{MemoryStorage, Scope, Storage, SESSION_ID_KEY};
    use crate::utils::clock::ManualClock;
    use std::sync::Arc;

    const CHECK: Duration = Duration::from_secs(10);
    const CUTOFF: Duration = Duration::from_secs(30 * 60);

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
    }

    impl SessionTeardown for Recorder {
        fn emit_inactivity(&mut self) {
            self.calls.push("inactivity");
        }

        fn close_transport(&mut self) {
            self.calls.push("close");
        }

        fn stop_capture(&mut self) {
            self.calls.push("stop");
        }
    }

    fn fixture() -> (MemoryStorage, Arc<ManualClock>, IdentityStore) {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = IdentityStore::new(Arc::new(storage.clone()), clock.clone(), CUTOFF);
        (storage, clock, store)
    }

    #[test]
    fn test_arm_resets_single_deadline() {
        let mut lifecycle = SessionLifecycle::new(CHECK);
        let now = Instant::now();

        assert_eq!(lifecycle.deadline(), None);
        lifecycle.arm(now);
        assert_eq!(lifecycle.deadline(), Some(now + CHECK));

        lifecycle.arm(now + Duration::from_secs(3));
        assert_eq!(lifecycle.deadline(), Some(now + Duration::from_secs(13)));

        lifecycle.disarm();
        assert_eq!(lifecycle.deadline(), None);
    }

    #[test]
    fn test_timer_rearms_while_active() {
        let (_, _, store) = fixture();
        store.set_last_event_at();

        let mut lifecycle = SessionLifecycle::new(CHECK);
        let now = Instant::now();
        lifecycle.arm(now);

        let later = now + CHECK;
        assert_eq!(lifecycle.on_timer(later, &store), TimerOutcome::Rearmed);
        assert_eq!(lifecycle.deadline(), Some(later + CHECK));
        assert_eq!(lifecycle.phase(), LifecyclePhase::Armed);
    }

    #[test]
    fn test_timer_terminates_when_stale() {
        let (storage, clock, store) = fixture();
        storage.set(Scope::Session, SESSION_ID_KEY, "j6sc8ekd9m");
        store.set_last_event_at();
        clock.advance(CUTOFF.as_millis() as i64 + 1);

        let mut lifecycle = SessionLifecycle::new(CHECK);
        lifecycle.arm(Instant::now());
        assert_eq!(lifecycle.on_timer(Instant::now(), &store), TimerOutcome::Terminate);

        let mut teardown = Recorder::default();
        assert!(lifecycle.terminate(&mut teardown, &store));

        assert_eq!(teardown.calls, vec!["inactivity", "close", "stop"]);
        assert_eq!(storage.get(Scope::Session, SESSION_ID_KEY), None);
        assert!(lifecycle.is_terminated());
        assert_eq!(lifecycle.deadline(), None);
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let (_, _, store) = fixture();
        let mut lifecycle = SessionLifecycle::new(CHECK);
        let mut teardown = Recorder::default();

        assert!(lifecycle.terminate(&mut teardown, &store));
        assert!(!lifecycle.terminate(&mut teardown, &store));
        assert_eq!(teardown.calls.len(), 3);

        lifecycle.arm(Instant::now());
        assert_eq!(lifecycle.deadline(), None);
        assert_eq!(lifecycle.on_timer(Instant::now(), &store), TimerOutcome::Ignored);
    }
}
