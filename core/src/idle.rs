use std::collections::BTreeSet;
use std::time::Duration;
use user_idle::UserIdle;

use crate::error::{ClipError, Result};

pub trait IdleSource: Send {
    fn idle_time(&self) -> Result<Duration>;
}

/// Used where the platform offers no idle primitive; never reports idle.
pub struct NoIdleSource;

impl IdleSource for NoIdleSource {
    fn idle_time(&self) -> Result<Duration> {
        Ok(Duration::ZERO)
    }
}

/// OS idle time: X11 screensaver on Linux, `GetLastInputInfo` on Windows,
/// IOKit on macOS.
pub struct SystemIdle;

fn idle_error(e: impl std::fmt::Debug) -> ClipError {
    ClipError::Idle(format!("{:?}", e))
}

impl SystemIdle {
    pub fn new() -> Result<Self> {
        UserIdle::get_time().map_err(idle_error)?;
        Ok(Self)
    }
}

impl IdleSource for SystemIdle {
    fn idle_time(&self) -> Result<Duration> {
        UserIdle::get_time()
            .map(|idle| idle.duration())
            .map_err(idle_error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PauseReason {
    Idle,
    WindowDrag,
    FullTextViewer,
}

/// Tracks every active reason to pause polling. Polling resumes only once
/// all of them have cleared.
#[derive(Debug, Default)]
pub struct PauseGate {
    active: BTreeSet<PauseReason>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this moves the gate from open to paused.
    pub fn pause(&mut self, reason: PauseReason) -> bool {
        let was_open = self.active.is_empty();
        self.active.insert(reason);
        was_open
    }

    /// Returns true when this clears the last reason.
    pub fn resume(&mut self, reason: PauseReason) -> bool {
        self.active.remove(&reason) && self.active.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn reasons(&self) -> impl Iterator<Item = PauseReason> + '_ {
        self.active.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_reason_round_trip() {
        let mut gate = PauseGate::new();
        assert!(gate.pause(PauseReason::WindowDrag));
        assert!(gate.is_paused());
        assert!(gate.resume(PauseReason::WindowDrag));
        assert!(!gate.is_paused());
    }

    #[test]
    fn overlapping_reasons_need_all_cleared() {
        let mut gate = PauseGate::new();
        assert!(gate.pause(PauseReason::Idle));
        assert!(!gate.pause(PauseReason::WindowDrag));

        assert!(!gate.resume(PauseReason::Idle));
        assert!(gate.is_paused());
        assert_eq!(gate.reasons().collect::<Vec<_>>(), vec![PauseReason::WindowDrag]);

        assert!(gate.resume(PauseReason::WindowDrag));
        assert!(!gate.is_paused());
    }

    #[test]
    fn repeated_pause_and_stray_resume_are_harmless() {
        let mut gate = PauseGate::new();
        assert!(!gate.resume(PauseReason::FullTextViewer));
        assert!(gate.pause(PauseReason::Idle));
        assert!(!gate.pause(PauseReason::Idle));
        assert!(gate.resume(PauseReason::Idle));
        assert!(!gate.resume(PauseReason::Idle));
    }

    #[test]
    fn idle_failures_map_to_idle_errors() {
        let err = idle_error("no display");
        assert!(matches!(&err, ClipError::Idle(msg) if msg.contains("no display")));
        assert!(err.to_string().starts_with("idle time unavailable"));
    }

    #[test]
    fn no_idle_source_is_never_idle() {
        assert_eq!(NoIdleSource.idle_time().unwrap(), Duration::ZERO);
    }
}
