use std::{
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use log::debug;

use crate::error::{Error, MacroResult};

const IDLE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Capture = 1,
    Playback = 2,
}

impl ActivityKind {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ActivityKind::Capture),
            2 => Some(ActivityKind::Playback),
            _ => None,
        }
    }
}

impl Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Capture => write!(f, "capture"),
            ActivityKind::Playback => write!(f, "playback"),
        }
    }
}

/// Shared slot allowing a single capture or playback session at a time.
#[derive(Debug, Clone, Default)]
pub struct Activity {
    slot: Arc<AtomicU8>,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ActivityKind> {
        ActivityKind::from_raw(self.slot.load(Ordering::Acquire))
    }

    pub fn try_acquire(&self, kind: ActivityKind) -> MacroResult<ActivityGuard> {
        match self
            .slot
            .compare_exchange(IDLE, kind as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!("Activity: {kind} acquired");
                Ok(ActivityGuard {
                    slot: self.slot.clone(),
                    kind,
                })
            }
            Err(active) => Err(Error::AlreadyActive(
                ActivityKind::from_raw(active).unwrap_or(kind),
            )),
        }
    }
}

#[derive(Debug)]
pub struct ActivityGuard {
    slot: Arc<AtomicU8>,
    kind: ActivityKind,
}

impl ActivityGuard {
    pub fn kind(&self) -> ActivityKind {
        self.kind
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.slot.store(IDLE, Ordering::Release);
        debug!("Activity: {} released", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_session_is_rejected_until_guard_drops() {
        let activity = Activity::new();
        let capture = activity.try_acquire(ActivityKind::Capture).unwrap();
        assert_eq!(activity.current(), Some(ActivityKind::Capture));

        let err = activity.try_acquire(ActivityKind::Playback).unwrap_err();
        assert!(matches!(err, Error::AlreadyActive(ActivityKind::Capture)));
        assert!(matches!(
            activity.try_acquire(ActivityKind::Capture),
            Err(Error::AlreadyActive(ActivityKind::Capture))
        ));

        drop(capture);
        assert_eq!(activity.current(), None);
        let playback = activity.try_acquire(ActivityKind::Playback).unwrap();
        assert_eq!(playback.kind(), ActivityKind::Playback);
    }
}
