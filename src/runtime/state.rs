use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one controller inside the runtime.
///
/// States only move forward, except that any state may jump to
/// `ShuttingDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ControllerState {
    Constructed = 0,
    CacheSyncing,
    CacheSynced,
    Activating,
    ReadyForWork,
    Dispatching,
    ShuttingDown,
    Stopped,
}

impl ControllerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ControllerState::Constructed,
            1 => ControllerState::CacheSyncing,
            2 => ControllerState::CacheSynced,
            3 => ControllerState::Activating,
            4 => ControllerState::ReadyForWork,
            5 => ControllerState::Dispatching,
            6 => ControllerState::ShuttingDown,
            _ => ControllerState::Stopped,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerState::Constructed => "constructed",
            ControllerState::CacheSyncing => "cache-syncing",
            ControllerState::CacheSynced => "cache-synced",
            ControllerState::Activating => "activating",
            ControllerState::ReadyForWork => "ready-for-work",
            ControllerState::Dispatching => "dispatching",
            ControllerState::ShuttingDown => "shutting-down",
            ControllerState::Stopped => "stopped",
        })
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ControllerState::Constructed as u8))
    }

    pub(crate) fn load(&self) -> ControllerState {
        ControllerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves to `next` if that is a forward step. Returns whether it moved.
    pub(crate) fn advance(&self, next: ControllerState) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .is_ok()
    }
}
