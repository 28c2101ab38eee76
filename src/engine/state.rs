use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connectivity state, as observed by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    Connecting = 1,
    Streaming = 2,
    Reconnecting = 3,
    Stopped = 4,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => EngineState::Connecting,
            2 => EngineState::Streaming,
            3 => EngineState::Reconnecting,
            4 => EngineState::Stopped,
            _ => EngineState::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Connecting => "connecting",
            EngineState::Streaming => "streaming",
            EngineState::Reconnecting => "reconnecting",
            EngineState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically readable [`EngineState`]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: EngineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store `state`, returning the previous one
    pub fn set(&self, state: EngineState) -> EngineState {
        let previous = EngineState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            metrics::gauge!("camwatch_engine_state").set(state as u8 as f64);
        }
        previous
    }

    /// Like `set`, but never leaves `Stopped`. Used by the loop so a detached
    /// loop cannot resurrect a stopped engine's state.
    pub fn advance(&self, state: EngineState) -> bool {
        let updated = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != EngineState::Stopped as u8 && current != state as u8)
                    .then_some(state as u8)
            })
            .is_ok();
        if updated {
            metrics::gauge!("camwatch_engine_state").set(state as u8 as f64);
        }
        updated
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(EngineState::Idle)
    }
}
