use std::sync::atomic::{AtomicU8, Ordering};

/// Render engine state machine.
///
/// State transitions:
/// ```text
/// stopped → playing ↔ paused
///    ↑         ↓        ↓
///    └──── stopped ←────┘   (stop(), end of stream, worker error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Playing => 1,
            Self::Paused => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

/// Lock-free cell holding a [`PlaybackState`].
///
/// Readers never block. The playback thread writes `Stopped` with a plain store;
/// control transitions go through [`AtomicPlaybackState::transition`] so they
/// never overwrite a terminal write that raced them.
#[derive(Debug, Default)]
pub struct AtomicPlaybackState(AtomicU8);

impl AtomicPlaybackState {
    pub fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn load(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: PlaybackState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Moves `from` → `to` atomically. Returns false if the state was not `from`.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stopped() {
        let state = AtomicPlaybackState::default();
        assert!(state.load().is_stopped());
    }

    #[test]
    fn transition_requires_expected_state() {
        let state = AtomicPlaybackState::new(PlaybackState::Playing);
        assert!(!state.transition(PlaybackState::Paused, PlaybackState::Playing));
        assert!(state.transition(PlaybackState::Playing, PlaybackState::Paused));
        assert!(state.load().is_paused());

        state.store(PlaybackState::Stopped);
        assert!(!state.transition(PlaybackState::Paused, PlaybackState::Playing));
        assert_eq!(state.load(), PlaybackState::Stopped);
    }
}
