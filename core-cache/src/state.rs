//! Cache run state, surfaced live to callers.

use serde::{Deserialize, Serialize};

/// State of one cache run for one item.
///
/// `Idle → Queued → Caching(0..1) → Completed | Error`; both ends are
/// terminal and a new request for the same item starts over from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum CacheState {
    #[default]
    Idle,
    Queued,
    /// Fractional progress in `[0, 1]`.
    Caching(f64),
    Completed,
    Error,
}

impl CacheState {
    /// Whether the run has ended, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CacheState::Completed | CacheState::Error)
    }

    /// Progress fraction; complete runs report 1.
    pub fn progress(&self) -> f64 {
        match self {
            CacheState::Idle | CacheState::Queued | CacheState::Error => 0.0,
            CacheState::Caching(progress) => *progress,
            CacheState::Completed => 1.0,
        }
    }
}
