//! When to throw away a perfectly healthy engine

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Two maximum segment lifetimes. A socket closed by the old pool has left
/// TIME_WAIT by the time an engine this old is replaced.
pub const TWO_MSL: Duration = Duration::from_secs(240);

/// Decides whether the current engine is old enough to be rebuilt against a
/// freshly resolved backend.
pub trait RotationPolicy: Send + Sync + fmt::Debug {
    /// `true` when an engine created at `created_at` should be replaced at `now`
    fn should_rotate(&self, now: Instant, created_at: Instant) -> bool;
}

/// Rotate once an engine reaches a fixed age
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAgePolicy {
    max_age: Duration,
}

impl MaxAgePolicy {
    /// Create a policy with the given maximum engine age
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Maximum engine age
    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

impl Default for MaxAgePolicy {
    fn default() -> Self {
        Self::new(TWO_MSL)
    }
}

impl RotationPolicy for MaxAgePolicy {
    fn should_rotate(&self, now: Instant, created_at: Instant) -> bool {
        now.saturating_duration_since(created_at) >= self.max_age
    }
}

/// Keep the engine until it fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRotate;

impl RotationPolicy for NeverRotate {
    fn should_rotate(&self, _now: Instant, _created_at: Instant) -> bool {
        false
    }
}
