use std::fmt::Debug;
use std::time::Duration;

/// Decides how long to wait before the next connection attempt.
///
/// `failures` counts consecutive attempts that did not reach a connected
/// state; it restarts at zero after every successful connect.
pub trait ReconnectPolicy: Debug + Send + Sync {
    fn next_delay(&self, failures: u32) -> Duration;
}

/// Same pause before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        Self(Duration::from_secs(5))
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&self, _failures: u32) -> Duration {
        self.0
    }
}

/// Doubles (or multiplies by `factor`) per failure, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2,
        }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, failures: u32) -> Duration {
        let multiplier = self.factor.max(1).saturating_pow(failures);
        self.initial
            .checked_mul(multiplier)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
