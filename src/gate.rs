//! Replay gating relative to a consistency checkpoint
//!
//! Traffic captured before the target's consistency point is already reflected in the
//! target's data and must not be replayed again. Events close to the point are ambiguous
//! and are logged for inspection instead.

use crate::config::GateConfig;

/// What to do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Skip,
    LogOnly,
    Replay,
}

/// Decides per event timestamp whether an event is replayed.
pub trait Gate: Send + Sync + 'static {
    fn directive(&self, timestamp_ns: u64) -> Directive;
}

/// Replays everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayAll;

impl Gate for ReplayAll {
    fn directive(&self, _timestamp_ns: u64) -> Directive {
        Directive::Replay
    }
}

/// Gate around a fixed checkpoint with a symmetric log-only window.
///
/// - before `checkpoint - window`: [`Directive::Skip`]
/// - within `window` of the checkpoint: [`Directive::LogOnly`]
/// - after `checkpoint + window`: [`Directive::Replay`]
///
/// Without a checkpoint every event is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointGate {
    checkpoint_ns: Option<u64>,
    window_ns: u64,
}

impl CheckpointGate {
    pub fn new(checkpoint_ns: Option<u64>, window_ns: u64) -> Self {
        Self { checkpoint_ns, window_ns }
    }
}

impl From<&GateConfig> for CheckpointGate {
    fn from(config: &GateConfig) -> Self {
        Self::new(config.checkpoint_ns, config.log_window_ms.saturating_mul(1_000_000))
    }
}

impl Gate for CheckpointGate {
    fn directive(&self, timestamp_ns: u64) -> Directive {
        let Some(checkpoint) = self.checkpoint_ns else {
            return Directive::Replay;
        };
        if timestamp_ns < checkpoint.saturating_sub(self.window_ns) {
            Directive::Skip
        } else if timestamp_ns <= checkpoint.saturating_add(self.window_ns) {
            Directive::LogOnly
        } else {
            Directive::Replay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn checkpoint_windows() {
        let gate = CheckpointGate::new(Some(1_000 * MS), 100 * MS);
        assert_eq!(gate.directive(0), Directive::Skip);
        assert_eq!(gate.directive(899 * MS), Directive::Skip);
        assert_eq!(gate.directive(900 * MS), Directive::LogOnly);
        assert_eq!(gate.directive(1_000 * MS), Directive::LogOnly);
        assert_eq!(gate.directive(1_100 * MS), Directive::LogOnly);
        assert_eq!(gate.directive(1_100 * MS + 1), Directive::Replay);
    }

    #[test]
    fn no_checkpoint_replays_everything() {
        let gate = CheckpointGate::from(&GateConfig::default());
        assert_eq!(gate.directive(0), Directive::Replay);
        assert_eq!(ReplayAll.directive(u64::MAX), Directive::Replay);
    }
}
