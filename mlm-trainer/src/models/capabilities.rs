//! Optional behaviors of an orchestrator instance

use crate::storage::DataStorage;
use mlm_common::config::TrainingSettings;
use std::fmt;
use std::sync::Arc;

/// Keep training after a successful attempt
///
/// A streak spans at most `max_cycles` attempts, counting the attempt that
/// promoted the published model. Any promotion resets the count, so with
/// `max_cycles = 3` a promotion is followed by two more attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclingPolicy {
    pub max_cycles: u32,
}

impl CyclingPolicy {
    /// True when `streak` failed attempts leave no budget for another one
    pub fn exhausted(&self, streak: u32) -> bool {
        streak.saturating_add(1) >= self.max_cycles
    }
}

/// Capability set fixed at construction
#[derive(Clone, Default)]
pub struct Capabilities {
    /// Continuous improvement; `None` means a round ends at its first model
    pub cycling: Option<CyclingPolicy>,
    /// Persist every promoted model to model storage
    pub auto_save: bool,
    /// Fold the training buffer into primary storage during rounds
    pub auto_commit: bool,
    /// Secondary store for newly ingested rows
    pub training_buffer: Option<Arc<dyn DataStorage>>,
}

impl Capabilities {
    /// Capabilities described by the `[training]` settings table
    pub fn from_settings(
        settings: &TrainingSettings,
        training_buffer: Option<Arc<dyn DataStorage>>,
    ) -> Self {
        Self {
            cycling: settings
                .max_cycles
                .map(|max_cycles| CyclingPolicy { max_cycles }),
            auto_save: settings.auto_save,
            auto_commit: settings.auto_commit,
            training_buffer,
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("cycling", &self.cycling)
            .field("auto_save", &self.auto_save)
            .field("auto_commit", &self.auto_commit)
            .field("training_buffer", &self.training_buffer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promoting_attempt_counts_toward_budget() {
        let policy = CyclingPolicy { max_cycles: 3 };
        assert!(!policy.exhausted(0));
        assert!(!policy.exhausted(1));
        assert!(policy.exhausted(2));
        assert!(policy.exhausted(5));
    }

    #[test]
    fn test_single_cycle_never_retries() {
        let policy = CyclingPolicy { max_cycles: 1 };
        assert!(policy.exhausted(0));
        assert!(CyclingPolicy { max_cycles: 0 }.exhausted(0));
    }

    #[test]
    fn test_from_settings_maps_max_cycles() {
        let settings = TrainingSettings {
            max_cycles: Some(4),
            ..TrainingSettings::default()
        };
        let capabilities = Capabilities::from_settings(&settings, None);
        assert_eq!(capabilities.cycling, Some(CyclingPolicy { max_cycles: 4 }));
        assert!(capabilities.training_buffer.is_none());
    }
}
