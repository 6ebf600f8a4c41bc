//! Install stage machine
//!
//! Tracks where a run is in the install protocol and rejects transitions that
//! skip a stage or move backwards.
//!
//! # Stage Flow
//!
//! ```text
//! Idle
//!     ↓
//! TransactionOpen ──(open failed)──→ Aborted
//!     ↓
//! Resolving ──┐
//!     ↓       │
//! Preparing ──┤ (failure)
//!     ↓       │
//! Installing  │
//!     ↓       │
//! Finalizing ←┘
//!     ↓
//! Done | Aborted
//! ```

use std::fmt;
use thiserror::Error;

/// Install stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstallStage {
    Idle = 0,
    /// Mutation window held
    TransactionOpen = 1,
    Resolving = 2,
    /// Downloading and configuring ayum
    Preparing = 3,
    Installing = 4,
    /// Ending the transaction
    Finalizing = 5,
    /// Transaction closed (terminal)
    Done = 6,
    /// Transaction aborted or never opened (terminal)
    Aborted = 255,
}

impl InstallStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Returns the next stage in the sequence, or None at Finalizing and the terminal states
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::TransactionOpen),
            Self::TransactionOpen => Some(Self::Resolving),
            Self::Resolving => Some(Self::Preparing),
            Self::Preparing => Some(Self::Installing),
            Self::Installing => Some(Self::Finalizing),
            Self::Finalizing | Self::Done | Self::Aborted => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::TransactionOpen => "Transaction open",
            Self::Resolving => "Resolving packages",
            Self::Preparing => "Preparing ayum",
            Self::Installing => "Installing packages",
            Self::Finalizing => "Finalizing",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
        }
    }

    /// Stages reached by a successful run, in order
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::Idle,
            Self::TransactionOpen,
            Self::Resolving,
            Self::Preparing,
            Self::Installing,
            Self::Finalizing,
            Self::Done,
        ]
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    #[error("Cannot skip from {from} to {to} (must transition through intermediate stages)")]
    SkippedStage { from: InstallStage, to: InstallStage },

    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition { from: InstallStage, to: InstallStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: InstallStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: InstallStage },
}

/// Owns the current stage of one run and its timestamped history.
#[derive(Debug, Clone)]
pub struct InstallTracker {
    current: InstallStage,
    /// Stage that was left early because of a failure
    failed_at: Option<InstallStage>,
    /// (stage, unix timestamp) for every stage entered
    stage_history: Vec<(InstallStage, u64)>,
}

impl Default for InstallTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallTracker {
    pub fn new() -> Self {
        Self {
            current: InstallStage::Idle,
            failed_at: None,
            stage_history: Vec::with_capacity(InstallStage::all_stages().len()),
        }
    }

    #[inline]
    pub fn current_stage(&self) -> InstallStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<InstallStage> {
        self.failed_at
    }

    pub fn stage_history(&self) -> &[(InstallStage, u64)] {
        &self.stage_history
    }

    /// Move to `target`, which must be the stage right after the current one.
    pub fn transition_to(
        &mut self,
        target: InstallStage,
    ) -> Result<InstallStage, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(InstallTransitionError::AlreadyAtStage { stage: target });
        }
        if target == InstallStage::Aborted || target == InstallStage::Done {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        if target.order() < self.current.order() {
            return Err(InstallTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        self.enter(target);
        Ok(target)
    }

    /// Jump to Finalizing after a failure in Resolving, Preparing or Installing.
    pub fn finalize_early(&mut self) -> Result<(), InstallTransitionError> {
        match self.current {
            InstallStage::Resolving | InstallStage::Preparing | InstallStage::Installing => {
                self.failed_at = Some(self.current);
                self.enter(InstallStage::Finalizing);
                Ok(())
            }
            InstallStage::Finalizing => Err(InstallTransitionError::AlreadyAtStage {
                stage: InstallStage::Finalizing,
            }),
            from if from.is_terminal() => Err(InstallTransitionError::FromTerminalState { from }),
            from => Err(InstallTransitionError::SkippedStage {
                from,
                to: InstallStage::Finalizing,
            }),
        }
    }

    /// Finalizing -> Done, once the transaction is closed.
    pub fn complete(&mut self) -> Result<(), InstallTransitionError> {
        match self.current {
            InstallStage::Finalizing => {
                self.enter(InstallStage::Done);
                Ok(())
            }
            from if from.is_terminal() => Err(InstallTransitionError::FromTerminalState { from }),
            from => Err(InstallTransitionError::SkippedStage {
                from,
                to: InstallStage::Done,
            }),
        }
    }

    /// Terminal failure; allowed from any non-terminal stage.
    pub fn abort(&mut self) -> Result<(), InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }
        if self.current != InstallStage::Finalizing {
            self.failed_at = Some(self.current);
        }
        self.enter(InstallStage::Aborted);
        Ok(())
    }

    fn enter(&mut self, stage: InstallStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.stage_history.push((stage, timestamp));
        self.current = stage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(stage: InstallStage) -> InstallTracker {
        let mut t = InstallTracker::new();
        while t.current_stage() != stage {
            let next = t.current_stage().next().unwrap();
            t.transition_to(next).unwrap();
        }
        t
    }

    #[test]
    fn test_stage_order_is_sequential() {
        for (i, stage) in InstallStage::all_stages().iter().enumerate() {
            assert_eq!(stage.order() as usize, i, "Stage {:?} should have order {}", stage, i);
        }
    }

    #[test]
    fn test_happy_path() {
        let mut t = at(InstallStage::Finalizing);
        t.complete().unwrap();

        assert_eq!(t.current_stage(), InstallStage::Done);
        assert!(t.failed_at().is_none());
        let stages: Vec<_> = t.stage_history().iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, &InstallStage::all_stages()[1..]);
    }

    #[test]
    fn test_cannot_skip_or_go_back() {
        let mut t = at(InstallStage::Resolving);
        assert_eq!(
            t.transition_to(InstallStage::Installing),
            Err(InstallTransitionError::SkippedStage {
                from: InstallStage::Resolving,
                to: InstallStage::Installing
            })
        );
        assert!(matches!(
            t.transition_to(InstallStage::TransactionOpen),
            Err(InstallTransitionError::BackwardTransition { .. })
        ));
        assert!(matches!(
            t.transition_to(InstallStage::Resolving),
            Err(InstallTransitionError::AlreadyAtStage { .. })
        ));
        assert!(t.transition_to(InstallStage::Done).is_err());
    }

    #[test]
    fn test_early_finalize_after_failure() {
        let mut t = at(InstallStage::Preparing);
        t.finalize_early().unwrap();
        assert_eq!(t.current_stage(), InstallStage::Finalizing);
        assert_eq!(t.failed_at(), Some(InstallStage::Preparing));

        t.abort().unwrap();
        assert_eq!(t.current_stage(), InstallStage::Aborted);
        assert_eq!(t.failed_at(), Some(InstallStage::Preparing));
    }

    #[test]
    fn test_open_failure_aborts_directly() {
        let mut t = at(InstallStage::TransactionOpen);
        assert!(t.finalize_early().is_err());
        t.abort().unwrap();
        assert_eq!(t.failed_at(), Some(InstallStage::TransactionOpen));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut t = at(InstallStage::Finalizing);
        t.complete().unwrap();
        assert!(matches!(t.abort(), Err(InstallTransitionError::FromTerminalState { .. })));
        assert!(t.complete().is_err());
        assert!(t.transition_to(InstallStage::Resolving).is_err());
    }

    #[test]
    fn test_complete_requires_finalizing() {
        let mut t = at(InstallStage::Installing);
        assert!(t.complete().is_err());
    }
}
