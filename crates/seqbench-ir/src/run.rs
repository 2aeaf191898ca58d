//! Step records for one compiler run.
//!
//! An [`ExpandedRun`] is what the optimizer actually executed, after every
//! repeat-until-stable group reached its fixed point. It is produced once per
//! (notation, source) pair and is read-only afterwards.

use thiserror::Error;

/// One executed optimizer step.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct StepExecution {
    /// Position in the run, starting at 0.
    pub index: usize,
    pub abbreviation: char,
    /// Reporting only. Varies between runs and never takes part in equality
    /// checks of step sequences.
    pub duration_us: u64,
    /// Injected by the compiler policy rather than written by the user.
    pub hardcoded: bool,
}

/// Flat, time-ordered list of executed steps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ExpandedRun {
    pub steps: Vec<StepExecution>,
    /// Index into `steps` where the cleanup list starts executing. May equal
    /// `steps.len()` when nothing runs after the main list.
    pub cleanup_boundary: Option<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("step at position {position} has index {index}")]
    NonContiguousIndex { position: usize, index: usize },
    #[error("cleanup boundary {boundary} is outside the run (length {len})")]
    BoundaryOutOfRange { boundary: usize, len: usize },
}

impl ExpandedRun {
    /// Build a run from `(abbreviation, duration_us, hardcoded)` triples,
    /// numbering the steps in order.
    pub fn from_steps<I>(steps: I, cleanup_boundary: Option<usize>) -> Self
    where
        I: IntoIterator<Item = (char, u64, bool)>,
    {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, (abbreviation, duration_us, hardcoded))| StepExecution {
                index,
                abbreviation,
                duration_us,
                hardcoded,
            })
            .collect();
        Self {
            steps,
            cleanup_boundary,
        }
    }

    /// Check the structural invariants: contiguous indices and an in-range
    /// cleanup boundary.
    pub fn validate(&self) -> Result<(), RunError> {
        for (position, step) in self.steps.iter().enumerate() {
            if step.index != position {
                return Err(RunError::NonContiguousIndex {
                    position,
                    index: step.index,
                });
            }
        }
        if let Some(boundary) = self.cleanup_boundary {
            if boundary > self.steps.len() {
                return Err(RunError::BoundaryOutOfRange {
                    boundary,
                    len: self.steps.len(),
                });
            }
        }
        Ok(())
    }

    fn in_main(&self, step: &StepExecution) -> bool {
        self.cleanup_boundary
            .map_or(true, |boundary| step.index < boundary)
    }

    /// User-authored steps of the main list, in execution order.
    pub fn main_user_steps(&self) -> Vec<&StepExecution> {
        self.steps
            .iter()
            .filter(|step| !step.hardcoded && self.in_main(step))
            .collect()
    }

    /// User-authored steps of the cleanup list, in execution order.
    pub fn cleanup_user_steps(&self) -> Vec<&StepExecution> {
        self.steps
            .iter()
            .filter(|step| !step.hardcoded && !self.in_main(step))
            .collect()
    }

    /// N: number of user steps in the main list.
    pub fn user_step_count(&self) -> usize {
        self.main_user_steps().len()
    }

    pub fn hardcoded_count(&self) -> usize {
        self.steps.iter().filter(|step| step.hardcoded).count()
    }

    /// Step identity without timings, for determinism comparisons.
    pub fn signature(&self) -> Vec<(char, bool)> {
        self.steps
            .iter()
            .map(|step| (step.abbreviation, step.hardcoded))
            .collect()
    }

    /// User steps rendered as a string of abbreviations, main list only.
    pub fn main_user_notation(&self) -> String {
        self.main_user_steps()
            .iter()
            .map(|step| step.abbreviation)
            .collect()
    }

    pub fn total_duration_us(&self) -> u64 {
        self.steps.iter().map(|step| step.duration_us).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExpandedRun {
        // d h | a b c d | e | u
        ExpandedRun::from_steps(
            [
                ('d', 3, true),
                ('h', 2, true),
                ('a', 10, false),
                ('b', 11, false),
                ('c', 12, false),
                ('d', 13, false),
                ('e', 14, false),
                ('u', 4, true),
            ],
            Some(6),
        )
    }

    #[test]
    fn splits_user_steps_at_boundary() {
        let run = sample();
        run.validate().unwrap();
        assert_eq!(run.user_step_count(), 4);
        assert_eq!(run.main_user_notation(), "abcd");
        let cleanup: String = run
            .cleanup_user_steps()
            .iter()
            .map(|s| s.abbreviation)
            .collect();
        assert_eq!(cleanup, "e");
        assert_eq!(run.hardcoded_count(), 3);
        assert_eq!(run.total_duration_us(), 69);
    }

    #[test]
    fn no_boundary_means_everything_is_main() {
        let mut run = sample();
        run.cleanup_boundary = None;
        assert_eq!(run.main_user_notation(), "abcde");
        assert!(run.cleanup_user_steps().is_empty());
    }

    #[test]
    fn signature_ignores_timings() {
        let a = sample();
        let mut b = sample();
        for step in &mut b.steps {
            step.duration_us *= 7;
        }
        assert_ne!(a, b);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn boundary_at_end_is_valid() {
        let run = ExpandedRun::from_steps([('a', 1, false)], Some(1));
        assert!(run.validate().is_ok());
        assert!(run.cleanup_user_steps().is_empty());
    }

    #[test]
    fn invalid_boundary_and_indices_are_rejected() {
        let run = ExpandedRun::from_steps([('a', 1, false)], Some(2));
        assert_eq!(
            run.validate(),
            Err(RunError::BoundaryOutOfRange {
                boundary: 2,
                len: 1
            })
        );

        let mut run = sample();
        run.steps[3].index = 9;
        assert_eq!(
            run.validate(),
            Err(RunError::NonContiguousIndex {
                position: 3,
                index: 9
            })
        );
    }
}
