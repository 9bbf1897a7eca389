use std::fmt;

/// Pipeline run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Expanding,
    Searching,
    Synthesizing,
    Validating,
    /// Rendering validated pages as prose (structured strategy only)
    Formatting,
    Done,
    Error,
    /// The caller went away; nothing more is emitted.
    Cancelled,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Expanding => "expanding",
            Stage::Searching => "searching",
            Stage::Synthesizing => "synthesizing",
            Stage::Validating => "validating",
            Stage::Formatting => "formatting",
            Stage::Done => "done",
            Stage::Error => "error",
            Stage::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Error | Stage::Cancelled)
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Error | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Init, Expanding)
                | (Init, Searching)
                | (Expanding, Searching)
                | (Searching, Synthesizing)
                | (Synthesizing, Validating)
                | (Validating, Formatting)
                | (Validating, Done)
                | (Formatting, Done)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current stage of one run plus the path taken so far.
#[derive(Debug, Clone)]
pub struct StageTracker {
    path: Vec<Stage>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            path: vec![Stage::Init],
        }
    }
}

impl StageTracker {
    pub fn current(&self) -> Stage {
        self.path.last().copied().unwrap_or(Stage::Init)
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: Stage) -> bool {
        let current = self.current();
        if !current.can_advance_to(next) {
            tracing::error!("Invalid pipeline transition {current} -> {next}");
            return false;
        }
        tracing::info!(stage = next.as_str(), "Pipeline stage");
        self.path.push(next);
        true
    }

    pub fn path(&self) -> &[Stage] {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_path() {
        let mut tracker = StageTracker::default();
        for stage in [
            Stage::Expanding,
            Stage::Searching,
            Stage::Synthesizing,
            Stage::Validating,
            Stage::Formatting,
            Stage::Done,
        ] {
            assert!(tracker.advance(stage));
        }
        assert_eq!(tracker.current(), Stage::Done);
        assert_eq!(tracker.path().len(), 7);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut tracker = StageTracker::default();
        assert!(tracker.advance(Stage::Searching));
        assert!(tracker.advance(Stage::Cancelled));
        assert!(!tracker.advance(Stage::Synthesizing));
        assert!(!tracker.advance(Stage::Error));
        assert_eq!(tracker.current(), Stage::Cancelled);
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut tracker = StageTracker::default();
        assert!(!tracker.advance(Stage::Validating));
        assert!(!tracker.advance(Stage::Done));
        assert!(tracker.advance(Stage::Error));
    }
}
