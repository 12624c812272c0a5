//! Severity classification of program output.
//!
//! The framework prints uncaught exceptions between a banner line that
//! contains [`BANNER_START`] and a closing rule made only of `═`. Every line
//! from the banner through the closing rule is error output.

/// Marker that opens an exception banner.
pub const BANNER_START: &str = "══╡ EXCEPTION CAUGHT BY";

const RULE_CHAR: char = '═';

/// Output severity channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    /// Normal program output.
    Normal,
    /// Error-severity output.
    Error,
}

/// Stateful line classifier; one per session.
#[derive(Debug, Clone, Default)]
pub struct OutputClassifier {
    in_banner: bool,
}

impl OutputClassifier {
    /// Classify `line`, updating banner state.
    pub fn classify(&mut self, line: &str) -> OutputChannel {
        if line.contains(BANNER_START) {
            self.in_banner = true;
        }
        if !self.in_banner {
            return OutputChannel::Normal;
        }
        if is_closing_rule(line) {
            self.in_banner = false;
        }
        OutputChannel::Error
    }

    /// Whether the classifier is inside an exception banner.
    #[must_use]
    pub fn in_banner(&self) -> bool {
        self.in_banner
    }
}

fn is_closing_rule(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == RULE_CHAR)
}
