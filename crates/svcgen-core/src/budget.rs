//! Retry budget for the two feedback loops
use crate::directive::RegenerationKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Counter {
    used: u32,
    max: u32,
}

impl Counter {
    fn new(max: u32) -> Self {
        Self {
            used: 0,
            max: max.max(1),
        }
    }
}

/// Attempt counters for the functional and syntax loops. A loop whose
/// counter reaches its cap stops and keeps its last candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    functional: Counter,
    syntax: Counter,
}

impl RetryBudget {
    /// Caps of 0 are raised to 1 so each loop runs at least once.
    pub fn new(functional_max: u32, syntax_max: u32) -> Self {
        Self {
            functional: Counter::new(functional_max),
            syntax: Counter::new(syntax_max),
        }
    }

    fn counter(&self, kind: RegenerationKind) -> &Counter {
        match kind {
            RegenerationKind::Functional => &self.functional,
            RegenerationKind::Syntax => &self.syntax,
        }
    }

    /// Count one attempt and return the attempt number (1-based).
    pub fn record(&mut self, kind: RegenerationKind) -> u32 {
        let counter = match kind {
            RegenerationKind::Functional => &mut self.functional,
            RegenerationKind::Syntax => &mut self.syntax,
        };
        counter.used = (counter.used + 1).min(counter.max);
        counter.used
    }

    pub fn used(&self, kind: RegenerationKind) -> u32 {
        self.counter(kind).used
    }

    pub fn max(&self, kind: RegenerationKind) -> u32 {
        self.counter(kind).max
    }

    pub fn exhausted(&self, kind: RegenerationKind) -> bool {
        let counter = self.counter(kind);
        counter.used >= counter.max
    }
}
