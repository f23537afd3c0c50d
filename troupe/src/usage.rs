//! Token and tool-call accounting for runs.
//!
//! [`Usage`] is the unit of token reporting from a single model call;
//! [`UsageTracker`] accumulates usage and tool-call counts across a run.
//! Totals are derived, never stored.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token usage reported by one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    #[serde(default)]
    pub input_tokens: u64,

    /// Number of tokens in the completion.
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Total tokens used (input + output).
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Check if no tokens were used.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Monotonic counters for prompt tokens, completion tokens, and tool calls,
/// scoped to one run.
///
/// The runner owns the tracker and mutates it from a single logical
/// timeline; no concurrency discipline is required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTracker {
    usage: Usage,
    tool_calls: u64,
}

impl UsageTracker {
    /// Create an empty tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            usage: Usage::zero(),
            tool_calls: 0,
        }
    }

    /// Accumulate prompt and completion token deltas.
    pub const fn add(&mut self, prompt: u64, completion: u64) {
        self.usage.input_tokens += prompt;
        self.usage.output_tokens += completion;
    }

    /// Accumulate a usage record from a model call.
    pub const fn add_usage(&mut self, usage: Usage) {
        self.add(usage.input_tokens, usage.output_tokens);
    }

    /// Count `n` dispatched tool calls.
    pub const fn increment_tool_calls(&mut self, n: u64) {
        self.tool_calls += n;
    }

    /// Snapshot of the accumulated token usage.
    #[must_use]
    pub const fn usage(&self) -> Usage {
        self.usage
    }

    /// Total prompt tokens so far.
    #[must_use]
    pub const fn input_tokens(&self) -> u64 {
        self.usage.input_tokens
    }

    /// Total completion tokens so far.
    #[must_use]
    pub const fn output_tokens(&self) -> u64 {
        self.usage.output_tokens
    }

    /// Total tokens so far (derived).
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.usage.total()
    }

    /// Total dispatched tool calls so far.
    #[must_use]
    pub const fn tool_calls(&self) -> u64 {
        self.tool_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_derived() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.total(), 150);
        assert!(!usage.is_empty());
        assert!(Usage::zero().is_empty());
    }

    #[test]
    fn add_and_add_assign() {
        let mut usage = Usage::new(10, 5);
        usage += Usage::new(20, 10);
        assert_eq!(usage, Usage::new(30, 15));
        assert_eq!(Usage::new(1, 2) + Usage::new(3, 4), Usage::new(4, 6));
    }

    #[test]
    fn tracker_accumulates() {
        let mut tracker = UsageTracker::new();
        tracker.add(100, 40);
        tracker.add_usage(Usage::new(50, 10));
        tracker.increment_tool_calls(3);
        tracker.increment_tool_calls(1);

        assert_eq!(tracker.input_tokens(), 150);
        assert_eq!(tracker.output_tokens(), 50);
        assert_eq!(tracker.total_tokens(), 200);
        assert_eq!(tracker.tool_calls(), 4);
        assert_eq!(tracker.usage(), Usage::new(150, 50));
    }
}
