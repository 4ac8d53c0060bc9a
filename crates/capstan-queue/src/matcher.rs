//! Label matching for task-to-agent assignment.

use capstan_core::ports::Matcher;
use capstan_core::task::Task;
use std::collections::HashMap;

const SCORE_EXACT: u32 = 10;
const SCORE_WILDCARD: u32 = 1;

/// Matches tasks against an agent's declared labels.
///
/// Every non-empty label a task requires must be present in the agent's
/// filter. A `"*"` value on the agent side matches any task value but
/// scores lower than an exact match, so exact-fit agents win assignment.
/// An agent with no declared labels only matches tasks with no label
/// requirements.
#[derive(Debug, Clone, Default)]
pub struct LabelMatcher {
    labels: HashMap<String, String>,
}

impl LabelMatcher {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }
}

impl Matcher for LabelMatcher {
    fn matches(&self, task: &Task) -> Option<u32> {
        let mut score = 0;
        for (key, value) in &task.labels {
            if value.is_empty() {
                continue;
            }
            match self.labels.get(key) {
                Some(have) if have == "*" => score += SCORE_WILDCARD,
                Some(have) if have == value => score += SCORE_EXACT,
                _ => return None,
            }
        }
        Some(score)
    }
}
