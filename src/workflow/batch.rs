use serde::Serialize;

/// Per-item tally of a batch. Item failures are reported here, not escalated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// (item index, error) for every failed item.
    pub failures: Vec<(usize, String)>,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, index: usize, error: String) {
        self.failed += 1;
        self.failures.push((index, error));
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// `"3 deleted"` or `"2 deleted, 1 failed"`. The failure count is never
    /// dropped from the summary.
    pub fn summary(&self, verb: &str) -> String {
        if self.failed == 0 {
            format!("{} {}", self.succeeded, verb)
        } else {
            format!("{} {}, {} failed", self.succeeded, verb, self.failed)
        }
    }
}
