//! Per-item outcomes for batches where one item's failure must not stop the rest.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(&mut self, item: impl Into<String>) {
        self.skipped.push(item.into());
    }

    /// Fold one item's result into the report.
    pub fn record<T, E: fmt::Display>(&mut self, item: impl Into<String>, result: Result<T, E>) -> Option<T> {
        let item = item.into();
        match result {
            Ok(v) => {
                self.succeeded.push(item);
                Some(v)
            }
            Err(e) => {
                self.failed.push(ItemFailure { item, error: e.to_string() });
                None
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_collected_not_raised() {
        let mut report = BatchReport::new();
        assert_eq!(report.record("a", Ok::<_, String>(1)), Some(1));
        assert_eq!(report.record("b", Err::<u8, _>("boom")), None);
        report.skip("c");
        assert_eq!(report.record("d", Ok::<_, String>(())), Some(()));
        assert!(!report.is_success());
        assert_eq!(report.total(), 4);
        assert_eq!(report.succeeded, vec!["a", "d"]);
        assert_eq!(report.failed, vec![ItemFailure { item: "b".into(), error: "boom".into() }]);
    }

    #[test]
    fn empty_report_is_success() {
        assert!(BatchReport::new().is_success());
    }
}
