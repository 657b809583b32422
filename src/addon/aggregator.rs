//! Error aggregation per batch operation.
//!
//! Lets the presentation layer show one consolidated report per batch (e.g.
//! the startup "load all" pass) instead of one popup per failure.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::AddonError;

/// Operation that produced a group of errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Batch {
    /// Discover and load everything on startup.
    Startup,
    /// Directory rescan.
    Refresh,
    /// Single user-triggered operation.
    Manual,
    /// Reload of one addon.
    Reload(String),
    /// Lifecycle requests queued by addons.
    Deferred,
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Batch::Startup => write!(f, "startup"),
            Batch::Refresh => write!(f, "refresh"),
            Batch::Manual => write!(f, "manual"),
            Batch::Reload(id) => write!(f, "reload of {}", id),
            Batch::Deferred => write!(f, "deferred"),
        }
    }
}

/// Errors grouped by batch, batches in first-seen order.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    batches: Vec<(Batch, Vec<AddonError>)>,
}

impl ErrorAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a batch, discarding errors left from a previous run of it.
    pub fn begin(&mut self, batch: Batch) {
        match self.batches.iter_mut().find(|(b, _)| *b == batch) {
            Some((_, errors)) => errors.clear(),
            None => self.batches.push((batch, Vec::new())),
        }
    }

    /// Adds an error to a batch.
    pub fn record(&mut self, batch: &Batch, error: AddonError) {
        match self.batches.iter_mut().find(|(b, _)| b == batch) {
            Some((_, errors)) => errors.push(error),
            None => self.batches.push((batch.clone(), vec![error])),
        }
    }

    /// Errors of one batch.
    #[must_use]
    pub fn get(&self, batch: &Batch) -> &[AddonError] {
        self.batches
            .iter()
            .find(|(b, _)| b == batch)
            .map(|(_, errors)| errors.as_slice())
            .unwrap_or(&[])
    }

    /// Removes and returns the errors of one batch.
    pub fn take(&mut self, batch: &Batch) -> Vec<AddonError> {
        match self.batches.iter().position(|(b, _)| b == batch) {
            Some(idx) => self.batches.remove(idx).1,
            None => Vec::new(),
        }
    }

    /// Non-empty batches in order.
    pub fn iter(&self) -> impl Iterator<Item = (&Batch, &[AddonError])> {
        self.batches
            .iter()
            .filter(|(_, errors)| !errors.is_empty())
            .map(|(b, errors)| (b, errors.as_slice()))
    }

    /// Total number of errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.iter().map(|(_, e)| e.len()).sum()
    }

    /// True if no errors are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.batches.clear();
    }

    /// Plain-text report for one batch.
    #[must_use]
    pub fn report(&self, batch: &Batch) -> String {
        let errors = self.get(batch);
        let mut out = format!("{} error(s) during {}", errors.len(), batch);
        for err in errors {
            out.push_str(&format!(
                "\n  {} ({}): {}: {}",
                err.name,
                err.filename.display(),
                err.reason,
                err.cause.message
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::error::Fault;
    use std::path::Path;

    fn err(name: &str) -> AddonError {
        AddonError::compile(name, Path::new("x.addon.lua"), Fault::new("bad"))
    }

    #[test]
    fn test_record_and_get() {
        let mut agg = ErrorAggregator::new();
        agg.record(&Batch::Startup, err("a"));
        agg.record(&Batch::Startup, err("b"));
        agg.record(&Batch::Reload("c".into()), err("c"));

        assert_eq!(agg.get(&Batch::Startup).len(), 2);
        assert_eq!(agg.get(&Batch::Reload("c".into())).len(), 1);
        assert!(agg.get(&Batch::Manual).is_empty());
        assert_eq!(agg.len(), 3);
    }

    #[test]
    fn test_begin_resets_batch() {
        let mut agg = ErrorAggregator::new();
        agg.record(&Batch::Refresh, err("a"));
        agg.begin(Batch::Refresh);
        assert!(agg.get(&Batch::Refresh).is_empty());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_take_and_iter() {
        let mut agg = ErrorAggregator::new();
        agg.begin(Batch::Manual);
        agg.record(&Batch::Startup, err("a"));

        let batches: Vec<_> = agg.iter().map(|(b, _)| b.clone()).collect();
        assert_eq!(batches, vec![Batch::Startup]);

        let taken = agg.take(&Batch::Startup);
        assert_eq!(taken.len(), 1);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_report() {
        let mut agg = ErrorAggregator::new();
        agg.record(&Batch::Startup, err("a"));
        let report = agg.report(&Batch::Startup);
        assert!(report.starts_with("1 error(s) during startup"));
        assert!(report.contains("a (x.addon.lua): Could not be compiled: bad"));
    }
}
