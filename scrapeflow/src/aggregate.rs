//! Merging of per-chunk records into a run's result list.
//!
//! Two records are duplicates when every field value matches. The first
//! occurrence wins and keeps its position.

use crate::extraction::ExtractionRecord;
use std::collections::HashSet;

/// Merges record lists in order, dropping exact duplicates.
#[must_use]
pub fn merge<I>(records: I) -> Vec<ExtractionRecord>
where
    I: IntoIterator<Item = ExtractionRecord>,
{
    let mut aggregator = ResultAggregator::new();
    aggregator.extend(records);
    aggregator.into_records()
}

/// Accumulates records across pages and chunks.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    records: Vec<ExtractionRecord>,
    seen: HashSet<ExtractionRecord>,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds records, skipping ones already held. Returns how many were new.
    pub fn extend<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = ExtractionRecord>,
    {
        let before = self.records.len();
        for record in records {
            if self.seen.insert(record.clone()) {
                self.records.push(record);
            }
        }
        self.records.len() - before
    }

    /// Number of distinct records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in first-seen order.
    #[must_use]
    pub fn records(&self) -> &[ExtractionRecord] {
        &self.records
    }

    /// Consumes the aggregator.
    #[must_use]
    pub fn into_records(self) -> Vec<ExtractionRecord> {
        self.records
    }

    /// Drops everything held.
    pub fn clear(&mut self) {
        self.records.clear();
        self.seen.clear();
    }
}
