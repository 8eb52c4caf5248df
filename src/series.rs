//! ==============================================================================
//! series.rs - incremental series accumulator
//! ==============================================================================
//!
//! purpose:
//!     holds the deduplicated readings shown on the history chart.
//!     every tick merges the last N fetched readings into it; points whose
//!     instant is already present are dropped, new ones are appended in
//!     fetch order. nothing is ever removed or re-sorted.
//!
//! relationships:
//!     - used by: poller.rs (only writer), render.rs (read-only view)
//!     - uses: domain.rs (Reading)
//!
//! ==============================================================================

use std::collections::HashSet;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Serialize, Serializer};

use crate::domain::Reading;

/// lifecycle of a series; NonEmpty never reverts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesState {
    Empty,
    NonEmpty,
}

/// horizontal reference line at the mean, spanning the whole series
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeanLine {
    #[serde(serialize_with = "rfc3339")]
    pub from: DateTime<Tz>,
    #[serde(serialize_with = "rfc3339")]
    pub to: DateTime<Tz>,
    pub value: f64,
}

fn rfc3339<S: Serializer>(ts: &DateTime<Tz>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339())
}

/// parallel timestamp / value sequences in arrival order
#[derive(Clone, Debug, Default)]
pub struct Series {
    timestamps: Vec<DateTime<Tz>>,
    values: Vec<f64>,
    seen: HashSet<DateTime<Tz>>,
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.timestamps == other.timestamps && self.values == other.values
    }
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamps(&self) -> &[DateTime<Tz>] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn state(&self) -> SeriesState {
        if self.is_empty() {
            SeriesState::Empty
        } else {
            SeriesState::NonEmpty
        }
    }

    /// append every reading whose instant is not present yet
    ///
    /// duplicates inside the batch itself are suppressed as well, the first
    /// occurrence wins. returns the number of appended points.
    pub fn merge(&mut self, batch: &[Reading]) -> usize {
        let before = self.len();
        for reading in batch {
            if self.seen.insert(reading.timestamp) {
                self.timestamps.push(reading.timestamp);
                self.values.push(reading.value);
            }
        }
        debug_assert_eq!(self.timestamps.len(), self.values.len());
        self.len() - before
    }

    /// merge into a copy, leaving `self` untouched
    pub fn merged(&self, batch: &[Reading]) -> Series {
        let mut next = self.clone();
        next.merge(batch);
        next
    }

    /// arithmetic mean of all values, None when empty
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// reference line from the first to the last timestamp at the mean
    pub fn mean_line(&self) -> Option<MeanLine> {
        let mean = self.mean()?;
        let from = *self.timestamps.first()?;
        let to = *self.timestamps.last()?;
        Some(MeanLine { from, to, value: mean })
    }
}
