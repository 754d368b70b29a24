// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::TcdError;
use crate::table::FieldId;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// Known change events per field over a bounded field universe.
///
/// Fields of the universe may have no events at all; they still take part in
/// evaluation as sources of false positives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroundTruth {
    universe: BTreeSet<FieldId>,
    events: BTreeMap<FieldId, Vec<NaiveDate>>,
}

impl GroundTruth {
    pub fn new<I: IntoIterator<Item = FieldId>>(universe: I) -> Self {
        Self {
            universe: universe.into_iter().collect(),
            events: BTreeMap::new(),
        }
    }

    /// Universe of field ids `0..n`.
    pub fn with_field_range(n: FieldId) -> Self {
        Self::new(0..n)
    }

    /// Records an event, keeping each field's dates ascending.
    pub fn add_event(&mut self, field_id: FieldId, date: NaiveDate) -> Result<(), TcdError> {
        if !self.universe.contains(&field_id) {
            return Err(TcdError::data_integrity(format!(
                "event on {date} references field {field_id} outside the field universe"
            )));
        }
        let dates = self.events.entry(field_id).or_default();
        let at = dates.partition_point(|existing| *existing <= date);
        dates.insert(at, date);
        Ok(())
    }

    pub fn with_event(mut self, field_id: FieldId, date: NaiveDate) -> Result<Self, TcdError> {
        self.add_event(field_id, date)?;
        Ok(self)
    }

    pub fn universe(&self) -> &BTreeSet<FieldId> {
        &self.universe
    }

    pub fn contains_field(&self, field_id: FieldId) -> bool {
        self.universe.contains(&field_id)
    }

    /// Event dates of one field, ascending; empty for fields without events.
    pub fn events(&self, field_id: FieldId) -> &[NaiveDate] {
        self.events.get(&field_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn event_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    /// Fails when any given field id lies outside the universe.
    pub fn ensure_known_fields<I>(&self, field_ids: I, source: &str) -> Result<(), TcdError>
    where
        I: IntoIterator<Item = FieldId>,
    {
        let unknown: Vec<FieldId> = field_ids
            .into_iter()
            .filter(|field_id| !self.universe.contains(field_id))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        Err(TcdError::data_integrity(format!(
            "{source} references fields {unknown:?} outside the ground-truth field universe"
        )))
    }
}
