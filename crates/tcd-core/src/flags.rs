// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::table::{FeatureTable, FieldId};
use crate::{DATE_FORMAT, TcdError};
use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};

/// A field marked as an outlier on one observation date.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutlierFlag {
    pub field_id: FieldId,
    pub date: NaiveDate,
}

/// An outlier flag with its closed validity window `[from_date, date]`.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowedFlag {
    field_id: FieldId,
    from_date: NaiveDate,
    date: NaiveDate,
}

impl WindowedFlag {
    pub fn new(field_id: FieldId, from_date: NaiveDate, date: NaiveDate) -> Result<Self, TcdError> {
        if from_date > date {
            return Err(TcdError::data_integrity(format!(
                "flag for field {field_id} has from_date {from_date} after date {date}"
            )));
        }
        Ok(Self {
            field_id,
            from_date,
            date,
        })
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    pub fn from_date(&self) -> NaiveDate {
        self.from_date
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Inclusive on both ends.
    pub fn covers(&self, event: NaiveDate) -> bool {
        self.from_date <= event && event <= self.date
    }

    pub fn formatted_from_date(&self) -> String {
        self.from_date.format(DATE_FORMAT).to_string()
    }

    pub fn formatted_date(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }
}

/// Validity windows keyed by `(field_id, date)`, valued by `from_date`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntervalTable {
    windows: BTreeMap<(FieldId, NaiveDate), NaiveDate>,
}

impl IntervalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the window of one observation; `from_date` must not follow `date`.
    pub fn insert(
        &mut self,
        field_id: FieldId,
        date: NaiveDate,
        from_date: NaiveDate,
    ) -> Result<(), TcdError> {
        if from_date > date {
            return Err(TcdError::data_integrity(format!(
                "interval for field {field_id} on {date} starts later, at {from_date}"
            )));
        }
        if self.windows.insert((field_id, date), from_date).is_some() {
            return Err(TcdError::data_integrity(format!(
                "duplicate interval for field {field_id} on {date}"
            )));
        }
        Ok(())
    }

    pub fn with_window(
        mut self,
        field_id: FieldId,
        date: NaiveDate,
        from_date: NaiveDate,
    ) -> Result<Self, TcdError> {
        self.insert(field_id, date, from_date)?;
        Ok(self)
    }

    /// Windows from consecutive observations of each field: every observation
    /// after the first covers the days since the previous one.
    pub fn from_observation_dates(table: &FeatureTable) -> Result<Self, TcdError> {
        let mut intervals = Self::new();
        for field_id in table.field_ids() {
            let dates = table.field_dates(field_id);
            for pair in dates.windows(2) {
                let from_date = pair[0].checked_add_days(Days::new(1)).ok_or_else(|| {
                    TcdError::invalid_input(format!("date overflow after {}", pair[0]))
                })?;
                intervals.insert(field_id, pair[1], from_date)?;
            }
        }
        Ok(intervals)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn from_date(&self, field_id: FieldId, date: NaiveDate) -> Option<NaiveDate> {
        self.windows.get(&(field_id, date)).copied()
    }

    pub fn field_ids(&self) -> BTreeSet<FieldId> {
        self.windows.keys().map(|(field_id, _)| *field_id).collect()
    }

    /// Inner join of raw flags against the windows; flags without a window
    /// are dropped and returned separately.
    pub fn attach(&self, flags: &[OutlierFlag]) -> (Vec<WindowedFlag>, Vec<OutlierFlag>) {
        let mut windowed = Vec::with_capacity(flags.len());
        let mut unwindowed = Vec::new();
        for flag in flags {
            match self.from_date(flag.field_id, flag.date) {
                Some(from_date) => windowed.push(WindowedFlag {
                    field_id: flag.field_id,
                    from_date,
                    date: flag.date,
                }),
                None => unwindowed.push(*flag),
            }
        }
        (windowed, unwindowed)
    }
}
