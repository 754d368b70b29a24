// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::TcdError;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Identifier of a monitored field.
pub type FieldId = u32;

/// Feature columns used when a run does not configure its own.
pub const DEFAULT_FEATURE_KEYS: [&str; 3] = ["VV_ratio", "VH_ratio", "VH_VV_ratio_diff"];

/// Dense row-major `rows x cols` matrix of one date's cross-field sample.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleMatrix {
    values: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl SampleMatrix {
    /// Constructs a validated matrix from row-major values.
    pub fn new(values: Vec<f64>, rows: usize, cols: usize) -> Result<Self, TcdError> {
        if cols == 0 {
            return Err(TcdError::invalid_input("sample matrix needs at least one column"));
        }
        let expected_len = rows
            .checked_mul(cols)
            .ok_or_else(|| TcdError::invalid_input("rows*cols overflow while validating shape"))?;
        if values.len() != expected_len {
            return Err(TcdError::invalid_input(format!(
                "value length mismatch: got {}, expected {expected_len} (rows={rows}, cols={cols})",
                values.len()
            )));
        }
        Ok(Self { values, rows, cols })
    }

    /// Builds a matrix from equally sized rows.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self, TcdError> {
        let cols = rows.first().map(|row| row.as_ref().len()).unwrap_or(0);
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(TcdError::invalid_input(format!(
                    "ragged sample rows: row {idx} has {} values, expected {cols}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }
        Self::new(values, rows.len(), cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let start = i * self.cols;
        &self.values[start..start + self.cols]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.cols + j]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.cols)
    }

    /// Fails with a precondition error when any entry is NaN or infinite.
    pub fn ensure_finite(&self) -> Result<(), TcdError> {
        if let Some(idx) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(TcdError::precondition(format!(
                "sample contains a non-finite value at row {}, column {}",
                idx / self.cols,
                idx % self.cols
            )));
        }
        Ok(())
    }

    /// True when every row equals the first one.
    pub fn has_identical_rows(&self) -> bool {
        match self.iter_rows().next() {
            Some(first) => self.iter_rows().all(|row| row == first),
            None => true,
        }
    }
}

/// One date's slice of the feature table, index-aligned with `field_ids`.
#[derive(Clone, Debug, PartialEq)]
pub struct DateSample {
    pub date: NaiveDate,
    pub field_ids: Vec<FieldId>,
    pub matrix: SampleMatrix,
}

/// Feature observations keyed by `(date, field_id)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    rows: BTreeMap<NaiveDate, BTreeMap<FieldId, Vec<f64>>>,
    len: usize,
}

impl FeatureTable {
    /// Creates an empty table with the given column names.
    pub fn new<I, S>(columns: I) -> Result<Self, TcdError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(TcdError::invalid_input("feature table needs at least one column"));
        }
        for (idx, name) in columns.iter().enumerate() {
            if columns[..idx].contains(name) {
                return Err(TcdError::invalid_input(format!(
                    "duplicate feature column '{name}'"
                )));
            }
        }
        Ok(Self {
            columns,
            rows: BTreeMap::new(),
            len: 0,
        })
    }

    /// Adds one observation; `(date, field_id)` must be new.
    pub fn insert(
        &mut self,
        date: NaiveDate,
        field_id: FieldId,
        values: Vec<f64>,
    ) -> Result<(), TcdError> {
        if values.len() != self.columns.len() {
            return Err(TcdError::invalid_input(format!(
                "observation ({date}, field {field_id}) has {} values, table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let by_field = self.rows.entry(date).or_default();
        if by_field.contains_key(&field_id) {
            return Err(TcdError::invalid_input(format!(
                "duplicate observation for ({date}, field {field_id})"
            )));
        }
        by_field.insert(field_id, values);
        self.len += 1;
        Ok(())
    }

    /// Builder-style variant of [`FeatureTable::insert`].
    pub fn with_observation(
        mut self,
        date: NaiveDate,
        field_id: FieldId,
        values: Vec<f64>,
    ) -> Result<Self, TcdError> {
        self.insert(date, field_id, values)?;
        Ok(self)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Distinct observation dates, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.keys().copied()
    }

    pub fn date_count(&self) -> usize {
        self.rows.len()
    }

    /// Observations as `(date, field_id, values)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, FieldId, &[f64])> + '_ {
        self.rows.iter().flat_map(|(date, by_field)| {
            by_field
                .iter()
                .map(move |(field_id, values)| (*date, *field_id, values.as_slice()))
        })
    }

    /// Resolves feature keys to column positions.
    pub fn column_indices<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<usize>, TcdError> {
        if keys.is_empty() {
            return Err(TcdError::configuration("at least one feature key is required"));
        }
        keys.iter()
            .map(|key| {
                let key = key.as_ref();
                self.columns
                    .iter()
                    .position(|column| column == key)
                    .ok_or_else(|| {
                        TcdError::configuration(format!(
                            "unknown feature key '{key}'; available columns: {}",
                            self.columns.join(", ")
                        ))
                    })
            })
            .collect()
    }

    /// Slices one date's rows, ordered by field id, restricted to `columns`.
    pub fn sample(&self, date: NaiveDate, columns: &[usize]) -> Result<DateSample, TcdError> {
        let by_field = self.rows.get(&date).ok_or_else(|| {
            TcdError::invalid_input(format!("no observations recorded for {date}"))
        })?;
        let mut field_ids = Vec::with_capacity(by_field.len());
        let mut values = Vec::with_capacity(by_field.len() * columns.len());
        for (field_id, row) in by_field {
            field_ids.push(*field_id);
            for &col in columns {
                let value = row.get(col).copied().ok_or_else(|| {
                    TcdError::invalid_input(format!(
                        "column index {col} out of range for {} columns",
                        self.columns.len()
                    ))
                })?;
                values.push(value);
            }
        }
        let matrix = SampleMatrix::new(values, field_ids.len(), columns.len())?;
        Ok(DateSample {
            date,
            field_ids,
            matrix,
        })
    }

    /// Observation dates of one field, ascending.
    pub fn field_dates(&self, field_id: FieldId) -> Vec<NaiveDate> {
        self.rows
            .iter()
            .filter(|(_, by_field)| by_field.contains_key(&field_id))
            .map(|(date, _)| *date)
            .collect()
    }

    /// Distinct field ids present anywhere in the table, ascending.
    pub fn field_ids(&self) -> Vec<FieldId> {
        let mut ids: Vec<FieldId> = self
            .rows
            .values()
            .flat_map(|by_field| by_field.keys().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
