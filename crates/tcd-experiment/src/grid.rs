// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tcd_core::TcdError;
use tcd_detect::{ParamValue, ParameterCombination};

/// Cartesian hyperparameter grid, `name -> [values]`.
///
/// Expansion walks names in sorted order with the last name varying
/// fastest. An empty grid expands to a single empty combination.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterGrid {
    axes: BTreeMap<String, Vec<ParamValue>>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one axis.
    pub fn with_axis<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.axes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn axes(&self) -> impl Iterator<Item = (&str, &[ParamValue])> {
        self.axes
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of combinations the grid expands to, saturating at
    /// `usize::MAX`.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    /// Number of combinations, or `None` when it overflows `usize`.
    pub fn checked_len(&self) -> Option<usize> {
        self.axes
            .values()
            .try_fold(1usize, |total, values| total.checked_mul(values.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validate(&self) -> Result<(), TcdError> {
        if let Some((name, _)) = self.axes.iter().find(|(_, values)| values.is_empty()) {
            return Err(TcdError::configuration(format!(
                "grid axis '{name}' has no values"
            )));
        }
        Ok(())
    }

    /// Expands the grid; fails when an axis has no values or the product of
    /// axis lengths overflows.
    pub fn combinations(&self) -> Result<Vec<ParameterCombination>, TcdError> {
        self.validate()?;

        let axes: Vec<(&String, &Vec<ParamValue>)> = self.axes.iter().collect();
        let total = self.checked_len().ok_or_else(|| {
            TcdError::configuration(format!(
                "grid over {} axes expands to more than {} combinations",
                axes.len(),
                usize::MAX
            ))
        })?;
        let mut out = Vec::with_capacity(total);
        let mut cursor = vec![0usize; axes.len()];

        for _ in 0..total {
            out.push(
                axes.iter()
                    .zip(&cursor)
                    .map(|((name, values), &pos)| (name.as_str(), values[pos].clone()))
                    .collect::<ParameterCombination>(),
            );

            for axis in (0..axes.len()).rev() {
                cursor[axis] += 1;
                if cursor[axis] < axes[axis].1.len() {
                    break;
                }
                cursor[axis] = 0;
            }
        }
        Ok(out)
    }
}
