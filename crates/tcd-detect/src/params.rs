// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tcd_core::TcdError;

/// One hyperparameter value as it arrives from a grid.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "\"{value}\""),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Immutable name -> value mapping for one grid point.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterCombination {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterCombination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterCombination
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Display for ParameterCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (name, value)) in self.values.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// Typed, consuming view over a combination for one detector.
///
/// Every accessor records the key as known; [`ParamReader::finish`] rejects
/// whatever the detector never asked for.
pub(crate) struct ParamReader<'a> {
    detector: &'static str,
    combination: &'a ParameterCombination,
    known: BTreeSet<&'static str>,
}

impl<'a> ParamReader<'a> {
    pub(crate) fn new(detector: &'static str, combination: &'a ParameterCombination) -> Self {
        Self {
            detector,
            combination,
            known: BTreeSet::new(),
        }
    }

    fn lookup(&mut self, key: &'static str) -> Option<&'a ParamValue> {
        self.known.insert(key);
        match self.combination.get(key) {
            None | Some(ParamValue::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn type_error(&self, key: &str, expected: &str, got: &ParamValue) -> TcdError {
        TcdError::configuration(format!(
            "{}.{key} must be {expected}, got {got}",
            self.detector
        ))
    }

    pub(crate) fn f64(&mut self, key: &'static str) -> Result<Option<f64>, TcdError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(ParamValue::Float(value)) => Ok(Some(*value)),
            Some(ParamValue::Int(value)) => Ok(Some(*value as f64)),
            Some(other) => Err(self.type_error(key, "a number", other)),
        }
    }

    /// Reads the first present key among aliases; giving more than one fails.
    pub(crate) fn f64_any(&mut self, keys: &[&'static str]) -> Result<Option<f64>, TcdError> {
        let mut found: Option<(&'static str, f64)> = None;
        for &key in keys {
            if let Some(value) = self.f64(key)? {
                if let Some((previous, _)) = found {
                    return Err(TcdError::configuration(format!(
                        "{}.{previous} and {}.{key} are aliases; set only one",
                        self.detector, self.detector
                    )));
                }
                found = Some((key, value));
            }
        }
        Ok(found.map(|(_, value)| value))
    }

    pub(crate) fn usize(&mut self, key: &'static str) -> Result<Option<usize>, TcdError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(ParamValue::Int(value)) => usize::try_from(*value).map(Some).map_err(|_| {
                self.type_error(key, "a non-negative integer", &ParamValue::Int(*value))
            }),
            Some(other) => Err(self.type_error(key, "a non-negative integer", other)),
        }
    }

    pub(crate) fn u64(&mut self, key: &'static str) -> Result<Option<u64>, TcdError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(ParamValue::Int(value)) => u64::try_from(*value).map(Some).map_err(|_| {
                self.type_error(key, "a non-negative integer", &ParamValue::Int(*value))
            }),
            Some(other) => Err(self.type_error(key, "a non-negative integer", other)),
        }
    }

    pub(crate) fn bool(&mut self, key: &'static str) -> Result<Option<bool>, TcdError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(ParamValue::Bool(value)) => Ok(Some(*value)),
            Some(other) => Err(self.type_error(key, "a boolean", other)),
        }
    }

    /// Raw access for keys that accept several shapes ("auto" or a number).
    pub(crate) fn raw(&mut self, key: &'static str) -> Option<&'a ParamValue> {
        self.lookup(key)
    }

    /// Marks keys the detector tolerates but does not use.
    pub(crate) fn accept(&mut self, keys: &[&'static str]) {
        self.known.extend(keys.iter().copied());
    }

    pub(crate) fn detector(&self) -> &'static str {
        self.detector
    }

    pub(crate) fn finish(self) -> Result<(), TcdError> {
        let unknown: Vec<&str> = self
            .combination
            .iter()
            .map(|(name, _)| name)
            .filter(|name| !self.known.iter().any(|known| known == name))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        let expected: Vec<&str> = self.known.iter().copied().collect();
        Err(TcdError::configuration(format!(
            "unknown hyperparameter(s) {} for {}; expected any of {}",
            unknown.join(", "),
            self.detector,
            expected.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{ParamReader, ParamValue, ParameterCombination};

    #[test]
    fn display_lists_parameters_in_key_order() {
        let combination = ParameterCombination::new()
            .with("min_samples", 5)
            .with("eps", 0.5)
            .with("metric", "euclidean");
        assert_eq!(
            combination.to_string(),
            "{eps=0.5, metric=\"euclidean\", min_samples=5}"
        );
    }

    #[test]
    fn reader_accepts_ints_as_floats_and_treats_null_as_absent() {
        let combination = ParameterCombination::new()
            .with("eps", 1)
            .with("random_state", ParamValue::Null);
        let mut reader = ParamReader::new("dbscan", &combination);
        assert_eq!(reader.f64("eps").expect("int is a number"), Some(1.0));
        assert_eq!(reader.u64("random_state").expect("null is absent"), None);
        reader.finish().expect("all keys were read");
    }

    #[test]
    fn reader_rejects_wrong_types_negative_counts_and_unknown_keys() {
        let combination = ParameterCombination::new().with("min_samples", -2);
        let mut reader = ParamReader::new("dbscan", &combination);
        let err = reader.usize("min_samples").expect_err("negative count should fail");
        assert_eq!(
            err.to_string(),
            "invalid configuration: dbscan.min_samples must be a non-negative integer, got -2"
        );

        let combination = ParameterCombination::new().with("eps", "wide");
        let mut reader = ParamReader::new("dbscan", &combination);
        assert!(reader.f64("eps").is_err());

        let combination = ParameterCombination::new().with("epsilon", 0.5);
        let mut reader = ParamReader::new("dbscan", &combination);
        let _ = reader.f64("eps");
        let err = reader.finish().expect_err("unknown key should fail");
        assert!(err.to_string().contains("unknown hyperparameter(s) epsilon for dbscan"));
    }

    #[test]
    fn accepted_keys_pass_finish_whatever_their_value() {
        let combination = ParameterCombination::new()
            .with("eps", 0.5)
            .with("n_jobs", -1)
            .with("algorithm", "ball_tree");
        let mut reader = ParamReader::new("dbscan", &combination);
        assert_eq!(reader.f64("eps").expect("eps is a number"), Some(0.5));
        reader.accept(&["algorithm", "leaf_size", "n_jobs"]);
        reader.finish().expect("accepted keys are known");

        let combination = ParameterCombination::new().with("n_jobs", 4);
        let mut reader = ParamReader::new("dbscan", &combination);
        reader.accept(&["algorithm"]);
        let err = reader.finish().expect_err("n_jobs was not accepted");
        assert!(err.to_string().contains("expected any of algorithm"));
    }

    #[test]
    fn aliases_resolve_but_conflict_when_both_given() {
        let combination = ParameterCombination::new().with("p_values", 0.1);
        let mut reader = ParamReader::new("mahalanobis", &combination);
        assert_eq!(
            reader.f64_any(&["alpha", "p_values"]).expect("alias resolves"),
            Some(0.1)
        );

        let combination = ParameterCombination::new()
            .with("alpha", 0.1)
            .with("p_values", 0.2);
        let mut reader = ParamReader::new("mahalanobis", &combination);
        let err = reader
            .f64_any(&["alpha", "p_values"])
            .expect_err("both aliases should fail");
        assert!(err.to_string().contains("are aliases"));
    }

    #[test]
    fn from_iterator_collects_pairs() {
        let combination: ParameterCombination =
            [("eps", ParamValue::Float(0.3)), ("min_samples", ParamValue::Int(3))]
                .into_iter()
                .collect();
        assert_eq!(combination.len(), 2);
        assert_eq!(combination.get("eps"), Some(&ParamValue::Float(0.3)));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn combination_deserializes_from_plain_json_object() {
        let combination: ParameterCombination =
            serde_json::from_str(r#"{"eps": 0.5, "min_samples": 5, "metric": null}"#)
                .expect("combination should deserialize");
        assert_eq!(combination.get("eps"), Some(&ParamValue::Float(0.5)));
        assert_eq!(combination.get("min_samples"), Some(&ParamValue::Int(5)));
        assert_eq!(combination.get("metric"), Some(&ParamValue::Null));
    }
}
