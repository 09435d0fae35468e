//! Key selectors and key sequences.
//!
//! A sequence lists, in fragment order, which key each fragment carries.
//! Selectors either point at a position in the job's key list or name an
//! explicit key value that must appear in that list.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};

/// Selects one key out of a job's key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum KeySelector {
    /// Position within the key list
    Index(usize),
    /// Explicit key value (must be present in the key list)
    Key {
        /// The key value
        key: i64,
    },
}

impl KeySelector {
    /// Resolve this selector against a key list, returning `(index, key)`.
    pub fn resolve(&self, keys: &[i64]) -> ModelResult<(usize, i64)> {
        match *self {
            KeySelector::Index(index) => keys.get(index).map(|k| (index, *k)).ok_or_else(|| {
                ModelError::InvalidSequence(format!(
                    "selector index {} out of range for {} keys",
                    index,
                    keys.len()
                ))
            }),
            KeySelector::Key { key } => keys
                .iter()
                .position(|k| *k == key)
                .map(|index| (index, key))
                .ok_or_else(|| {
                    ModelError::InvalidSequence(format!("key {} is not in the key list", key))
                }),
        }
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Index(i) => write!(f, "{}", i),
            KeySelector::Key { key } => write!(f, "key:{}", key),
        }
    }
}

/// Ordered list of key selectors assigned to fragments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct KeySequence(pub Vec<KeySelector>);

impl KeySequence {
    /// Build a sequence from key indices.
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self(indices.into_iter().map(KeySelector::Index).collect())
    }

    /// Build a sequence from explicit key values.
    pub fn from_keys(keys: impl IntoIterator<Item = i64>) -> Self {
        Self(keys.into_iter().map(|key| KeySelector::Key { key }).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn selectors(&self) -> &[KeySelector] {
        &self.0
    }

    /// Resolve every selector against `keys`, returning `(index, key)` pairs.
    pub fn resolve(&self, keys: &[i64]) -> ModelResult<Vec<(usize, i64)>> {
        if keys.is_empty() {
            return Err(ModelError::invalid("keys list cannot be empty"));
        }
        if self.is_empty() {
            return Err(ModelError::invalid("sequence cannot be empty"));
        }
        self.0.iter().map(|s| s.resolve(keys)).collect()
    }
}

impl FromStr for KeySequence {
    type Err = ModelError;

    /// Parse `"0231"` (one digit per fragment), `"0,2,13"` (comma separated
    /// indices), or a JSON array of selectors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ModelError::invalid("sequence cannot be empty"));
        }

        if s.starts_with('[') {
            return serde_json::from_str(s)
                .map_err(|e| ModelError::InvalidSequence(format!("bad JSON sequence: {}", e)));
        }

        if s.contains(',') {
            return s
                .split(',')
                .map(|part| {
                    part.trim().parse::<usize>().map(KeySelector::Index).map_err(|_| {
                        ModelError::InvalidSequence(format!("'{}' is not a key index", part.trim()))
                    })
                })
                .collect::<ModelResult<Vec<_>>>()
                .map(Self);
        }

        s.chars()
            .map(|c| {
                c.to_digit(10)
                    .map(|d| KeySelector::Index(d as usize))
                    .ok_or_else(|| ModelError::InvalidSequence(format!("'{}' is not a digit", c)))
            })
            .collect::<ModelResult<Vec<_>>>()
            .map(Self)
    }
}

impl fmt::Display for KeySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digit_string() {
        let seq: KeySequence = "0231".parse().unwrap();
        assert_eq!(seq, KeySequence::from_indices([0, 2, 3, 1]));
    }

    #[test]
    fn test_parse_comma_list() {
        let seq: KeySequence = "0, 2,13".parse().unwrap();
        assert_eq!(seq, KeySequence::from_indices([0, 2, 13]));
    }

    #[test]
    fn test_parse_json_mixed() {
        let seq: KeySequence = r#"[1, {"key": 12}]"#.parse().unwrap();
        assert_eq!(
            seq.selectors(),
            &[KeySelector::Index(1), KeySelector::Key { key: 12 }]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<KeySequence>().is_err());
        assert!("01x".parse::<KeySequence>().is_err());
        assert!("1,a".parse::<KeySequence>().is_err());
    }

    #[test]
    fn test_resolve() {
        let keys = [10, 11, 12, 13];
        let seq = KeySequence(vec![KeySelector::Index(2), KeySelector::Key { key: 13 }]);
        assert_eq!(seq.resolve(&keys).unwrap(), vec![(2, 12), (3, 13)]);
    }

    #[test]
    fn test_resolve_out_of_range() {
        let keys = [10, 11];
        assert!(KeySequence::from_indices([0, 2]).resolve(&keys).is_err());
        assert!(KeySequence::from_keys([99]).resolve(&keys).is_err());
        assert!(KeySequence::default().resolve(&keys).is_err());
        assert!(KeySequence::from_indices([0]).resolve(&[]).is_err());
    }
}
