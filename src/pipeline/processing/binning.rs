use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::UNKNOWN_BIN;
use crate::types::Cell;

/// An inclusive code range sharing one category label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    pub lower: i64,
    pub upper: i64,
    pub label: String,
}

impl Bin {
    pub fn new(lower: i64, upper: i64, label: &str) -> Self {
        Self {
            lower,
            upper,
            label: label.to_string(),
        }
    }

    pub fn contains(&self, code: i64) -> bool {
        self.lower <= code && code <= self.upper
    }
}

/// Bins are keyed by the lower bound of their range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinKey {
    Range(i64),
    Unknown,
}

impl fmt::Display for BinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinKey::Range(lower) => write!(f, "{}", lower),
            BinKey::Unknown => write!(f, "{}", UNKNOWN_BIN),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryBins {
    bins: Vec<Bin>,
}

impl CategoryBins {
    pub fn new(mut bins: Vec<Bin>) -> Self {
        bins.sort_by_key(|b| (b.lower, b.upper));
        Self { bins }
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// First pair of bins whose ranges share a code
    pub fn first_overlap(&self) -> Option<(&Bin, &Bin)> {
        self.bins
            .windows(2)
            .find(|pair| pair[1].lower <= pair[0].upper)
            .map(|pair| (&pair[0], &pair[1]))
    }

    /// Negative (non-response) and missing codes land in the unknown bucket.
    pub fn bin_for(&self, code: Option<i64>) -> BinKey {
        match code {
            Some(code) if code >= 0 => self
                .bins
                .iter()
                .find(|b| b.contains(code))
                .map_or(BinKey::Unknown, |b| BinKey::Range(b.lower)),
            _ => BinKey::Unknown,
        }
    }

    pub fn label_for(&self, key: BinKey) -> &str {
        match key {
            BinKey::Range(lower) => self
                .bins
                .iter()
                .find(|b| b.lower == lower)
                .map_or(UNKNOWN_BIN, |b| b.label.as_str()),
            BinKey::Unknown => UNKNOWN_BIN,
        }
    }

    /// Every key, unknown last
    pub fn keys(&self) -> Vec<BinKey> {
        let mut keys: Vec<BinKey> = self.bins.iter().map(|b| BinKey::Range(b.lower)).collect();
        keys.dedup();
        keys.push(BinKey::Unknown);
        keys
    }

    pub fn column_names(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .map(|k| one_hot_column(prefix, &k.to_string()))
            .collect()
    }

    /// One indicator column per key; exactly one of them is set.
    pub fn one_hot(&self, prefix: &str, code: Option<i64>) -> Vec<(String, Cell)> {
        let hit = self.bin_for(code);
        self.keys()
            .into_iter()
            .map(|k| {
                let flag = if k == hit { 1 } else { 0 };
                (one_hot_column(prefix, &k.to_string()), Cell::Int(flag))
            })
            .collect()
    }
}

pub fn one_hot_column(prefix: &str, key: &str) -> String {
    format!("{}_{}", prefix, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade_bins() -> CategoryBins {
        CategoryBins::new(vec![
            Bin::new(13, 99_999, "13th and above"),
            Bin::new(0, 6, "0-6th"),
            Bin::new(7, 12, "7-12th"),
        ])
    }

    #[test]
    fn test_bin_for_uses_lower_bound_key() {
        let bins = grade_bins();
        assert_eq!(bins.bin_for(Some(0)), BinKey::Range(0));
        assert_eq!(bins.bin_for(Some(12)), BinKey::Range(7));
        assert_eq!(bins.bin_for(Some(16)), BinKey::Range(13));
        assert_eq!(bins.bin_for(Some(-3)), BinKey::Unknown);
        assert_eq!(bins.bin_for(None), BinKey::Unknown);
        assert_eq!(bins.label_for(BinKey::Range(7)), "7-12th");
    }

    #[test]
    fn test_one_hot_sets_exactly_one_column() {
        let bins = grade_bins();
        let cells = bins.one_hot("highest_grade_binned", Some(9));
        assert_eq!(cells.len(), 4);
        let set: Vec<&str> = cells
            .iter()
            .filter(|(_, c)| *c == Cell::Int(1))
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(set, vec!["highest_grade_binned_7"]);

        let unknown = bins.one_hot("highest_grade_binned", None);
        assert_eq!(unknown.last(), Some(&("highest_grade_binned_unknown".to_string(), Cell::Int(1))));
    }
}
