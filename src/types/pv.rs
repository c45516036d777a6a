//! Wire-level process variable values

use ndarray::Array2;
use std::collections::BTreeMap;

/// Side-channel attributes attached to an array PV
pub type PvAttributes = BTreeMap<String, f64>;

/// Value carried by a published process variable.
#[derive(Debug, Clone, PartialEq)]
pub enum PvValue {
    Scalar(f64),
    Int(i64),
    IntArray(Vec<i64>),
    /// Flattened 1-D array
    Waveform(Vec<f64>),
    /// N-dimensional array kept in its native shape
    NdArray(Array2<f64>),
}

impl PvValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            PvValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Number of elements carried by the value
    pub fn element_count(&self) -> usize {
        match self {
            PvValue::Scalar(_) | PvValue::Int(_) => 1,
            PvValue::IntArray(v) => v.len(),
            PvValue::Waveform(v) => v.len(),
            PvValue::NdArray(a) => a.len(),
        }
    }
}

/// One value ready for publication, with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEntry {
    pub value: PvValue,
    pub attributes: PvAttributes,
}

impl WireEntry {
    pub fn plain(value: PvValue) -> Self {
        Self {
            value,
            attributes: PvAttributes::new(),
        }
    }

    pub fn with_attributes(value: PvValue, attributes: PvAttributes) -> Self {
        Self { value, attributes }
    }
}

/// Protocol-shaped outputs keyed by logical PV name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireOutput {
    entries: BTreeMap<String, WireEntry>,
}

impl WireOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: WireEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&WireEntry> {
        self.entries.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WireEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for WireOutput {
    type Item = (String, WireEntry);
    type IntoIter = std::collections::btree_map::IntoIter<String, WireEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
