//! Descriptors for the published PV database

use crate::formatter::{ImageKeys, Protocol};
use crate::types::{ModelMetadata, PvValue, WireEntry, WireOutput};
use serde::Serialize;
use std::collections::HashMap;

/// Channel type advertised for a PV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PvType {
    Float,
    Int,
    Waveform,
    NdArray,
}

/// Static description of a PV, fixed at registration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvDescriptor {
    #[serde(rename = "type")]
    pub kind: PvType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl PvDescriptor {
    fn new(kind: PvType) -> Self {
        Self {
            kind,
            precision: None,
            units: None,
            range: None,
            count: None,
        }
    }

    pub fn float(precision: u32) -> Self {
        Self::new(PvType::Float).with_precision(precision)
    }

    pub fn int() -> Self {
        Self::new(PvType::Int)
    }

    pub fn int_array(count: usize) -> Self {
        Self::new(PvType::Int).with_count(count)
    }

    pub fn waveform(precision: u32, count: usize) -> Self {
        Self::new(PvType::Waveform)
            .with_precision(precision)
            .with_count(count)
    }

    pub fn nd_array(precision: u32) -> Self {
        Self::new(PvType::NdArray).with_precision(precision)
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_range(mut self, range: [f64; 2]) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

/// A PV ready for registration: name, descriptor and starting value
#[derive(Debug, Clone, PartialEq)]
pub struct PvRecord {
    pub name: String,
    pub descriptor: PvDescriptor,
    pub initial: WireEntry,
}

impl PvRecord {
    pub fn new(name: impl Into<String>, descriptor: PvDescriptor, initial: WireEntry) -> Self {
        Self {
            name: name.into(),
            descriptor,
            initial,
        }
    }
}

/// Normalise a unit label: keep the last word and drop parentheses.
///
/// `"sigma_xy (mm)"` becomes `"mm"`, `"(T)"` becomes `"T"`.
pub fn fix_units(units: &str) -> String {
    units
        .split_whitespace()
        .last()
        .unwrap_or("")
        .replace(['(', ')'], "")
}

fn unit_for(names: &[String], units: &[String], name: &str) -> Option<String> {
    names
        .iter()
        .position(|n| n == name)
        .and_then(|idx| units.get(idx))
        .map(|u| fix_units(u))
        .filter(|u| !u.is_empty())
}

/// Input PVs in input order, seeded with `values`
pub fn input_pvdb(
    metadata: &ModelMetadata,
    values: &HashMap<String, f64>,
    precision: u32,
) -> Vec<PvRecord> {
    metadata
        .input_ordering
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| {
            let value = values.get(name)?;
            let mut descriptor = PvDescriptor::float(precision);
            if let Some(units) = unit_for(&metadata.input_names, &metadata.input_units, name) {
                descriptor = descriptor.with_units(units);
            }
            if let Some(range) = metadata.input_ranges.get(idx) {
                descriptor = descriptor.with_range(*range);
            }
            Some(PvRecord::new(
                name.clone(),
                descriptor,
                WireEntry::plain(PvValue::Scalar(*value)),
            ))
        })
        .collect()
}

/// Output PVs for every entry of a formatted starting output
pub fn output_pvdb(
    metadata: &ModelMetadata,
    protocol: Protocol,
    starting: &WireOutput,
    precision: u32,
) -> Vec<PvRecord> {
    let image = metadata
        .kind
        .has_image_output()
        .then(|| ImageKeys::for_image(&metadata.image_output_name));

    starting
        .iter()
        .map(|(name, entry)| {
            let is_image = image.as_ref().map_or(false, |keys| match protocol {
                Protocol::Flattened => keys.array_data() == name,
                Protocol::AttributedNd => keys.image == name,
            });

            let descriptor = if is_image {
                let descriptor = match protocol {
                    Protocol::Flattened => {
                        PvDescriptor::waveform(precision, entry.value.element_count())
                    }
                    Protocol::AttributedNd => PvDescriptor::nd_array(precision),
                };
                descriptor.with_units(metadata.image_units.clone())
            } else {
                let descriptor = PvDescriptor::float(precision);
                match unit_for(&metadata.output_names, &metadata.output_units, name) {
                    Some(units) => descriptor.with_units(units),
                    None => descriptor,
                }
            };

            PvRecord::new(name, descriptor, entry.clone())
        })
        .collect()
}

/// Static image descriptor PVs published alongside a flattened image
pub fn image_descriptor_pvs(
    image: &str,
    shape: &[usize],
    color_mode: i64,
    precision: u32,
) -> Vec<PvRecord> {
    let ndim = shape.len();
    let total: usize = shape.iter().product();
    let int = |v: usize| WireEntry::plain(PvValue::Int(v as i64));

    let mut records = vec![
        PvRecord::new(
            format!("{}:NDimensions_RBV", image),
            PvDescriptor::float(precision),
            WireEntry::plain(PvValue::Scalar(ndim as f64)),
        ),
        PvRecord::new(
            format!("{}:Dimensions_RBV", image),
            PvDescriptor::int_array(ndim).with_precision(precision),
            WireEntry::plain(PvValue::IntArray(shape.iter().map(|&d| d as i64).collect())),
        ),
        PvRecord::new(format!("{}:ArraySize_RBV", image), PvDescriptor::int(), int(total)),
        PvRecord::new(
            format!("{}:ColorMode_RBV", image),
            PvDescriptor::int(),
            WireEntry::plain(PvValue::Int(color_mode)),
        ),
    ];

    for (axis, &size) in ["X", "Y", "Z"].iter().zip(shape) {
        records.push(PvRecord::new(
            format!("{}:ArraySize{}_RBV", image, axis),
            PvDescriptor::int(),
            int(size),
        ));
    }

    records
}
