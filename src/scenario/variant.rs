//! Scenario variants and the parameter matrix
//!
//! A [`Variant`] is one fully-resolved parameter set (band, subcarrier
//! spacing, bandwidth and the values derived from them). The [`Matrix`]
//! enumerates variants from an explicit list and/or a cross product.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Sample rates (Hz) radios are usually clocked at, ascending
const SAMPLE_RATES_HZ: [u64; 12] = [
    7_680_000,
    11_520_000,
    15_360_000,
    23_040_000,
    30_720_000,
    46_080_000,
    61_440_000,
    92_160_000,
    122_880_000,
    184_320_000,
    245_760_000,
    491_520_000,
];

/// Channel bandwidths (MHz) accepted by the matrix
const BANDWIDTHS_MHZ: [u16; 15] = [5, 10, 15, 20, 25, 30, 40, 50, 60, 70, 80, 90, 100, 200, 400];

/// Smallest sample rate leaving at least 10% margin over the channel bandwidth
pub fn minimum_sample_rate(bandwidth_mhz: u16) -> Result<u64> {
    let needed_hz = u64::from(bandwidth_mhz) * 1_100_000;
    SAMPLE_RATES_HZ
        .iter()
        .copied()
        .find(|rate| *rate >= needed_hz)
        .ok_or_else(|| {
            Error::Config(format!(
                "No supported sample rate for a {} MHz channel",
                bandwidth_mhz
            ))
        })
}

/// Widest channel (MHz) a subcarrier spacing (kHz) can carry
fn max_bandwidth_for_scs(scs_khz: u16) -> Option<u16> {
    match scs_khz {
        15 => Some(50),
        30 => Some(100),
        60 => Some(200),
        120 => Some(400),
        _ => None,
    }
}

/// Time-alignment calibration applied by the gNB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAlignmentCalibration {
    /// Let the radio estimate it
    #[default]
    Auto,
    /// Fixed offset in samples
    Fixed(i64),
}

impl fmt::Display for TimeAlignmentCalibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Fixed(samples) => write!(f, "{}", samples),
        }
    }
}

/// One resolved scenario variant
///
/// Built once by [`Matrix::expand`] and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub band: u16,
    /// Common subcarrier spacing in kHz
    pub common_scs: u16,
    /// Channel bandwidth in MHz
    pub bandwidth: u16,
    /// Baseband sample rate in Hz
    pub sample_rate: u64,
    /// Global timing advance in samples, negative for "use default"
    pub global_timing_advance: i32,
    pub time_alignment_calibration: TimeAlignmentCalibration,
    /// CU-CP inactivity timer in seconds; UEs silent this long go idle
    pub inactivity_timer: u32,
}

impl Variant {
    /// Resolve a variant, checking the radio parameters and deriving the sample rate
    pub fn resolve(params: &RadioParams, defaults: &VariantDefaults) -> Result<Self> {
        if params.band == 0 {
            return Err(Error::Config("Band must be a positive NR band number".to_string()));
        }

        let max_bw = max_bandwidth_for_scs(params.common_scs).ok_or_else(|| {
            Error::Config(format!(
                "Unsupported subcarrier spacing {} kHz (expected 15, 30, 60 or 120)",
                params.common_scs
            ))
        })?;

        if !BANDWIDTHS_MHZ.contains(&params.bandwidth) {
            return Err(Error::Config(format!(
                "Unsupported bandwidth {} MHz",
                params.bandwidth
            )));
        }

        if params.bandwidth > max_bw {
            return Err(Error::Config(format!(
                "{} MHz exceeds the {} MHz limit of {} kHz subcarrier spacing",
                params.bandwidth, max_bw, params.common_scs
            )));
        }

        let sample_rate = match params.sample_rate {
            Some(rate) => rate,
            None => minimum_sample_rate(params.bandwidth)?,
        };

        Ok(Self {
            band: params.band,
            common_scs: params.common_scs,
            bandwidth: params.bandwidth,
            sample_rate,
            global_timing_advance: defaults.global_timing_advance,
            time_alignment_calibration: defaults.time_alignment_calibration,
            inactivity_timer: defaults.inactivity_timer,
        })
    }

    /// Stable identifier, e.g. `band:3-scs:15-bandwidth:10`
    pub fn id(&self) -> String {
        format!(
            "band:{}-scs:{}-bandwidth:{}",
            self.band, self.common_scs, self.bandwidth
        )
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (sample rate {:.2} MHz, TA {}, calibration {}, inactivity {}s)",
            self.id(),
            self.sample_rate as f64 / 1e6,
            self.global_timing_advance,
            self.time_alignment_calibration,
            self.inactivity_timer
        )
    }
}

/// Radio parameters of one matrix entry
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RadioParams {
    pub band: u16,
    pub common_scs: u16,
    pub bandwidth: u16,
    /// Overrides the derived minimum sample rate
    #[serde(default)]
    pub sample_rate: Option<u64>,
}

/// Values shared by every variant of a scenario
#[derive(Debug, Clone, Deserialize)]
pub struct VariantDefaults {
    #[serde(default = "default_timing_advance")]
    pub global_timing_advance: i32,
    #[serde(default)]
    pub time_alignment_calibration: TimeAlignmentCalibration,
    #[serde(default = "default_inactivity_timer")]
    pub inactivity_timer: u32,
}

impl Default for VariantDefaults {
    fn default() -> Self {
        Self {
            global_timing_advance: default_timing_advance(),
            time_alignment_calibration: TimeAlignmentCalibration::Auto,
            inactivity_timer: default_inactivity_timer(),
        }
    }
}

fn default_timing_advance() -> i32 {
    -1
}

fn default_inactivity_timer() -> u32 {
    1
}

/// Cross product of radio parameters
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub bands: Vec<u16>,
    pub common_scs: Vec<u16>,
    pub bandwidths: Vec<u16>,
}

/// Variant enumeration for a scenario
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Matrix {
    /// Explicit variants, run in the listed order
    #[serde(default)]
    pub variants: Vec<RadioParams>,
    /// Cross product appended after the explicit variants
    #[serde(default)]
    pub product: Option<Product>,
}

impl Matrix {
    /// Resolve every variant; duplicates (by id) are kept once
    pub fn expand(&self, defaults: &VariantDefaults) -> Result<Vec<Variant>> {
        let mut entries = self.variants.clone();

        if let Some(product) = &self.product {
            for &band in &product.bands {
                for &common_scs in &product.common_scs {
                    for &bandwidth in &product.bandwidths {
                        entries.push(RadioParams {
                            band,
                            common_scs,
                            bandwidth,
                            sample_rate: None,
                        });
                    }
                }
            }
        }

        let mut seen = BTreeSet::new();
        let mut variants = Vec::with_capacity(entries.len());
        for params in &entries {
            let variant = Variant::resolve(params, defaults)?;
            if seen.insert(variant.id()) {
                variants.push(variant);
            }
        }

        if variants.is_empty() {
            return Err(Error::Config("Parameter matrix is empty".to_string()));
        }

        Ok(variants)
    }
}
