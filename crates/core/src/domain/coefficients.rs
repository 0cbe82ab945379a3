//! Filter coefficient tables keyed by sample rate
//!
//! Two kinds of tables live here:
//! - biquad banks (pre-filter and post-filter) held by [`CoefficientStore`],
//!   replaceable at runtime from externally sourced data
//! - the fixed 7/6-tap tube filter sets, one per supported rate, compiled in
//!
//! Every biquad that reaches a cascade went through [`BiquadCoefficients::new`],
//! so unstable feedback sections never make it onto the audio thread.

use crate::domain::audio::SUPPORTED_SAMPLE_RATES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub type Result<T> = std::result::Result<T, CoefficientError>;

/// Rate used when a requested rate has no table of its own
pub const FALLBACK_SAMPLE_RATE: u32 = 48000;

/// Minimum number of usable raw values for an external load to be considered
pub const MIN_RAW_VALUES: usize = 30;

/// Raw values at or above this magnitude are treated as garbage
const MAX_RAW_MAGNITUDE: f64 = 1e10;

/// Errors raised while loading external coefficient data
#[derive(Debug, Error)]
pub enum CoefficientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Biquad section is unstable (a1={a1}, a2={a2})")]
    Unstable { a1: f64, a2: f64 },

    #[error("Only {found} usable values, need at least {MIN_RAW_VALUES}")]
    TooFewValues { found: usize },

    #[error("No stable biquad section in {raw_values} values")]
    NoStableStages { raw_values: usize },
}

// ============================================================================
// BIQUAD COEFFICIENTS
// ============================================================================

/// One second-order section, `a0` normalized to 1
///
/// Construction validates `|a1| < 2 && |a2| < 1`; there is no way to build
/// an instance outside that range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BiquadCoefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoefficients {
    /// Validate and build a section
    pub fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Result<Self> {
        if !Self::is_stable(a1, a2) {
            return Err(CoefficientError::Unstable { a1, a2 });
        }
        Ok(Self { b0, b1, b2, a1, a2 })
    }

    /// Build from a `(b0, b1, b2, a1, a2)` slice
    fn from_tuple(tuple: &[f64]) -> Result<Self> {
        match *tuple {
            [b0, b1, b2, a1, a2] => Self::new(b0, b1, b2, a1, a2),
            _ => Err(CoefficientError::TooFewValues { found: tuple.len() }),
        }
    }

    /// Built-in sections are known stable; checked by `test_defaults_are_stable`
    const fn builtin(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
        Self { b0, b1, b2, a1, a2 }
    }

    /// Stability triangle bound used for every loaded section
    #[inline]
    pub fn is_stable(a1: f64, a2: f64) -> bool {
        a1.abs() < 2.0 && a2.abs() < 1.0
    }

    pub fn b0(&self) -> f64 {
        self.b0
    }

    pub fn b1(&self) -> f64 {
        self.b1
    }

    pub fn b2(&self) -> f64 {
        self.b2
    }

    pub fn a1(&self) -> f64 {
        self.a1
    }

    pub fn a2(&self) -> f64 {
        self.a2
    }
}

impl<'de> Deserialize<'de> for BiquadCoefficients {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            b0: f64,
            b1: f64,
            b2: f64,
            a1: f64,
            a2: f64,
        }

        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.b0, raw.b1, raw.b2, raw.a1, raw.a2).map_err(serde::de::Error::custom)
    }
}

/// Presence boost followed by low-shelf warmth
const DEFAULT_PRE_FILTER: [BiquadCoefficients; 2] = [
    BiquadCoefficients::builtin(1.0306, -1.9692, 0.9398, -1.9692, 0.9704),
    BiquadCoefficients::builtin(1.0158, -1.9839, 0.9685, -1.9839, 0.9843),
];

/// Cabinet low-pass followed by a resonance peak
const DEFAULT_POST_FILTER: [BiquadCoefficients; 2] = [
    BiquadCoefficients::builtin(0.0675, 0.1349, 0.0675, -1.1430, 0.4128),
    BiquadCoefficients::builtin(0.9826, -1.9321, 0.9507, -1.9321, 0.9333),
];

// ============================================================================
// TUBE FILTER COEFFICIENTS
// ============================================================================

/// Feedforward `b[0..7]` and feedback `a[1..7]` of the tube filter (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TubeCoefficients {
    pub b: [f64; 7],
    pub a: [f64; 6],
}

impl TubeCoefficients {
    /// Pick the set for `sample_rate`: exact match, else nearest by absolute
    /// difference (first entry wins a tie)
    pub fn for_rate(sample_rate: u32) -> &'static TubeCoefficients {
        let mut best = &TUBE_TABLE[0];
        let mut best_diff = sample_rate.abs_diff(best.0);
        for entry in TUBE_TABLE.iter() {
            let diff = sample_rate.abs_diff(entry.0);
            if diff < best_diff {
                best = entry;
                best_diff = diff;
            }
        }
        &best.1
    }

    /// Rate whose set [`Self::for_rate`] would select
    pub fn resolved_rate(sample_rate: u32) -> u32 {
        let chosen = Self::for_rate(sample_rate);
        TUBE_TABLE
            .iter()
            .find(|(_, coeffs)| std::ptr::eq(coeffs, chosen))
            .map(|(rate, _)| *rate)
            .unwrap_or(FALLBACK_SAMPLE_RATE)
    }
}

static TUBE_TABLE: [(u32, TubeCoefficients); 6] = [
    (
        44100,
        TubeCoefficients {
            b: [
                0.848837734156434, -2.879886361821670, 2.725585256735570, 0.930839365623406,
                -3.079589350505240, 1.770725087918830, -0.316511731835608,
            ],
            a: [
                -3.483284779450430, 3.477549116048100, 0.933540396458836, -3.832907894267460,
                2.371422474712170, -0.466319313229480,
            ],
        },
    ),
    (
        48000,
        TubeCoefficients {
            b: [
                0.859613953341805, -2.881262866479970, 2.716760030674950, 0.764865085654241,
                -2.676598511921890, 1.440192350820560, -0.223570041868478,
            ],
            a: [
                -3.441768540626980, 3.415464677676710, 0.767170485973692, -3.376459849090420,
                1.998392624648130, -0.362799398359903,
            ],
        },
    ),
    (
        88200,
        TubeCoefficients {
            b: [
                0.867388389271491, -3.568372014755150, 5.446137758181810, -3.445401648026590,
                0.332293626439954, 0.524596404405209, -0.156642515506745,
            ],
            a: [
                -4.098256690320620, 6.107478187022560, -3.444212228440640, -0.329642119552943,
                1.053291660384730, -0.288658809083111,
            ],
        },
    ),
    (
        96000,
        TubeCoefficients {
            b: [
                0.859562598352408, -3.598222595366990, 5.574911775924850, -3.506393779647540,
                0.158511343920126, 0.736248938801894, -0.224618281979237,
            ],
            a: [
                -4.159415663760060, 6.275407359110680, -3.505236268570930, -0.542563394277778,
                1.296284496118340, -0.364476528614760,
            ],
        },
    ),
    (
        176400,
        TubeCoefficients {
            b: [
                0.898810453231595, -4.361647014994980, 8.575765118892219, -8.662152351049730,
                4.666181822924430, -1.233594712287200, 0.116636683283928,
            ],
            a: [
                -4.766184829159850, 9.081044865157910, -8.661697742636489, 4.160674710632680,
                -0.829511506535580, 0.015674502541581,
            ],
        },
    ),
    (
        192000,
        TubeCoefficients {
            b: [
                0.887929471244264, -4.271530571680550, 8.229258617877781, -7.959864259669550,
                3.900406089953790, -0.808177841238952, 0.021978493513359,
            ],
            a: [
                -4.719585961357560, 8.788926590382619, -7.959401737733720, 3.340506816466110,
                -0.360584973497765, -0.089860734259541,
            ],
        },
    ),
];

// ============================================================================
// COEFFICIENT STORE
// ============================================================================

/// Outcome of a successful external load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Values that survived the finite/magnitude filter
    pub raw_values: usize,
    pub pre_stages: usize,
    pub post_stages: usize,
    /// 5-tuples dropped for failing the stability bound
    pub rejected_stages: usize,
}

/// Pre- and post-filter biquad banks for every supported sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientStore {
    pre_filter: BTreeMap<u32, Vec<BiquadCoefficients>>,
    post_filter: BTreeMap<u32, Vec<BiquadCoefficients>>,
    loaded: bool,
}

impl CoefficientStore {
    /// Store populated with the built-in tables
    pub fn new() -> Self {
        let mut store = Self {
            pre_filter: BTreeMap::new(),
            post_filter: BTreeMap::new(),
            loaded: false,
        };
        for rate in SUPPORTED_SAMPLE_RATES {
            store.pre_filter.insert(rate, DEFAULT_PRE_FILTER.to_vec());
            store.post_filter.insert(rate, DEFAULT_POST_FILTER.to_vec());
        }
        debug!("Loaded default filter coefficients");
        store
    }

    /// Store with no biquad stages at all
    pub fn empty() -> Self {
        Self {
            pre_filter: BTreeMap::new(),
            post_filter: BTreeMap::new(),
            loaded: false,
        }
    }

    /// Whether the current tables came from an external load
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn supported_sample_rates(&self) -> &'static [u32] {
        &SUPPORTED_SAMPLE_RATES
    }

    /// Pre-filter stages for `sample_rate`; empty means "no pre stage"
    pub fn pre_filter(&self, sample_rate: u32) -> &[BiquadCoefficients] {
        Self::lookup(&self.pre_filter, sample_rate)
    }

    /// Post-filter stages for `sample_rate`; empty means "no post stage"
    pub fn post_filter(&self, sample_rate: u32) -> &[BiquadCoefficients] {
        Self::lookup(&self.post_filter, sample_rate)
    }

    fn lookup(table: &BTreeMap<u32, Vec<BiquadCoefficients>>, sample_rate: u32) -> &[BiquadCoefficients] {
        table
            .get(&sample_rate)
            .or_else(|| table.get(&FALLBACK_SAMPLE_RATE))
            .or_else(|| table.values().next())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace the tables from raw little-endian f64 bytes
    ///
    /// Returns `true` only when the defaults were actually replaced. On
    /// `false` the previous tables are untouched.
    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> bool {
        match self.try_load_from_bytes(bytes) {
            Ok(report) => {
                info!(
                    pre = report.pre_stages,
                    post = report.post_stages,
                    rejected = report.rejected_stages,
                    "Loaded filter coefficients"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "Coefficient load failed, keeping current tables");
                false
            }
        }
    }

    /// Same as [`Self::load_from_bytes`] but reports why a load was refused
    ///
    /// The usable values are split at their midpoint: the first half feeds
    /// the pre-filter bank and the second half the post-filter bank. Each
    /// half is read as consecutive 5-value sections and unstable sections
    /// are skipped within that half. A bank whose half yields no stable
    /// section keeps its current stages.
    pub fn try_load_from_bytes(&mut self, bytes: &[u8]) -> Result<LoadReport> {
        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .filter_map(|chunk| <[u8; 8]>::try_from(chunk).ok())
            .map(f64::from_le_bytes)
            .filter(|v| v.is_finite() && v.abs() < MAX_RAW_MAGNITUDE)
            .collect();

        debug!(bytes = bytes.len(), values = values.len(), "Extracted raw coefficients");

        if values.len() < MIN_RAW_VALUES {
            return Err(CoefficientError::TooFewValues { found: values.len() });
        }

        let (pre_half, post_half) = values.split_at(values.len() / 2);
        let (pre, pre_rejected) = Self::stable_stages(pre_half);
        let (post, post_rejected) = Self::stable_stages(post_half);

        if pre.is_empty() && post.is_empty() {
            return Err(CoefficientError::NoStableStages { raw_values: values.len() });
        }

        for rate in SUPPORTED_SAMPLE_RATES {
            if !pre.is_empty() {
                self.pre_filter.insert(rate, pre.clone());
            }
            if !post.is_empty() {
                self.post_filter.insert(rate, post.clone());
            }
        }
        self.loaded = true;

        Ok(LoadReport {
            raw_values: values.len(),
            pre_stages: pre.len(),
            post_stages: post.len(),
            rejected_stages: pre_rejected + post_rejected,
        })
    }

    /// Group into 5-tuples and keep the stable ones
    fn stable_stages(values: &[f64]) -> (Vec<BiquadCoefficients>, usize) {
        let mut rejected = 0;
        let stages = values
            .chunks_exact(5)
            .filter_map(|tuple| match BiquadCoefficients::from_tuple(tuple) {
                Ok(stage) => Some(stage),
                Err(_) => {
                    rejected += 1;
                    None
                }
            })
            .collect();
        (stages, rejected)
    }

    /// Read a raw coefficient file and load it
    ///
    /// Decoding of any textual container format is the caller's job; this
    /// expects the bare little-endian f64 payload.
    #[instrument(skip(self, path))]
    pub async fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<LoadReport> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading coefficient file");

        let bytes = tokio::fs::read(path).await?;
        self.try_load_from_bytes(&bytes)
    }
}

impl Default for CoefficientStore {
    fn default() -> Self {
        Self::new()
    }
}
