//! Streaming transformation of measurement sets: channel averaging, Hanning
//! smoothing, frequency regridding, spectral-window combination and
//! separation, time averaging and subtable reindexing.

pub mod averaging;
pub mod channels;
pub mod config;
pub mod index_map;
pub mod kernels;
pub mod read;
pub mod regrid;
pub mod selection;
pub mod transform;
pub mod weights;
pub mod write;

pub use marlu::c32;

pub use config::TransformConfig;
pub use transform::{MsTransformManager, Stage, TransformError};

use marlu::RADec;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use regrid::FreqFrame;

/// The optional main-table columns that carry per-channel, per-correlation
/// values.
#[derive(
    Debug,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
pub enum MsColumn {
    #[strum(serialize = "DATA")]
    Data,

    #[strum(serialize = "CORRECTED_DATA")]
    CorrectedData,

    #[strum(serialize = "MODEL_DATA")]
    ModelData,

    #[strum(serialize = "FLOAT_DATA")]
    FloatData,

    #[strum(serialize = "WEIGHT_SPECTRUM")]
    WeightSpectrum,

    #[strum(serialize = "SIGMA_SPECTRUM")]
    SigmaSpectrum,
}

impl MsColumn {
    /// Is this one of the visibility data columns (as opposed to a weight or
    /// sigma spectrum)?
    pub fn is_data(self) -> bool {
        !matches!(self, MsColumn::WeightSpectrum | MsColumn::SigmaSpectrum)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A row of the SPECTRAL_WINDOW table.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralWindow {
    pub name: String,

    /// Channel centre frequencies \[Hz\].
    pub freqs: Vec<f64>,

    /// Channel widths \[Hz\]. Negative widths are legal in a measurement set
    /// and indicate a descending frequency axis.
    pub widths: Vec<f64>,

    /// Effective noise bandwidths \[Hz\].
    pub effective_bw: Vec<f64>,

    /// Spectral resolutions \[Hz\].
    pub resolution: Vec<f64>,

    pub ref_freq: f64,

    pub total_bandwidth: f64,

    pub frame: FreqFrame,
}

impl SpectralWindow {
    /// A window whose effective bandwidths and resolutions are equal to the
    /// channel widths.
    pub fn new(name: &str, freqs: Vec<f64>, widths: Vec<f64>, frame: FreqFrame) -> SpectralWindow {
        let abs_widths: Vec<f64> = widths.iter().map(|w| w.abs()).collect();
        let total_bandwidth = abs_widths.iter().sum();
        SpectralWindow {
            name: name.to_string(),
            ref_freq: freqs.first().copied().unwrap_or(0.0),
            effective_bw: abs_widths.clone(),
            resolution: abs_widths,
            freqs,
            widths,
            total_bandwidth,
            frame,
        }
    }

    pub fn num_chans(&self) -> usize {
        self.freqs.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescription {
    pub spw: usize,
    pub polarization: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polarization {
    /// Stokes codes of each correlation (e.g. 9 for XX).
    pub corr_types: Vec<i32>,

    /// The receptor pair of each correlation.
    pub corr_products: Vec<[i32; 2]>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,

    pub phase_centre: RADec,
}

/// Metadata of a measurement set, gathered from its subtables.
#[derive(Debug, Clone, Default)]
pub struct MsMetadata {
    pub spectral_windows: Vec<SpectralWindow>,

    pub data_descriptions: Vec<DataDescription>,

    pub polarizations: Vec<Polarization>,

    pub fields: Vec<Field>,

    /// The names of each of the antennas in the ANTENNA table.
    pub antenna_names: Vec<String>,

    /// The OBS_MODE of each row of the STATE table.
    pub state_intents: Vec<String>,

    /// The number of rows in the OBSERVATION table.
    pub num_observations: usize,
}

impl MsMetadata {
    pub fn spw_of_ddi(&self, ddi: usize) -> Option<usize> {
        self.data_descriptions.get(ddi).map(|dd| dd.spw)
    }
}

/// The id and time columns of one main-table row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RowMeta {
    /// MJD seconds (UTC), the centroid of the integration.
    pub time: f64,
    pub interval: f64,
    pub exposure: f64,
    pub time_centroid: f64,
    pub antenna1: usize,
    pub antenna2: usize,
    pub feed1: i32,
    pub feed2: i32,
    pub field: usize,
    pub ddi: usize,
    pub scan: i32,
    /// -1 if there is no associated STATE row.
    pub state: i32,
    pub observation: usize,
    pub array: usize,
    pub processor: i32,
    /// \[metres\]
    pub uvw: [f64; 3],
}

impl RowMeta {
    pub fn uv_distance(&self) -> f64 {
        self.uvw[0].hypot(self.uvw[1])
    }
}
