//! Writing transformed visibilities. [`OutputMs`] abstracts the output
//! table; the transformation hands it one [`OutputBlock`] per transformed
//! buffer and output spectral window.

mod ms;
#[cfg(test)]
mod tests;

pub use ms::MsWriter;

use indexmap::IndexMap;
use marlu::c32;
use ndarray::prelude::*;

use crate::{index_map::IdMap, read::MsError, MsColumn, MsMetadata, RowMeta};

/// The optional main-table columns of the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    /// The output data columns, complex or FLOAT_DATA.
    pub data_columns: Vec<MsColumn>,
    pub weight_spectrum: bool,
    pub sigma_spectrum: bool,
}

/// The contents of the output subtables.
///
/// SPECTRAL_WINDOW, DATA_DESCRIPTION and POLARIZATION rows are rebuilt from
/// `metadata`, starting from a copy of the input row named by the matching
/// `*_sources` entry. FIELD, ANTENNA, STATE and OBSERVATION rows are plain
/// copies of their sources. Every other subtable is copied, with the id
/// columns named in `remaps` rewritten (and rows referencing unmapped ids
/// dropped).
#[derive(Debug, Clone, Default)]
pub struct OutputSubtables {
    pub metadata: MsMetadata,
    pub spw_sources: Vec<usize>,
    pub ddi_sources: Vec<usize>,
    pub polarization_sources: Vec<usize>,
    pub field_sources: Vec<usize>,
    pub antenna_sources: Vec<usize>,
    pub state_sources: Vec<usize>,
    pub observation_sources: Vec<usize>,
    pub remaps: Vec<(&'static str, IdMap)>,
}

/// Transformed rows of one output data description. Cubes are
/// `[row][chan][corr]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBlock {
    /// Already reindexed.
    pub meta: Vec<RowMeta>,
    pub ddi: usize,
    /// Keyed by output column.
    pub data: IndexMap<MsColumn, Array3<c32>>,
    pub float_data: Option<Array3<f32>>,
    pub flag: Array3<bool>,
    pub flag_row: Vec<bool>,
    pub weight: Array2<f32>,
    pub sigma: Array2<f32>,
    pub weight_spectrum: Option<Array3<f32>>,
    pub sigma_spectrum: Option<Array3<f32>>,
}

impl OutputBlock {
    pub fn num_rows(&self) -> usize {
        self.meta.len()
    }

    /// (rows, channels, correlations)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.flag.dim()
    }
}

/// A measurement set that transformed rows are written to. Blocks are
/// appended in the order they are given.
pub trait OutputMs: Send {
    fn name(&self) -> String;

    /// Make the (empty) output and its subtables.
    fn create(&mut self, schema: &OutputSchema, subtables: &OutputSubtables)
        -> Result<(), MsError>;

    fn write_block(&mut self, block: &OutputBlock) -> Result<(), MsError>;

    fn finalise(&mut self) -> Result<(), MsError>;

    /// The number of main-table rows written so far.
    fn num_rows(&self) -> usize;
}
