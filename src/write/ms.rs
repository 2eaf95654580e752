//! Writing measurement sets with casacore. The output starts as a row-less
//! copy of the input's structure; channel-dependent columns are made
//! variable-shaped and the subtables are filled from [`OutputSubtables`].

use std::path::{Path, PathBuf};

use log::{debug, trace};
use marlu::rubbl_casatables;
use ndarray::prelude::*;
use rubbl_casatables::{GlueDataType, Table, TableError, TableOpenMode};

use super::{OutputBlock, OutputMs, OutputSchema, OutputSubtables};
use crate::{index_map::IdMap, read::MsError, MsColumn};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main-table columns whose cells have a channel axis.
const CHANNEL_COLUMNS: [(&str, GlueDataType); 7] = [
    ("DATA", GlueDataType::TpComplex),
    ("CORRECTED_DATA", GlueDataType::TpComplex),
    ("MODEL_DATA", GlueDataType::TpComplex),
    ("FLOAT_DATA", GlueDataType::TpFloat),
    ("WEIGHT_SPECTRUM", GlueDataType::TpFloat),
    ("SIGMA_SPECTRUM", GlueDataType::TpFloat),
    ("FLAG", GlueDataType::TpBool),
];

fn open(path: &Path, mode: TableOpenMode) -> Result<Table, MsError> {
    Ok(Table::open(path, mode)?)
}

pub struct MsWriter {
    /// The path to the output measurement set.
    path: PathBuf,

    /// The measurement set whose structure and subtables are copied.
    input: PathBuf,

    num_rows: usize,
}

impl MsWriter {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(path: P, input: Q) -> MsWriter {
        MsWriter {
            path: path.as_ref().to_path_buf(),
            input: input.as_ref().to_path_buf(),
            num_rows: 0,
        }
    }

    /// Make the channel-dependent columns match `schema`: unwanted ones are
    /// removed, fixed-shape ones are replaced by variable-shaped ones and
    /// missing ones are added.
    fn fix_main_columns(&self, schema: &OutputSchema) -> Result<(), MsError> {
        let comment = format!("added by {PKG_NAME} {PKG_VERSION}");
        let mut wanted: Vec<&str> = schema.data_columns.iter().map(|c| c.name()).collect();
        wanted.push("FLAG");
        if schema.weight_spectrum {
            wanted.push(MsColumn::WeightSpectrum.name());
        }
        if schema.sigma_spectrum {
            wanted.push(MsColumn::SigmaSpectrum.name());
        }

        let mut main_table = open(&self.path, TableOpenMode::ReadWrite)?;
        let present = main_table.column_names()?;
        for (col, data_type) in CHANNEL_COLUMNS {
            let is_wanted = wanted.contains(&col);
            let mut is_present = present.iter().any(|p| p == col);
            if is_present && (!is_wanted || main_table.get_col_desc(col)?.is_fixed_shape()) {
                trace!("Removing column {col}");
                main_table.remove_column(col)?;
                is_present = false;
            }
            if is_wanted && !is_present {
                trace!("Adding column {col}");
                main_table.add_array_column(
                    data_type,
                    col,
                    Some(comment.as_str()),
                    None,
                    false,
                    false,
                )?;
            }
        }
        Ok(())
    }

    fn write_subtables(&self, subtables: &OutputSubtables) -> Result<(), MsError> {
        let mut in_main_table = open(&self.input, TableOpenMode::Read)?;
        for name in in_main_table.table_keyword_names()? {
            let in_path = self.input.join(&name);
            let out_path = self.path.join(&name);
            if !(in_path.is_dir() && out_path.is_dir()) {
                continue;
            }
            debug!("Writing subtable {name}");
            let mut input = open(&in_path, TableOpenMode::Read)?;
            let mut output = open(&out_path, TableOpenMode::ReadWrite)?;
            match name.as_str() {
                "SPECTRAL_WINDOW" => write_spectral_windows(&mut input, &mut output, subtables)?,
                "DATA_DESCRIPTION" => {
                    copy_rows(&mut input, &mut output, &subtables.ddi_sources)?;
                    for (i, dd) in subtables.metadata.data_descriptions.iter().enumerate() {
                        let row = i as u64;
                        output.put_cell("SPECTRAL_WINDOW_ID", row, &(dd.spw as i32))?;
                        output.put_cell("POLARIZATION_ID", row, &(dd.polarization as i32))?;
                    }
                }
                "POLARIZATION" => {
                    copy_rows(&mut input, &mut output, &subtables.polarization_sources)?;
                    for (i, pol) in subtables.metadata.polarizations.iter().enumerate() {
                        let row = i as u64;
                        let products = Array2::from_shape_fn(
                            (pol.corr_products.len(), 2),
                            |(c, r)| pol.corr_products[c][r],
                        );
                        output.put_cell("NUM_CORR", row, &(pol.corr_types.len() as i32))?;
                        output.put_cell("CORR_TYPE", row, &pol.corr_types)?;
                        output.put_cell("CORR_PRODUCT", row, &products)?;
                    }
                }
                "FIELD" => copy_rows(&mut input, &mut output, &subtables.field_sources)?,
                "ANTENNA" => copy_rows(&mut input, &mut output, &subtables.antenna_sources)?,
                "STATE" => copy_rows(&mut input, &mut output, &subtables.state_sources)?,
                "OBSERVATION" => {
                    copy_rows(&mut input, &mut output, &subtables.observation_sources)?
                }
                _ => copy_remapped(&mut input, &mut output, &subtables.remaps)?,
            }
        }
        Ok(())
    }
}

/// Append a copy of each of the `sources` rows of `input` to `output`.
fn copy_rows(input: &mut Table, output: &mut Table, sources: &[usize]) -> Result<(), MsError> {
    let start = output.n_rows();
    output.add_rows(sources.len())?;
    let mut out_row = output.get_row_writer()?;
    for (i, &source) in sources.iter().enumerate() {
        let source = source as u64;
        input.for_each_row_in_range(source..source + 1, |row| {
            row.copy_and_put(&mut out_row, start + i as u64)
                .map_err(TableError::Casacore)
        })?;
    }
    Ok(())
}

fn write_spectral_windows(
    input: &mut Table,
    output: &mut Table,
    subtables: &OutputSubtables,
) -> Result<(), MsError> {
    copy_rows(input, output, &subtables.spw_sources)?;
    for (i, spw) in subtables.metadata.spectral_windows.iter().enumerate() {
        let row = i as u64;
        output.put_cell("NAME", row, &spw.name)?;
        output.put_cell("NUM_CHAN", row, &(spw.num_chans() as i32))?;
        output.put_cell("CHAN_FREQ", row, &spw.freqs)?;
        output.put_cell("CHAN_WIDTH", row, &spw.widths)?;
        output.put_cell("EFFECTIVE_BW", row, &spw.effective_bw)?;
        output.put_cell("RESOLUTION", row, &spw.resolution)?;
        output.put_cell("REF_FREQUENCY", row, &spw.ref_freq)?;
        output.put_cell("TOTAL_BANDWIDTH", row, &spw.total_bandwidth)?;
        output.put_cell("MEAS_FREQ_REF", row, &spw.frame.code())?;
    }
    Ok(())
}

/// Copy every row of `input` whose id columns are mapped (or negative),
/// rewriting those ids.
fn copy_remapped(
    input: &mut Table,
    output: &mut Table,
    remaps: &[(&'static str, IdMap)],
) -> Result<(), MsError> {
    let columns = input.column_names()?;
    let remaps: Vec<&(&str, IdMap)> = remaps
        .iter()
        .filter(|(col, _)| columns.iter().any(|c| c == col))
        .collect();
    if remaps.is_empty() {
        input.copy_rows_to(output)?;
        return Ok(());
    }

    let ids = remaps
        .iter()
        .map(|(col, _)| input.get_col_as_vec::<i32>(col))
        .collect::<Result<Vec<_>, _>>()?;
    let mut sources = vec![];
    let mut new_ids = vec![];
    for row in 0..input.n_rows() as usize {
        let new: Option<Vec<i32>> = remaps
            .iter()
            .zip(&ids)
            .map(|((_, map), col)| map.get_i32(col[row]))
            .collect();
        if let Some(new) = new {
            sources.push(row);
            new_ids.push(new);
        }
    }

    let start = output.n_rows();
    copy_rows(input, output, &sources)?;
    for (i, new) in new_ids.into_iter().enumerate() {
        for ((col, _), id) in remaps.iter().zip(new) {
            output.put_cell(col, start + i as u64, &id)?;
        }
    }
    Ok(())
}

impl OutputMs for MsWriter {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn create(
        &mut self,
        schema: &OutputSchema,
        subtables: &OutputSubtables,
    ) -> Result<(), MsError> {
        if self.path.exists() {
            return Err(MsError::OutputExists(self.path.clone()));
        }
        debug!(
            "Creating {} from the structure of {}",
            self.path.display(),
            self.input.display()
        );
        let mut in_main_table = open(&self.input, TableOpenMode::Read)?;
        in_main_table.deep_copy_no_rows(&self.path.display().to_string())?;
        drop(in_main_table);

        self.fix_main_columns(schema)?;
        self.write_subtables(subtables)?;
        self.num_rows = 0;
        Ok(())
    }

    fn write_block(&mut self, block: &OutputBlock) -> Result<(), MsError> {
        let mut main_table = open(&self.path, TableOpenMode::ReadWrite)?;
        let start = main_table.n_rows();
        main_table.add_rows(block.num_rows())?;
        for (i, m) in block.meta.iter().enumerate() {
            let row = start + i as u64;
            main_table.put_cell("TIME", row, &m.time)?;
            main_table.put_cell("INTERVAL", row, &m.interval)?;
            main_table.put_cell("EXPOSURE", row, &m.exposure)?;
            main_table.put_cell("TIME_CENTROID", row, &m.time_centroid)?;
            main_table.put_cell("ANTENNA1", row, &(m.antenna1 as i32))?;
            main_table.put_cell("ANTENNA2", row, &(m.antenna2 as i32))?;
            main_table.put_cell("FEED1", row, &m.feed1)?;
            main_table.put_cell("FEED2", row, &m.feed2)?;
            main_table.put_cell("FIELD_ID", row, &(m.field as i32))?;
            main_table.put_cell("DATA_DESC_ID", row, &(block.ddi as i32))?;
            main_table.put_cell("SCAN_NUMBER", row, &m.scan)?;
            main_table.put_cell("STATE_ID", row, &m.state)?;
            main_table.put_cell("OBSERVATION_ID", row, &(m.observation as i32))?;
            main_table.put_cell("ARRAY_ID", row, &(m.array as i32))?;
            main_table.put_cell("PROCESSOR_ID", row, &m.processor)?;
            main_table.put_cell("UVW", row, &m.uvw.to_vec())?;

            for (col, cube) in &block.data {
                main_table.put_cell(col.name(), row, &cube.slice(s![i, .., ..]).to_owned())?;
            }
            if let Some(cube) = &block.float_data {
                main_table.put_cell("FLOAT_DATA", row, &cube.slice(s![i, .., ..]).to_owned())?;
            }
            if let Some(cube) = &block.weight_spectrum {
                main_table.put_cell(
                    "WEIGHT_SPECTRUM",
                    row,
                    &cube.slice(s![i, .., ..]).to_owned(),
                )?;
            }
            if let Some(cube) = &block.sigma_spectrum {
                main_table.put_cell(
                    "SIGMA_SPECTRUM",
                    row,
                    &cube.slice(s![i, .., ..]).to_owned(),
                )?;
            }
            main_table.put_cell("FLAG", row, &block.flag.slice(s![i, .., ..]).to_owned())?;
            main_table.put_cell("FLAG_ROW", row, &block.flag_row[i])?;
            main_table.put_cell("WEIGHT", row, &block.weight.row(i).to_vec())?;
            main_table.put_cell("SIGMA", row, &block.sigma.row(i).to_vec())?;
        }
        self.num_rows += block.num_rows();
        trace!("Wrote {} rows to {}", block.num_rows(), self.path.display());
        Ok(())
    }

    fn finalise(&mut self) -> Result<(), MsError> {
        debug!("Wrote {} rows to {}", self.num_rows, self.path.display());
        Ok(())
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }
}
