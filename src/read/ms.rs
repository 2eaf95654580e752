//! Reading measurement sets with casacore.

use std::{
    collections::BTreeSet,
    ops::Range,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, trace};
use marlu::{c32, rubbl_casatables, RADec};
use ndarray::prelude::*;
use rubbl_casatables::{Table, TableOpenMode};

use super::{put_cell_slice, InputMs, MsError, ReadRequest, ReadShape, VisBuffer};
use crate::{
    regrid::FreqFrame, DataDescription, Field, MsColumn, MsMetadata, Polarization, RowMeta,
    SpectralWindow,
};

/// Open a measurement set table. If `table` is `None`, then open the base
/// table.
pub(crate) fn read_table(
    ms: &Path,
    table: Option<&str>,
    mode: TableOpenMode,
) -> Result<Table, MsError> {
    let path = match table {
        Some(t) => ms.join(t),
        None => ms.to_path_buf(),
    };
    Ok(Table::open(path, mode)?)
}

/// A negative id is only legal where the caller says so.
fn to_index(column: &'static str, value: i32, row: usize) -> Result<usize, MsError> {
    usize::try_from(value).map_err(|_| MsError::NegativeId { column, value, row })
}

pub struct MsReader {
    /// The path to the measurement set on disk.
    ms: PathBuf,

    metadata: MsMetadata,

    /// The optional main-table columns that are present.
    columns: BTreeSet<MsColumn>,

    num_rows: usize,

    /// The id columns, read on first use.
    meta: Option<Vec<RowMeta>>,
}

impl MsReader {
    /// Verify and populate metadata associated with this measurement set.
    pub fn new<P: AsRef<Path>>(ms: P) -> Result<MsReader, MsError> {
        let ms = ms.as_ref();
        debug!("Using measurement set: {}", ms.display());
        if !ms.exists() {
            return Err(MsError::BadFile(ms.to_path_buf()));
        }

        let mut main_table = read_table(ms, None, TableOpenMode::Read)?;
        let num_rows = main_table.n_rows() as usize;
        if num_rows == 0 {
            return Err(MsError::MainTableEmpty);
        }
        let columns: BTreeSet<MsColumn> = main_table
            .column_names()?
            .iter()
            .filter_map(|c| MsColumn::from_str(c).ok())
            .collect();
        debug!(
            "{} rows; optional columns: {}",
            num_rows,
            columns.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
        );

        let metadata = read_metadata(ms)?;
        trace!(
            "{} spectral windows, {} data descriptions, {} fields, {} antennas",
            metadata.spectral_windows.len(),
            metadata.data_descriptions.len(),
            metadata.fields.len(),
            metadata.antenna_names.len()
        );

        Ok(MsReader {
            ms: ms.to_path_buf(),
            metadata,
            columns,
            num_rows,
            meta: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.ms
    }

    fn missing(&self, column: MsColumn) -> MsError {
        MsError::MissingColumn {
            table: self.ms.display().to_string(),
            column,
        }
    }
}

fn read_metadata(ms: &Path) -> Result<MsMetadata, MsError> {
    let mut spectral_windows = vec![];
    let mut spw_table = read_table(ms, Some("SPECTRAL_WINDOW"), TableOpenMode::Read)?;
    spw_table.for_each_row(|row| {
        let name: String = row.get_cell("NAME")?;
        let freqs: Vec<f64> = row.get_cell("CHAN_FREQ")?;
        let widths: Vec<f64> = row.get_cell("CHAN_WIDTH")?;
        let frame_code: i32 = row.get_cell("MEAS_FREQ_REF")?;
        let mut spw = SpectralWindow::new(
            &name,
            freqs,
            widths,
            FreqFrame::from_code(frame_code).unwrap_or_default(),
        );
        spw.effective_bw = row.get_cell("EFFECTIVE_BW")?;
        spw.resolution = row.get_cell("RESOLUTION")?;
        spw.ref_freq = row.get_cell("REF_FREQUENCY")?;
        spw.total_bandwidth = row.get_cell("TOTAL_BANDWIDTH")?;
        spectral_windows.push(spw);
        Ok(())
    })?;

    let mut dd_table = read_table(ms, Some("DATA_DESCRIPTION"), TableOpenMode::Read)?;
    let spw_ids: Vec<i32> = dd_table.get_col_as_vec("SPECTRAL_WINDOW_ID")?;
    let pol_ids: Vec<i32> = dd_table.get_col_as_vec("POLARIZATION_ID")?;
    let data_descriptions = spw_ids
        .into_iter()
        .zip(pol_ids)
        .enumerate()
        .map(|(row, (spw, pol))| {
            Ok(DataDescription {
                spw: to_index("SPECTRAL_WINDOW_ID", spw, row)?,
                polarization: to_index("POLARIZATION_ID", pol, row)?,
            })
        })
        .collect::<Result<Vec<_>, MsError>>()?;

    let mut polarizations = vec![];
    let mut pol_table = read_table(ms, Some("POLARIZATION"), TableOpenMode::Read)?;
    pol_table.for_each_row(|row| {
        let corr_types: Vec<i32> = row.get_cell("CORR_TYPE")?;
        // [corr][receptor]
        let products: Array2<i32> = row.get_cell("CORR_PRODUCT")?;
        let corr_products = products
            .outer_iter()
            .map(|p| [p[0], p.get(1).copied().unwrap_or(p[0])])
            .collect();
        polarizations.push(Polarization {
            corr_types,
            corr_products,
        });
        Ok(())
    })?;

    let mut field_table = read_table(ms, Some("FIELD"), TableOpenMode::Read)?;
    let field_names: Vec<String> = field_table.get_col_as_vec("NAME")?;
    let mut fields = Vec::with_capacity(field_names.len());
    for (row, name) in field_names.into_iter().enumerate() {
        // [poly][ra, dec]; only the zeroth-order term is used.
        let phase_dir: Vec<f64> = field_table.get_cell_as_vec("PHASE_DIR", row as u64)?;
        if phase_dir.len() < 2 {
            return Err(MsError::BadArrayShape {
                table: format!("{}/FIELD", ms.display()),
                row,
                array: "PHASE_DIR",
                expected: vec![1, 2],
                got: vec![phase_dir.len()],
            });
        }
        fields.push(Field {
            name,
            phase_centre: RADec::from_radians(phase_dir[0], phase_dir[1]),
        });
    }

    let mut antenna_table = read_table(ms, Some("ANTENNA"), TableOpenMode::Read)?;
    let antenna_names: Vec<String> = antenna_table.get_col_as_vec("NAME")?;

    let state_intents = if ms.join("STATE").exists() {
        let mut state_table = read_table(ms, Some("STATE"), TableOpenMode::Read)?;
        if state_table.n_rows() > 0 {
            state_table.get_col_as_vec("OBS_MODE")?
        } else {
            vec![]
        }
    } else {
        vec![]
    };

    let num_observations =
        read_table(ms, Some("OBSERVATION"), TableOpenMode::Read)?.n_rows() as usize;

    Ok(MsMetadata {
        spectral_windows,
        data_descriptions,
        polarizations,
        fields,
        antenna_names,
        state_intents,
        num_observations,
    })
}

impl InputMs for MsReader {
    fn name(&self) -> String {
        self.ms.display().to_string()
    }

    fn metadata(&self) -> &MsMetadata {
        &self.metadata
    }

    fn columns(&self) -> &BTreeSet<MsColumn> {
        &self.columns
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn read_meta(&mut self) -> Result<Vec<RowMeta>, MsError> {
        if let Some(meta) = &self.meta {
            return Ok(meta.clone());
        }

        let mut main_table = read_table(&self.ms, None, TableOpenMode::Read)?;
        let f64_col = |t: &mut Table, c: &str| -> Result<Vec<f64>, MsError> {
            Ok(t.get_col_as_vec(c)?)
        };
        let i32_col = |t: &mut Table, c: &str| -> Result<Vec<i32>, MsError> {
            Ok(t.get_col_as_vec(c)?)
        };
        let time = f64_col(&mut main_table, "TIME")?;
        let interval = f64_col(&mut main_table, "INTERVAL")?;
        let exposure = f64_col(&mut main_table, "EXPOSURE")?;
        let time_centroid = f64_col(&mut main_table, "TIME_CENTROID")?;
        let antenna1 = i32_col(&mut main_table, "ANTENNA1")?;
        let antenna2 = i32_col(&mut main_table, "ANTENNA2")?;
        let feed1 = i32_col(&mut main_table, "FEED1")?;
        let feed2 = i32_col(&mut main_table, "FEED2")?;
        let field = i32_col(&mut main_table, "FIELD_ID")?;
        let ddi = i32_col(&mut main_table, "DATA_DESC_ID")?;
        let scan = i32_col(&mut main_table, "SCAN_NUMBER")?;
        let state = i32_col(&mut main_table, "STATE_ID")?;
        let observation = i32_col(&mut main_table, "OBSERVATION_ID")?;
        let array = i32_col(&mut main_table, "ARRAY_ID")?;
        let processor = i32_col(&mut main_table, "PROCESSOR_ID")?;

        let mut uvws: Vec<Vec<f64>> = Vec::with_capacity(self.num_rows);
        main_table.for_each_row(|row| {
            uvws.push(row.get_cell("UVW")?);
            Ok(())
        })?;
        let table = self.name();
        let uvws = uvws
            .into_iter()
            .enumerate()
            .map(|(row, uvw)| match uvw.as_slice() {
                &[u, v, w] => Ok([u, v, w]),
                _ => Err(MsError::BadArrayShape {
                    table: table.clone(),
                    row,
                    array: "UVW",
                    expected: vec![3],
                    got: vec![uvw.len()],
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let meta = (0..self.num_rows)
            .map(|r| {
                Ok(RowMeta {
                    time: time[r],
                    interval: interval[r],
                    exposure: exposure[r],
                    time_centroid: time_centroid[r],
                    antenna1: to_index("ANTENNA1", antenna1[r], r)?,
                    antenna2: to_index("ANTENNA2", antenna2[r], r)?,
                    feed1: feed1[r],
                    feed2: feed2[r],
                    field: to_index("FIELD_ID", field[r], r)?,
                    ddi: to_index("DATA_DESC_ID", ddi[r], r)?,
                    scan: scan[r],
                    state: state[r],
                    observation: to_index("OBSERVATION_ID", observation[r], r)?,
                    array: to_index("ARRAY_ID", array[r], r)?,
                    processor: processor[r],
                    uvw: uvws[r],
                })
            })
            .collect::<Result<Vec<_>, MsError>>()?;
        self.meta = Some(meta.clone());
        Ok(meta)
    }

    fn read_rows(&mut self, rows: &[usize], request: &ReadRequest) -> Result<VisBuffer, MsError> {
        for &col in request.columns {
            if !self.columns.contains(&col) {
                return Err(self.missing(col));
            }
        }
        if self.meta.is_none() {
            self.read_meta()?;
        }
        let all_meta = self.meta.as_deref().unwrap_or_default();
        let meta = rows
            .iter()
            .map(|&r| {
                all_meta.get(r).copied().ok_or(MsError::RowOutOfRange {
                    row: r,
                    num_rows: self.num_rows,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ddi = meta.first().map(|m| m.ddi).unwrap_or(0);

        let name = self.name();
        let (shape, spw, polarization) = ReadShape::new(&name, &self.metadata, ddi, request)?;
        let mut buffer = shape.allocate(rows, meta, ddi, spw, polarization, request.columns);

        let mut main_table = read_table(&self.ms, None, TableOpenMode::Read)?;
        for (i, &r) in rows.iter().enumerate() {
            let row = r as u64;
            for (col, cube) in buffer.data.iter_mut() {
                let cell: Array2<c32> = main_table.get_cell(col.name(), row)?;
                shape.fill(cube, i, r, col.name(), cell.view())?;
            }
            if let Some(cube) = buffer.float_data.as_mut() {
                let cell: Array2<f32> = main_table.get_cell("FLOAT_DATA", row)?;
                shape.fill(cube, i, r, "FLOAT_DATA", cell.view())?;
            }
            if let Some(cube) = buffer.weight_spectrum.as_mut() {
                let cell: Array2<f32> = main_table.get_cell("WEIGHT_SPECTRUM", row)?;
                shape.fill(cube, i, r, "WEIGHT_SPECTRUM", cell.view())?;
            }
            if let Some(cube) = buffer.sigma_spectrum.as_mut() {
                let cell: Array2<f32> = main_table.get_cell("SIGMA_SPECTRUM", row)?;
                shape.fill(cube, i, r, "SIGMA_SPECTRUM", cell.view())?;
            }
            let flag: Array2<bool> = main_table.get_cell("FLAG", row)?;
            shape.fill(&mut buffer.flag, i, r, "FLAG", flag.view())?;
            let weight: Vec<f32> = main_table.get_cell("WEIGHT", row)?;
            shape.fill_corrs(&mut buffer.weight, i, r, "WEIGHT", &weight)?;
            let sigma: Vec<f32> = main_table.get_cell("SIGMA", row)?;
            shape.fill_corrs(&mut buffer.sigma, i, r, "SIGMA", &sigma)?;
            buffer.flag_row[i] = main_table.get_cell("FLAG_ROW", row)?;
        }
        Ok(buffer)
    }

    fn write_flags(
        &mut self,
        rows: &[usize],
        flags: ArrayView3<bool>,
        chans: Option<Range<usize>>,
        corrs: Option<&[usize]>,
    ) -> Result<(), MsError> {
        let mut main_table = read_table(&self.ms, None, TableOpenMode::ReadWrite)?;
        for (&r, new) in rows.iter().zip(flags.outer_iter()) {
            let mut cell: Array2<bool> = main_table.get_cell("FLAG", r as u64)?;
            put_cell_slice(&mut cell, new, &chans, corrs);
            main_table.put_cell("FLAG", r as u64, &cell)?;
        }
        Ok(())
    }

    fn write_flag_row(&mut self, rows: &[usize], flag_row: &[bool]) -> Result<(), MsError> {
        let mut main_table = read_table(&self.ms, None, TableOpenMode::ReadWrite)?;
        for (&r, f) in rows.iter().zip(flag_row) {
            main_table.put_cell("FLAG_ROW", r as u64, f)?;
        }
        Ok(())
    }
}
