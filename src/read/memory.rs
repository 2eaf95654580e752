//! Measurement sets held in memory.

use std::{
    collections::BTreeSet,
    ops::Range,
    sync::{Arc, Mutex},
};

use indexmap::IndexMap;
use marlu::c32;
use ndarray::prelude::*;

use super::{put_cell_slice, InputMs, MsError, ReadRequest, ReadShape, VisBuffer};
use crate::{
    write::{OutputBlock, OutputMs, OutputSchema, OutputSubtables},
    MsColumn, MsMetadata, RowMeta,
};

/// One main-table row. Cells are `[chan][corr]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub meta: RowMeta,
    pub data: IndexMap<MsColumn, Array2<c32>>,
    pub float_data: Option<Array2<f32>>,
    pub flag: Array2<bool>,
    pub flag_row: bool,
    pub weight: Vec<f32>,
    pub sigma: Vec<f32>,
    pub weight_spectrum: Option<Array2<f32>>,
    pub sigma_spectrum: Option<Array2<f32>>,
}

impl MemoryRow {
    /// A row with a zeroed DATA column, no flags and unit weights.
    pub fn new(meta: RowMeta, num_chans: usize, num_corrs: usize) -> MemoryRow {
        let mut data = IndexMap::new();
        data.insert(MsColumn::Data, Array2::zeros((num_chans, num_corrs)));
        MemoryRow {
            meta,
            data,
            float_data: None,
            flag: Array2::from_elem((num_chans, num_corrs), false),
            flag_row: false,
            weight: vec![1.0; num_corrs],
            sigma: vec![1.0; num_corrs],
            weight_spectrum: None,
            sigma_spectrum: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryMs {
    pub name: String,
    pub metadata: MsMetadata,
    /// The optional columns every row carries.
    pub columns: BTreeSet<MsColumn>,
    pub rows: Vec<MemoryRow>,
}

impl MemoryMs {
    pub fn new(name: &str, metadata: MsMetadata, columns: BTreeSet<MsColumn>) -> MemoryMs {
        MemoryMs {
            name: name.to_string(),
            metadata,
            columns,
            rows: vec![],
        }
    }

    fn row(&self, row: usize) -> Result<&MemoryRow, MsError> {
        self.rows.get(row).ok_or(MsError::RowOutOfRange {
            row,
            num_rows: self.rows.len(),
        })
    }

    fn missing(&self, column: MsColumn) -> MsError {
        MsError::MissingColumn {
            table: self.name.clone(),
            column,
        }
    }
}

impl InputMs for MemoryMs {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn metadata(&self) -> &MsMetadata {
        &self.metadata
    }

    fn columns(&self) -> &BTreeSet<MsColumn> {
        &self.columns
    }

    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn read_meta(&mut self) -> Result<Vec<RowMeta>, MsError> {
        Ok(self.rows.iter().map(|r| r.meta).collect())
    }

    fn read_rows(&mut self, rows: &[usize], request: &ReadRequest) -> Result<VisBuffer, MsError> {
        for &col in request.columns {
            if !self.columns.contains(&col) {
                return Err(self.missing(col));
            }
        }
        let ddi = match rows.first() {
            Some(&r) => self.row(r)?.meta.ddi,
            None => 0,
        };
        let (shape, spw, polarization) = ReadShape::new(&self.name, &self.metadata, ddi, request)?;
        let meta = rows
            .iter()
            .map(|&r| self.row(r).map(|row| row.meta))
            .collect::<Result<Vec<_>, _>>()?;
        let mut buffer = shape.allocate(rows, meta, ddi, spw, polarization, request.columns);

        for (i, &r) in rows.iter().enumerate() {
            let row = self.row(r)?;
            for (col, cube) in buffer.data.iter_mut() {
                let cell = row.data.get(col).ok_or_else(|| self.missing(*col))?;
                shape.fill(cube, i, r, col.name(), cell.view())?;
            }
            if let Some(cube) = buffer.float_data.as_mut() {
                let cell = row
                    .float_data
                    .as_ref()
                    .ok_or_else(|| self.missing(MsColumn::FloatData))?;
                shape.fill(cube, i, r, "FLOAT_DATA", cell.view())?;
            }
            if let Some(cube) = buffer.weight_spectrum.as_mut() {
                let cell = row
                    .weight_spectrum
                    .as_ref()
                    .ok_or_else(|| self.missing(MsColumn::WeightSpectrum))?;
                shape.fill(cube, i, r, "WEIGHT_SPECTRUM", cell.view())?;
            }
            if let Some(cube) = buffer.sigma_spectrum.as_mut() {
                let cell = row
                    .sigma_spectrum
                    .as_ref()
                    .ok_or_else(|| self.missing(MsColumn::SigmaSpectrum))?;
                shape.fill(cube, i, r, "SIGMA_SPECTRUM", cell.view())?;
            }
            shape.fill(&mut buffer.flag, i, r, "FLAG", row.flag.view())?;
            shape.fill_corrs(&mut buffer.weight, i, r, "WEIGHT", &row.weight)?;
            shape.fill_corrs(&mut buffer.sigma, i, r, "SIGMA", &row.sigma)?;
            buffer.flag_row[i] = row.flag_row;
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
        let num_rows = self.rows.len();
        for (&r, new) in rows.iter().zip(flags.outer_iter()) {
            let row = self
                .rows
                .get_mut(r)
                .ok_or(MsError::RowOutOfRange { row: r, num_rows })?;
            put_cell_slice(&mut row.flag, new, &chans, corrs);
        }
        Ok(())
    }

    fn write_flag_row(&mut self, rows: &[usize], flag_row: &[bool]) -> Result<(), MsError> {
        let num_rows = self.rows.len();
        for (&r, &f) in rows.iter().zip(flag_row) {
            self.rows
                .get_mut(r)
                .ok_or(MsError::RowOutOfRange { row: r, num_rows })?
                .flag_row = f;
        }
        Ok(())
    }
}

/// An in-memory output. Clones share the same storage, so a caller can keep
/// a handle while the transformation owns another.
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryMs(Arc<Mutex<Option<MemoryMs>>>);

impl SharedMemoryMs {
    pub fn new() -> SharedMemoryMs {
        SharedMemoryMs::default()
    }

    /// A copy of what has been written so far.
    pub fn snapshot(&self) -> Result<MemoryMs, MsError> {
        let guard = self.0.lock().map_err(|_| MsError::Poisoned)?;
        guard.clone().ok_or(MsError::NotCreated)
    }
}

impl OutputMs for SharedMemoryMs {
    fn name(&self) -> String {
        "(memory)".to_string()
    }

    fn create(
        &mut self,
        schema: &OutputSchema,
        subtables: &OutputSubtables,
    ) -> Result<(), MsError> {
        let mut columns: BTreeSet<MsColumn> = schema.data_columns.iter().copied().collect();
        if schema.weight_spectrum {
            columns.insert(MsColumn::WeightSpectrum);
        }
        if schema.sigma_spectrum {
            columns.insert(MsColumn::SigmaSpectrum);
        }
        let mut guard = self.0.lock().map_err(|_| MsError::Poisoned)?;
        *guard = Some(MemoryMs::new(
            &self.name(),
            subtables.metadata.clone(),
            columns,
        ));
        Ok(())
    }

    fn write_block(&mut self, block: &OutputBlock) -> Result<(), MsError> {
        let mut guard = self.0.lock().map_err(|_| MsError::Poisoned)?;
        let ms = guard.as_mut().ok_or(MsError::NotCreated)?;
        for (i, meta) in block.meta.iter().enumerate() {
            ms.rows.push(MemoryRow {
                meta: *meta,
                data: block
                    .data
                    .iter()
                    .map(|(col, cube)| (*col, cube.slice(s![i, .., ..]).to_owned()))
                    .collect(),
                float_data: block
                    .float_data
                    .as_ref()
                    .map(|cube| cube.slice(s![i, .., ..]).to_owned()),
                flag: block.flag.slice(s![i, .., ..]).to_owned(),
                flag_row: block.flag_row[i],
                weight: block.weight.row(i).to_vec(),
                sigma: block.sigma.row(i).to_vec(),
                weight_spectrum: block
                    .weight_spectrum
                    .as_ref()
                    .map(|cube| cube.slice(s![i, .., ..]).to_owned()),
                sigma_spectrum: block
                    .sigma_spectrum
                    .as_ref()
                    .map(|cube| cube.slice(s![i, .., ..]).to_owned()),
            });
        }
        Ok(())
    }

    fn finalise(&mut self) -> Result<(), MsError> {
        Ok(())
    }

    fn num_rows(&self) -> usize {
        self.0
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|ms| ms.rows.len()))
            .unwrap_or(0)
    }
}
