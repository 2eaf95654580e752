use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
};

use hifitime::{Duration, Epoch};
use log::{debug, trace};
use ndarray::ArrayView3;
use vec1::Vec1;

use super::{InputMs, MsError, ReadRequest, VisBuffer};
use crate::{
    averaging::{epoch_from_mjd_seconds, time_bins},
    selection::ResolvedSelection,
    MsColumn, MsMetadata, RowMeta,
};

/// How selected rows are grouped into chunks. Buffers inside a chunk hold
/// the rows of one data description each.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChunkPolicy {
    /// The width of the time bins \[seconds\]. Without one, every timestamp
    /// is its own chunk.
    pub time_bin: Option<f64>,

    /// Chunks may contain rows of different scans.
    pub span_scan: bool,

    /// Chunks may contain rows of different states.
    pub span_state: bool,

    /// Chunks contain rows of every data description.
    pub combine_ddis: bool,
}

/// A pull interface over the selected rows of a measurement set, in chunks
/// of buffers.
///
/// ```text
/// vi.origin_chunks();
/// while vi.more_chunks() {
///     vi.origin()?;
///     while vi.more() {
///         // use vi.buffer()
///         vi.next()?;
///     }
///     vi.next_chunk();
/// }
/// ```
pub trait VisIter {
    fn origin_chunks(&mut self);

    fn more_chunks(&self) -> bool;

    fn next_chunk(&mut self);

    /// Load the first buffer of the current chunk.
    fn origin(&mut self) -> Result<(), MsError>;

    /// Is there a current buffer?
    fn more(&self) -> bool;

    /// Load the next buffer of the current chunk.
    fn next(&mut self) -> Result<(), MsError>;

    fn buffer(&self) -> Option<&VisBuffer>;

    fn is_last_buffer_in_chunk(&self) -> bool;

    /// Replace the flags of the current buffer, in the input too.
    fn write_flag(&mut self, flags: ArrayView3<bool>) -> Result<(), MsError>;

    /// Replace the row flags of the current buffer, in the input too.
    fn write_flag_row(&mut self, flag_row: &[bool]) -> Result<(), MsError>;
}

pub struct VisibilityIterator {
    ms: Box<dyn InputMs>,

    /// The id columns of every row of the input.
    meta: Vec<RowMeta>,

    /// Selected row numbers, in table order.
    selected: Vec<usize>,

    /// The selected channels of each spectral window with a channel
    /// selection.
    chans: BTreeMap<usize, Range<usize>>,

    /// The selected correlations of each polarization with a correlation
    /// selection.
    corrs: BTreeMap<usize, Vec<usize>>,

    /// The columns read into buffers.
    columns: Vec<MsColumn>,

    policy: ChunkPolicy,

    /// Chunks of buffers of row numbers.
    chunks: Vec<Vec<Vec<usize>>>,

    i_chunk: usize,
    i_buffer: usize,
    buffer: Option<VisBuffer>,
}

impl VisibilityIterator {
    pub fn new(
        mut ms: Box<dyn InputMs>,
        selection: &ResolvedSelection,
    ) -> Result<VisibilityIterator, MsError> {
        let meta = ms.read_meta()?;
        let selected: Vec<usize> = meta
            .iter()
            .enumerate()
            .filter(|(_, m)| selection.accepts(m))
            .map(|(i, _)| i)
            .collect();
        debug!(
            "Selected {} of {} rows of {}",
            selected.len(),
            meta.len(),
            ms.name()
        );

        let chans = selection
            .spws()
            .filter_map(|spw| selection.chan_range(spw).map(|r| (spw, r)))
            .collect();
        let corrs = (0..ms.metadata().polarizations.len())
            .filter_map(|pol| selection.corr_indices(pol).map(|c| (pol, c.to_vec())))
            .collect();
        let columns = ms
            .columns()
            .iter()
            .copied()
            .filter(|c| c.is_data())
            .collect();

        let mut vi = VisibilityIterator {
            ms,
            meta,
            selected,
            chans,
            corrs,
            columns,
            policy: ChunkPolicy::default(),
            chunks: vec![],
            i_chunk: 0,
            i_buffer: 0,
            buffer: None,
        };
        vi.rechunk();
        Ok(vi)
    }

    pub fn metadata(&self) -> &MsMetadata {
        self.ms.metadata()
    }

    /// The optional columns of the input.
    pub fn input_columns(&self) -> &BTreeSet<MsColumn> {
        self.ms.columns()
    }

    pub fn input_name(&self) -> String {
        self.ms.name()
    }

    pub fn num_selected_rows(&self) -> usize {
        self.selected.len()
    }

    pub fn selected_meta(&self) -> impl Iterator<Item = &RowMeta> + '_ {
        self.selected.iter().map(|&r| &self.meta[r])
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// The total number of buffers over all chunks.
    pub fn num_buffers(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    /// The selected channels of `spw`; `None` means all of them.
    pub fn chan_range(&self, spw: usize) -> Option<Range<usize>> {
        self.chans.get(&spw).cloned()
    }

    /// The selected correlations of `polarization`; `None` means all.
    pub fn corr_indices(&self, polarization: usize) -> Option<&[usize]> {
        self.corrs.get(&polarization).map(|c| c.as_slice())
    }

    pub fn columns(&self) -> &[MsColumn] {
        &self.columns
    }

    pub fn set_columns(&mut self, columns: Vec<MsColumn>) {
        self.columns = columns;
        self.buffer = None;
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        self.policy
    }

    /// Regroup the selected rows. The position is reset.
    pub fn set_chunk_policy(&mut self, policy: ChunkPolicy) {
        self.policy = policy;
        self.rechunk();
    }

    fn rechunk(&mut self) {
        let bins = self.time_bin_of_each_row();
        let policy = self.policy;

        // (time bin, observation, array, field, scan, state, ddi)
        type ChunkKey = (usize, usize, usize, usize, i32, i32, usize);
        let mut grouped: BTreeMap<ChunkKey, BTreeMap<usize, Vec<usize>>> = BTreeMap::new();
        for (&r, bin) in self.selected.iter().zip(bins) {
            let m = &self.meta[r];
            let key = (
                bin,
                m.observation,
                m.array,
                m.field,
                if policy.span_scan { i32::MIN } else { m.scan },
                if policy.span_state { i32::MIN } else { m.state },
                if policy.combine_ddis { usize::MAX } else { m.ddi },
            );
            grouped
                .entry(key)
                .or_default()
                .entry(m.ddi)
                .or_default()
                .push(r);
        }

        let meta = &self.meta;
        self.chunks = grouped
            .into_values()
            .map(|buffers| {
                buffers
                    .into_values()
                    .map(|mut rows| {
                        rows.sort_by(|&a, &b| {
                            let (a, b) = (&meta[a], &meta[b]);
                            a.time
                                .total_cmp(&b.time)
                                .then(a.antenna1.cmp(&b.antenna1))
                                .then(a.antenna2.cmp(&b.antenna2))
                        });
                        rows
                    })
                    .collect()
            })
            .collect();
        debug!(
            "{} chunk(s), {} buffer(s)",
            self.chunks.len(),
            self.num_buffers()
        );
        self.i_chunk = 0;
        self.i_buffer = 0;
        self.buffer = None;
    }

    /// The time bin index of every selected row.
    fn time_bin_of_each_row(&self) -> Vec<usize> {
        let times: BTreeSet<u64> = self
            .selected
            .iter()
            .map(|&r| ordered_bits(self.meta[r].time))
            .collect();
        let times: Vec<u64> = times.into_iter().collect();

        let rank_to_bin: Vec<usize> = match self.policy.time_bin {
            Some(width) if width > 0.0 => {
                let epochs = times
                    .iter()
                    .map(|&t| epoch_from_mjd_seconds(from_ordered_bits(t)))
                    .collect::<Vec<Epoch>>();
                match Vec1::try_from_vec(epochs) {
                    Ok(epochs) => {
                        let mut rank_to_bin = vec![0; times.len()];
                        for bin in time_bins(&epochs, Duration::from_seconds(width)) {
                            for rank in bin.range.clone() {
                                rank_to_bin[rank] = bin.index;
                            }
                        }
                        rank_to_bin
                    }
                    Err(_) => vec![],
                }
            }
            _ => (0..times.len()).collect(),
        };

        self.selected
            .iter()
            .map(|&r| {
                let bits = ordered_bits(self.meta[r].time);
                // Every selected time is in `times`.
                let rank = times.binary_search(&bits).unwrap_or(0);
                rank_to_bin.get(rank).copied().unwrap_or(0)
            })
            .collect()
    }

    fn load(&mut self) -> Result<(), MsError> {
        self.buffer = None;
        let rows = match self
            .chunks
            .get(self.i_chunk)
            .and_then(|c| c.get(self.i_buffer))
        {
            Some(rows) => rows,
            None => return Ok(()),
        };
        let ddi = match rows.first() {
            Some(&r) => self.meta[r].ddi,
            None => return Ok(()),
        };
        let dd = self
            .ms
            .metadata()
            .data_descriptions
            .get(ddi)
            .copied()
            .ok_or(MsError::UnknownDdi(ddi))?;
        let request = ReadRequest {
            columns: &self.columns,
            chans: self.chans.get(&dd.spw).cloned(),
            corrs: self.corrs.get(&dd.polarization).map(|c| c.as_slice()),
        };
        trace!(
            "Reading chunk {} buffer {} ({} rows of DDI {ddi})",
            self.i_chunk,
            self.i_buffer,
            rows.len()
        );
        self.buffer = Some(self.ms.read_rows(rows, &request)?);
        Ok(())
    }

    /// Give back the input.
    pub fn into_input(self) -> Box<dyn InputMs> {
        self.ms
    }
}

impl VisIter for VisibilityIterator {
    fn origin_chunks(&mut self) {
        self.i_chunk = 0;
        self.i_buffer = 0;
        self.buffer = None;
    }

    fn more_chunks(&self) -> bool {
        self.i_chunk < self.chunks.len()
    }

    fn next_chunk(&mut self) {
        self.i_chunk += 1;
        self.i_buffer = 0;
        self.buffer = None;
    }

    fn origin(&mut self) -> Result<(), MsError> {
        self.i_buffer = 0;
        self.load()
    }

    fn more(&self) -> bool {
        self.buffer.is_some()
    }

    fn next(&mut self) -> Result<(), MsError> {
        self.i_buffer += 1;
        self.load()
    }

    fn buffer(&self) -> Option<&VisBuffer> {
        self.buffer.as_ref()
    }

    fn is_last_buffer_in_chunk(&self) -> bool {
        match self.chunks.get(self.i_chunk) {
            Some(c) => self.i_buffer + 1 >= c.len(),
            None => true,
        }
    }

    fn write_flag(&mut self, flags: ArrayView3<bool>) -> Result<(), MsError> {
        if let Some(buffer) = self.buffer.as_mut() {
            let chans = self.chans.get(&buffer.spw).cloned();
            let corrs = self.corrs.get(&buffer.polarization).map(|c| c.as_slice());
            self.ms.write_flags(&buffer.rows, flags, chans, corrs)?;
            buffer.flag.assign(&flags);
        }
        Ok(())
    }

    fn write_flag_row(&mut self, flag_row: &[bool]) -> Result<(), MsError> {
        if let Some(buffer) = self.buffer.as_mut() {
            self.ms.write_flag_row(&buffer.rows, flag_row)?;
            buffer.flag_row = flag_row.to_vec();
        }
        Ok(())
    }
}

/// Bits of an `f64` that sort like the value.
fn ordered_bits(x: f64) -> u64 {
    let bits = x.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn from_ordered_bits(bits: u64) -> f64 {
    if bits >> 63 == 1 {
        f64::from_bits(bits & !(1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}
