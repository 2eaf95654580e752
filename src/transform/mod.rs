//! The transformation manager. It is configured once, opens its input,
//! plans the output at setup and then transforms the input buffer by buffer:
//!
//! ```text
//! configure -> open -> setup -> fill_output_ms x N -> close
//! ```
//!
//! [`MsTransformManager::run`] does all of the filling on two threads.

mod error;
mod stream;

pub use error::{DataError, Stage, TransformError, TransformErrorKind};

use std::{
    collections::{BTreeMap, BTreeSet},
    thread::{self, ScopedJoinHandle},
};

use crossbeam_channel::{bounded, Receiver};
use crossbeam_utils::atomic::AtomicCell;
use indexmap::IndexMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::{debug, info, warn};
use marlu::RADec;
use strum_macros::Display;

use stream::{Bound, Step};

use crate::{
    averaging::{epoch_from_mjd_seconds, TimeAverager},
    channels::SpwInfo,
    config::{ConfigError, ConfigValue, DataColumn, TransformConfig},
    index_map::{IdMap, IndexMaps, ReindexPolicy, SelectedIds, SubtableSizes},
    kernels::AverageKernel,
    read::{ChunkPolicy, InputMs, MsError, MsReader, VisBuffer, VisIter, VisibilityIterator},
    regrid::{
        plan, FrameConverter, FreqFrame, IdentityFrames, PhaseCentre, PlanOptions, RegridPlan,
        SelectedSpw,
    },
    selection::{ResolvedSelection, SelectionError},
    weights::WeightSpectrumSource,
    write::{MsWriter, OutputBlock, OutputMs, OutputSchema, OutputSubtables},
    DataDescription, MsColumn, MsMetadata, Polarization, SpectralWindow,
};

/// Where a [`MsTransformManager`] is in its life.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum State {
    Unconfigured,
    Configured,
    Opened,
    Ready,
    Draining,
    Closed,
}

pub struct MsTransformManager {
    state: State,
    config: TransformConfig,
    frames: Box<dyn FrameConverter>,
    kernel: AverageKernel,
    buffer_mode: bool,
    vi: Option<VisibilityIterator>,
    output: Option<Box<dyn OutputMs>>,
    bound: Option<Bound>,
    /// Transformed buffers waiting for the rest of their chunk to be
    /// combined.
    staged: Vec<VisBuffer>,
    /// The blocks of the latest buffer, in buffer mode.
    transformed: Vec<OutputBlock>,
}

impl Default for MsTransformManager {
    fn default() -> Self {
        MsTransformManager::new()
    }
}

impl MsTransformManager {
    pub fn new() -> MsTransformManager {
        MsTransformManager {
            state: State::Unconfigured,
            config: TransformConfig::default(),
            frames: Box::new(IdentityFrames),
            kernel: AverageKernel::Flags,
            buffer_mode: false,
            vi: None,
            output: None,
            bound: None,
            staged: vec![],
            transformed: vec![],
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Use `frames` for spectral frame conversions. Without this, only
    /// conversions of a frame to itself are defined.
    pub fn set_frame_converter(&mut self, frames: Box<dyn FrameConverter>) {
        self.frames = frames;
    }

    pub fn configure(&mut self, config: TransformConfig) -> Result<(), TransformError> {
        self.configure_inner(config)
            .map_err(|e| TransformError::new(Stage::Configure, e))
    }

    pub fn configure_from_map(
        &mut self,
        map: &BTreeMap<String, ConfigValue>,
    ) -> Result<(), TransformError> {
        TransformConfig::from_map(map)
            .map_err(|e| TransformError::new(Stage::Configure, e))
            .and_then(|config| self.configure(config))
    }

    /// Open the casacore measurement set named by `inputms`.
    pub fn open(&mut self) -> Result<(), TransformError> {
        self.open_casacore()
            .map_err(|e| TransformError::new(Stage::Open, e))
    }

    pub fn open_input(&mut self, ms: Box<dyn InputMs>) -> Result<(), TransformError> {
        self.open_inner(ms)
            .map_err(|e| TransformError::new(Stage::Open, e))
    }

    /// Create the casacore measurement set named by `outputms`.
    pub fn setup(&mut self) -> Result<(), TransformError> {
        self.setup_casacore()
            .map_err(|e| TransformError::new(Stage::Setup, e))
    }

    pub fn setup_output(&mut self, output: Box<dyn OutputMs>) -> Result<(), TransformError> {
        self.setup_inner(output)
            .map_err(|e| TransformError::new(Stage::Setup, e))
    }

    /// Transform the current buffer of the visibility iterator and write
    /// the result, or keep it in buffer mode. When spectral windows are
    /// combined, nothing is produced until the last buffer of a chunk.
    pub fn fill_output_ms(&mut self) -> Result<(), TransformError> {
        self.fill_inner()
            .map_err(|e| TransformError::new(Stage::Fill, e))
    }

    /// Flush any pending combination and finalise the output. Closing a
    /// closed manager does nothing.
    pub fn close(&mut self) -> Result<(), TransformError> {
        self.close_inner()
            .map_err(|e| TransformError::new(Stage::Close, e))
    }

    /// Transform every chunk and close. Transformation and writing run on
    /// separate threads. Buffer mode does not apply; everything is written.
    pub fn run(&mut self, show_progress: bool) -> Result<(), TransformError> {
        self.run_inner(show_progress)
            .map_err(|e| TransformError::new(Stage::Fill, e))?;
        self.close()
    }

    pub fn vis_iter(&mut self) -> Option<&mut VisibilityIterator> {
        self.vi.as_mut()
    }

    pub fn output_ms(&self) -> Option<&dyn OutputMs> {
        self.output.as_deref()
    }

    /// (rows, channels, correlations) of the current buffer.
    pub fn shape(&self) -> Option<(usize, usize, usize)> {
        self.vi.as_ref()?.buffer().map(|b| b.shape())
    }

    /// (rows, channels, correlations) of the current buffer once
    /// transformed. The channels are those of the whole output grid, before
    /// any split into `nspws` windows.
    pub fn transformed_shape(&self) -> Option<(usize, usize, usize)> {
        let buffer = self.vi.as_ref()?.buffer()?;
        self.bound.as_ref()?.transformed_shape(buffer)
    }

    /// Input data column to output data column.
    pub fn data_col_map(&self) -> Option<&IndexMap<MsColumn, MsColumn>> {
        self.bound.as_ref().map(|b| &b.columns)
    }

    /// The blocks made from the latest buffer, in buffer mode.
    pub fn transformed_buffer(&self) -> &[OutputBlock] {
        &self.transformed
    }

    pub fn set_channel_average_kernel(&mut self, kernel: AverageKernel) {
        self.kernel = kernel;
    }

    pub fn set_buffer_mode(&mut self, on: bool) {
        self.buffer_mode = on;
    }

    pub fn plan(&self) -> Option<&RegridPlan> {
        self.bound.as_ref().map(|b| &b.plan)
    }

    pub fn index_maps(&self) -> Option<&IndexMaps> {
        self.bound.as_ref().map(|b| &b.maps)
    }

    fn require(&self, allowed: &[State]) -> Result<(), TransformErrorKind> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TransformErrorKind::WrongState {
                state: self.state,
                expected: allowed[0],
            })
        }
    }

    fn iter_mut(&mut self) -> Result<&mut VisibilityIterator, TransformErrorKind> {
        let state = self.state;
        self.vi.as_mut().ok_or(TransformErrorKind::WrongState {
            state,
            expected: State::Opened,
        })
    }

    fn configure_inner(&mut self, config: TransformConfig) -> Result<(), TransformErrorKind> {
        self.require(&[State::Unconfigured, State::Configured])?;
        self.kernel = config.use_weights.kernel();
        self.buffer_mode = config.buffer_mode;
        info!(
            "Configured: datacolumn {:?}, combinespws {}, chanaverage {}, hanning {}, regridms {}, timeaverage {}",
            config.datacolumn,
            config.combine_spws,
            config.chanbin.is_some(),
            config.hanning,
            config.regrid.is_some(),
            config.time_average.is_some()
        );
        self.config = config;
        self.state = State::Configured;
        Ok(())
    }

    fn open_casacore(&mut self) -> Result<(), TransformErrorKind> {
        self.require(&[State::Configured])?;
        let path = self
            .config
            .input_ms
            .as_ref()
            .ok_or(ConfigError::MissingKey("inputms"))?;
        let reader = MsReader::new(path)?;
        self.open_inner(Box::new(reader))
    }

    fn open_inner(&mut self, ms: Box<dyn InputMs>) -> Result<(), TransformErrorKind> {
        self.require(&[State::Configured])?;
        let selection = ResolvedSelection::resolve(&self.config.selection, ms.metadata())?;
        let vi = VisibilityIterator::new(ms, &selection)?;
        if vi.num_selected_rows() == 0 {
            return Err(SelectionError::NoRowsSelected.into());
        }
        info!(
            "Opened {}: {} rows selected",
            vi.input_name(),
            vi.num_selected_rows()
        );
        self.vi = Some(vi);
        self.state = State::Opened;
        Ok(())
    }

    fn setup_casacore(&mut self) -> Result<(), TransformErrorKind> {
        self.require(&[State::Opened])?;
        let output = self
            .config
            .output_ms
            .as_ref()
            .ok_or(ConfigError::MissingKey("outputms"))?;
        let input = self
            .config
            .input_ms
            .as_ref()
            .ok_or(ConfigError::MissingKey("inputms"))?;
        let writer = MsWriter::new(output, input);
        self.setup_inner(Box::new(writer))
    }

    fn setup_inner(&mut self, mut output: Box<dyn OutputMs>) -> Result<(), TransformErrorKind> {
        self.require(&[State::Opened])?;
        let config = &self.config;
        let vi = match self.vi.as_mut() {
            Some(vi) => vi,
            None => {
                return Err(TransformErrorKind::WrongState {
                    state: self.state,
                    expected: State::Opened,
                })
            }
        };

        let present = vi.input_columns().clone();
        let columns = data_column_map(&config.datacolumn, &present, &vi.input_name())?;
        let has_ws = present.contains(&MsColumn::WeightSpectrum);
        let has_ss = present.contains(&MsColumn::SigmaSpectrum);
        let weight_source = WeightSpectrumSource::choose(has_ws, has_ss);
        info!("Channel weights come from {weight_source}");

        let mut read: Vec<MsColumn> = columns.keys().copied().collect();
        if has_ws {
            read.push(MsColumn::WeightSpectrum);
        }
        if has_ss {
            read.push(MsColumn::SigmaSpectrum);
        }
        vi.set_columns(read);

        let metadata = vi.metadata().clone();
        let ids = SelectedIds::from_rows(vi.selected_meta(), &metadata);
        let selected: Vec<SelectedSpw> = ids
            .spw
            .iter()
            .filter_map(|&spw| {
                let window = metadata.spectral_windows.get(spw)?;
                Some(SelectedSpw {
                    spw,
                    window,
                    chans: vi.chan_range(spw).unwrap_or(0..window.num_chans()),
                })
            })
            .collect();
        if config.nspws > 1 && !config.combine_spws && selected.len() > 1 {
            return Err(ConfigError::Contradictory(format!(
                "nspws = {} needs combinespws or a single selected spectral window ({} are selected)",
                config.nspws,
                selected.len()
            ))
            .into());
        }

        let first_row = vi
            .selected_meta()
            .min_by(|a, b| a.time.total_cmp(&b.time))
            .copied()
            .unwrap_or_default();
        let direction = match config.regrid.as_ref().and_then(|r| r.phasecenter) {
            Some(PhaseCentre::Direction(d)) => d,
            Some(PhaseCentre::Field(f)) => metadata
                .fields
                .get(f)
                .map(|f| f.phase_centre)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "phasecenter",
                    value: f.to_string(),
                    reason: format!("there are only {} fields", metadata.fields.len()),
                })?,
            None => metadata
                .fields
                .get(first_row.field)
                .map(|f| f.phase_centre)
                .unwrap_or(RADec { ra: 0.0, dec: 0.0 }),
        };

        let plan = plan(
            &selected,
            &PlanOptions {
                combine_spws: config.combine_spws,
                chanbin: config.chanbin.as_ref(),
                hanning: config.hanning,
                regrid: config.regrid.as_ref(),
                nspws: config.nspws,
                frames: self.frames.as_ref(),
                ref_time: epoch_from_mjd_seconds(first_row.time),
                direction,
            },
        )?;
        if let Some(short) = plan.outputs.iter().find(|o| o.split.len() != config.nspws) {
            return Err(ConfigError::InvalidValue {
                key: "nspws",
                value: config.nspws.to_string(),
                reason: format!(
                    "only {} windows can be made from the {} channels of {}",
                    short.split.len(),
                    short.grid.num_chans(),
                    short.name
                ),
            }
            .into());
        }

        let maps = IndexMaps::build(
            &ids,
            &SubtableSizes::from_metadata(&metadata),
            ReindexPolicy {
                reindex: config.reindex,
                combine_spws: config.combine_spws,
                nspws: config.nspws,
                ddi_start: config.ddi_start,
            },
        )?;

        vi.set_chunk_policy(ChunkPolicy {
            time_bin: config.time_average.as_ref().map(|t| t.timebin),
            span_scan: config.time_average.as_ref().map_or(false, |t| t.span_scan),
            span_state: config.time_average.as_ref().map_or(false, |t| t.span_state),
            combine_ddis: config.combine_spws,
        });

        let schema = OutputSchema {
            data_columns: columns.values().copied().unique().collect(),
            weight_spectrum: config.use_wt_spectrum.unwrap_or(has_ws),
            sigma_spectrum: config.use_wt_spectrum.unwrap_or(has_ss),
        };
        let corrs: Vec<Vec<usize>> = metadata
            .polarizations
            .iter()
            .enumerate()
            .map(|(i, pol)| match vi.corr_indices(i) {
                Some(c) => c.to_vec(),
                None => (0..pol.corr_types.len()).collect(),
            })
            .collect();
        let subtables = output_subtables(&metadata, &plan, &maps, &corrs, config.reindex);
        output.create(&schema, &subtables)?;
        info!(
            "Set up {}: {} spectral window(s) from {}, {} chunk(s) to transform",
            output.name(),
            subtables.metadata.spectral_windows.len(),
            selected.len(),
            vi.num_chunks()
        );

        self.bound = Some(Bound {
            sigma_from_weight: columns.get(&MsColumn::CorrectedData) == Some(&MsColumn::Data),
            columns,
            weight_source,
            plan,
            maps,
            averager: config.time_average.as_ref().map(TimeAverager::new),
            schema,
            direction,
        });
        self.output = Some(output);
        self.state = State::Ready;
        Ok(())
    }

    /// The blocks made from the current buffer.
    fn transform_current(&mut self) -> Result<Vec<OutputBlock>, TransformErrorKind> {
        self.require(&[State::Ready, State::Draining])?;
        self.state = State::Draining;
        let (vi, bound) = match (self.vi.as_ref(), self.bound.as_ref()) {
            (Some(vi), Some(bound)) => (vi, bound),
            _ => return Ok(vec![]),
        };
        let buffer = match vi.buffer() {
            Some(b) => b,
            None => return Ok(vec![]),
        };
        let last_in_chunk = vi.is_last_buffer_in_chunk();
        match bound.transform(buffer, self.kernel, self.frames.as_ref())? {
            Step::Blocks(blocks) => Ok(blocks),
            Step::Staged(b) => {
                self.staged.push(b);
                if last_in_chunk {
                    Ok(self.drain())
                } else {
                    Ok(vec![])
                }
            }
        }
    }

    /// Combine whatever is staged.
    fn drain(&mut self) -> Vec<OutputBlock> {
        let staged = std::mem::take(&mut self.staged);
        match self.bound.as_ref() {
            Some(bound) if !staged.is_empty() => {
                bound.combine(staged, self.kernel, self.frames.as_ref())
            }
            _ => vec![],
        }
    }

    fn emit(&mut self, blocks: Vec<OutputBlock>) -> Result<(), TransformErrorKind> {
        if blocks.is_empty() {
            return Ok(());
        }
        if self.buffer_mode {
            self.transformed = blocks;
            return Ok(());
        }
        let output = self.output.as_mut().ok_or(MsError::NotCreated)?;
        for block in &blocks {
            output.write_block(block)?;
        }
        Ok(())
    }

    fn fill_inner(&mut self) -> Result<(), TransformErrorKind> {
        let blocks = self.transform_current()?;
        self.emit(blocks)
    }

    fn close_inner(&mut self) -> Result<(), TransformErrorKind> {
        match self.state {
            State::Closed => return Ok(()),
            State::Ready | State::Draining => (),
            _ => {
                self.state = State::Closed;
                return Ok(());
            }
        }
        let pending = self.drain();
        self.emit(pending)?;
        if let Some(output) = self.output.as_mut() {
            output.finalise()?;
            info!("Wrote {} rows to {}", output.num_rows(), output.name());
        }
        self.state = State::Closed;
        Ok(())
    }

    fn run_inner(&mut self, show_progress: bool) -> Result<(), TransformErrorKind> {
        self.require(&[State::Ready])?;
        let num_chunks = self.iter_mut()?.num_chunks();
        let mut output = self.output.take().ok_or(MsError::NotCreated)?;

        let (tx, rx) = bounded(5);
        let error = AtomicCell::new(false);
        let multi_progress = MultiProgress::with_draw_target(if show_progress {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        });
        let transform_progress = multi_progress.add(progress_bar(num_chunks, "Transforming"));
        let write_progress = multi_progress.add(progress_bar(num_chunks, "Writing"));
        transform_progress.tick();
        write_progress.tick();

        let (transformed, written) = thread::scope(|s| {
            let manager = &mut *self;
            let error = &error;
            let transform_progress = &transform_progress;
            let transformer = s.spawn(move || {
                let result = manager.transform_chunks(
                    |blocks| tx.send(blocks).is_ok(),
                    error,
                    transform_progress,
                );
                if result.is_err() {
                    error.store(true);
                }
                result
            });

            let output = output.as_mut();
            let write_progress = &write_progress;
            let writer = s.spawn(move || {
                let result = write_chunks(output, rx, error, write_progress);
                if result.is_err() {
                    error.store(true);
                }
                result
            });

            (join(transformer), join(writer))
        });

        self.output = Some(output);
        transformed?;
        written?;
        Ok(())
    }

    /// Transform every chunk, handing the blocks of each to `send`. Stops
    /// early if `send` returns false or `error` is raised.
    fn transform_chunks<F>(
        &mut self,
        mut send: F,
        error: &AtomicCell<bool>,
        progress: &ProgressBar,
    ) -> Result<(), TransformErrorKind>
    where
        F: FnMut(Vec<OutputBlock>) -> bool,
    {
        self.iter_mut()?.origin_chunks();
        let mut i_chunk = 0;
        while self.iter_mut()?.more_chunks() {
            debug!("Transforming chunk {i_chunk}");
            self.iter_mut()?.origin()?;
            let mut blocks = vec![];
            while self.iter_mut()?.more() {
                if error.load() {
                    return Ok(());
                }
                blocks.extend(self.transform_current()?);
                self.iter_mut()?.next()?;
            }
            blocks.extend(self.drain());
            self.iter_mut()?.next_chunk();
            progress.inc(1);
            if !send(blocks) {
                return Ok(());
            }
            i_chunk += 1;
        }
        progress.abandon_with_message("Finished transforming");
        Ok(())
    }
}

fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(
            "{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} chunks ({elapsed_precise}<{eta_precise})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    ProgressBar::new(len as _)
        .with_style(style)
        .with_position(0)
        .with_message(message)
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(t) => t,
        Err(e) => std::panic::resume_unwind(e),
    }
}

/// Write what arrives on `rx` until the channel closes or `error` is raised.
fn write_chunks(
    output: &mut dyn OutputMs,
    rx: Receiver<Vec<OutputBlock>>,
    error: &AtomicCell<bool>,
    progress: &ProgressBar,
) -> Result<(), TransformErrorKind> {
    for (i_chunk, blocks) in rx.iter().enumerate() {
        if error.load() {
            return Ok(());
        }
        debug!("Writing chunk {i_chunk} ({} blocks)", blocks.len());
        for block in &blocks {
            output.write_block(block)?;
        }
        progress.inc(1);
    }
    progress.abandon_with_message("Finished writing");
    Ok(())
}

/// Pair requested input columns with their output columns, skipping the
/// ones the input lacks.
fn data_column_map(
    requested: &DataColumn,
    present: &BTreeSet<MsColumn>,
    ms: &str,
) -> Result<IndexMap<MsColumn, MsColumn>, DataError> {
    let mut map = IndexMap::new();
    for (input, output) in requested.requested() {
        if present.contains(&input) {
            map.insert(input, output);
        } else if *requested != DataColumn::All {
            warn!("{input} is not present in {ms}; skipping it");
        }
    }
    if map.is_empty() {
        return Err(DataError::NoDataColumns {
            requested: requested
                .requested()
                .iter()
                .map(|(input, _)| input.to_string())
                .join(","),
            ms: ms.to_string(),
        });
    }
    Ok(map)
}

fn window(name: &str, grid: &SpwInfo, frame: FreqFrame) -> SpectralWindow {
    SpectralWindow {
        name: name.to_string(),
        freqs: grid.freqs().to_vec(),
        widths: grid.widths().to_vec(),
        effective_bw: grid.effective_bw().to_vec(),
        resolution: grid.resolution().to_vec(),
        ref_freq: grid.ref_freq(),
        total_bandwidth: grid.total_bandwidth(),
        frame,
    }
}

/// The output subtables. Without reindexing, every row of a subtable is
/// kept; spectral windows are still renumbered when they are combined or
/// split.
fn output_subtables(
    meta: &MsMetadata,
    plan: &RegridPlan,
    maps: &IndexMaps,
    corrs: &[Vec<usize>],
    reindex: bool,
) -> OutputSubtables {
    let sources = |map: &IdMap, size: usize| -> Vec<usize> {
        if reindex {
            map.old_ids().collect()
        } else {
            (0..size).collect()
        }
    };
    let mut out = OutputSubtables::default();

    let pol_ids: BTreeSet<usize> = maps
        .ddi
        .old_ids()
        .filter_map(|d| meta.data_descriptions.get(d).map(|dd| dd.polarization))
        .collect();
    let pol_map: IdMap = if reindex {
        pol_ids.iter().enumerate().map(|(new, &old)| (old, new)).collect()
    } else {
        (0..meta.polarizations.len()).map(|p| (p, p)).collect()
    };
    for (old, _) in pol_map.iter() {
        let (pol, keep) = match (meta.polarizations.get(old), corrs.get(old)) {
            (Some(p), Some(k)) => (p, k),
            _ => continue,
        };
        out.metadata.polarizations.push(Polarization {
            corr_types: keep.iter().filter_map(|&c| pol.corr_types.get(c).copied()).collect(),
            corr_products: keep
                .iter()
                .filter_map(|&c| pol.corr_products.get(c).copied())
                .collect(),
        });
        out.polarization_sources.push(old);
    }

    let keeps_windows = !reindex
        && plan
            .outputs
            .iter()
            .all(|o| o.combination.is_none() && o.split.len() == 1);
    if keeps_windows {
        for (i_spw, spw) in meta.spectral_windows.iter().enumerate() {
            let w = match plan.find_input(i_spw) {
                Some((i_out, _)) => {
                    let o = &plan.outputs[i_out];
                    window(&o.name, &o.grid, o.frame)
                }
                None => spw.clone(),
            };
            out.metadata.spectral_windows.push(w);
            out.spw_sources.push(i_spw);
        }
        out.metadata.data_descriptions = meta.data_descriptions.clone();
        out.ddi_sources = (0..meta.data_descriptions.len()).collect();
    } else {
        for o in &plan.outputs {
            for part in 0..o.split.len() {
                out.metadata
                    .spectral_windows
                    .push(window(&o.name, &o.part_grid(part), o.frame));
                out.spw_sources.push(o.inputs.first().map_or(0, |i| i.spw));
            }
        }
        for (old, _) in maps.ddi.iter().unique_by(|(_, new)| *new) {
            let dd = match meta.data_descriptions.get(old) {
                Some(dd) => dd,
                None => continue,
            };
            let parts = plan
                .find_input(dd.spw)
                .map_or(1, |(i_out, _)| plan.outputs[i_out].split.len());
            let base = maps.spw.get(dd.spw).unwrap_or(0);
            let polarization = pol_map.get(dd.polarization).unwrap_or(0);
            for part in 0..parts {
                out.metadata.data_descriptions.push(DataDescription {
                    spw: base + part,
                    polarization,
                });
                out.ddi_sources.push(old);
            }
        }
    }

    out.field_sources = sources(&maps.field, meta.fields.len());
    out.antenna_sources = sources(&maps.antenna, meta.antenna_names.len());
    out.state_sources = sources(&maps.state, meta.state_intents.len());
    out.observation_sources = sources(&maps.observation, meta.num_observations);
    out.metadata.fields = out
        .field_sources
        .iter()
        .filter_map(|&i| meta.fields.get(i).cloned())
        .collect();
    out.metadata.antenna_names = out
        .antenna_sources
        .iter()
        .filter_map(|&i| meta.antenna_names.get(i).cloned())
        .collect();
    out.metadata.state_intents = out
        .state_sources
        .iter()
        .filter_map(|&i| meta.state_intents.get(i).cloned())
        .collect();
    out.metadata.num_observations = out.observation_sources.len();

    if reindex {
        out.remaps.push(("ANTENNA_ID", maps.antenna.clone()));
        out.remaps.push(("FIELD_ID", maps.field.clone()));
        out.remaps.push(("OBSERVATION_ID", maps.observation.clone()));
    }
    if !keeps_windows {
        // Each output window takes the subtable rows of its first input.
        let spw: IdMap = maps.spw.iter().unique_by(|(_, new)| *new).collect();
        out.remaps.push(("SPECTRAL_WINDOW_ID", spw));
    }
    out
}
