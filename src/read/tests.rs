use std::collections::BTreeSet;

use approx::assert_abs_diff_eq;
use marlu::{c32, RADec};
use ndarray::prelude::*;

use super::*;
use crate::{
    regrid::FreqFrame,
    selection::{MsSelection, ResolvedSelection},
    DataDescription, Field, Polarization, SpectralWindow,
};

const NUM_CHANS: usize = 4;
const BASELINES: [(usize, usize); 3] = [(0, 1), (0, 2), (1, 2)];

fn metadata() -> MsMetadata {
    let window = |f0: f64| {
        SpectralWindow::new(
            "w",
            (0..NUM_CHANS).map(|i| f0 + i as f64 * 1e6).collect(),
            vec![1e6; NUM_CHANS],
            FreqFrame::Topo,
        )
    };
    MsMetadata {
        spectral_windows: vec![window(1e9), window(2e9)],
        data_descriptions: vec![
            DataDescription {
                spw: 0,
                polarization: 0,
            },
            DataDescription {
                spw: 1,
                polarization: 0,
            },
        ],
        polarizations: vec![Polarization {
            corr_types: vec![9, 12],
            corr_products: vec![[0, 0], [1, 1]],
        }],
        fields: vec![Field {
            name: "target".into(),
            phase_centre: RADec { ra: 0.0, dec: 0.0 },
        }],
        antenna_names: vec!["a0".into(), "a1".into(), "a2".into()],
        state_intents: vec![],
        num_observations: 1,
    }
}

/// Four integrations of three baselines in two data descriptions, written
/// time-major with the data descriptions interleaved and baselines reversed.
/// DATA encodes time, ddi and channel as `100 t + 10 ddi + chan` and the
/// correlation as the imaginary part.
fn memory_ms() -> MemoryMs {
    let columns: BTreeSet<MsColumn> = [MsColumn::Data, MsColumn::WeightSpectrum].into();
    let mut ms = MemoryMs::new("test", metadata(), columns);
    for t in 0..4 {
        for ddi in 0..2 {
            for &(a1, a2) in BASELINES.iter().rev() {
                let meta = RowMeta {
                    time: 5e9 + t as f64,
                    interval: 1.0,
                    exposure: 1.0,
                    time_centroid: 5e9 + t as f64,
                    antenna1: a1,
                    antenna2: a2,
                    ddi,
                    scan: 1 + t / 2,
                    state: -1,
                    ..Default::default()
                };
                let mut row = MemoryRow::new(meta, NUM_CHANS, 2);
                row.data.insert(
                    MsColumn::Data,
                    Array2::from_shape_fn((NUM_CHANS, 2), |(c, p)| {
                        c32::new((100 * t + 10 * ddi as i32) as f32 + c as f32, p as f32)
                    }),
                );
                row.weight_spectrum = Some(Array2::from_elem((NUM_CHANS, 2), 2.0));
                ms.rows.push(row);
            }
        }
    }
    ms
}

fn iterator(selection: &[(&'static str, &str)]) -> VisibilityIterator {
    let ms = memory_ms();
    let mut sel = MsSelection::default();
    for (key, value) in selection {
        sel.set(*key, value).unwrap();
    }
    let resolved = ResolvedSelection::resolve(&sel, &ms.metadata).unwrap();
    VisibilityIterator::new(Box::new(ms), &resolved).unwrap()
}

/// The (rows per buffer) of every chunk.
fn layout(vi: &mut VisibilityIterator) -> Vec<Vec<usize>> {
    let mut chunks = vec![];
    vi.origin_chunks();
    while vi.more_chunks() {
        let mut buffers = vec![];
        vi.origin().unwrap();
        while vi.more() {
            buffers.push(vi.buffer().unwrap().num_rows());
            vi.next().unwrap();
        }
        chunks.push(buffers);
        vi.next_chunk();
    }
    chunks
}

#[test]
fn test_default_chunks_are_one_timestamp_of_one_ddi() {
    let mut vi = iterator(&[]);
    assert_eq!(vi.num_selected_rows(), 24);
    assert_eq!(vi.columns(), &[MsColumn::Data]);
    assert_eq!(layout(&mut vi), vec![vec![3]; 8]);

    vi.origin_chunks();
    vi.origin().unwrap();
    let b = vi.buffer().unwrap();
    assert_eq!(b.shape(), (3, NUM_CHANS, 2));
    assert_eq!(b.ddi, 0);
    // Sorted by baseline within a timestamp.
    let baselines: Vec<_> = b.meta.iter().map(|m| (m.antenna1, m.antenna2)).collect();
    assert_eq!(baselines, BASELINES.to_vec());
    assert!(vi.is_last_buffer_in_chunk());
}

#[test]
fn test_combined_ddis_share_a_chunk() {
    let mut vi = iterator(&[]);
    vi.set_chunk_policy(ChunkPolicy {
        combine_ddis: true,
        ..Default::default()
    });
    assert_eq!(layout(&mut vi), vec![vec![3, 3]; 4]);

    vi.origin_chunks();
    vi.origin().unwrap();
    assert!(!vi.is_last_buffer_in_chunk());
    assert_eq!(vi.buffer().unwrap().ddi, 0);
    vi.next().unwrap();
    assert!(vi.is_last_buffer_in_chunk());
    assert_eq!(vi.buffer().unwrap().ddi, 1);
    vi.next().unwrap();
    assert!(!vi.more());
}

#[test]
fn test_time_bins_group_timestamps() {
    let mut vi = iterator(&[]);
    vi.set_chunk_policy(ChunkPolicy {
        time_bin: Some(2.0),
        span_scan: true,
        ..Default::default()
    });
    assert_eq!(layout(&mut vi), vec![vec![6]; 4]);

    vi.origin_chunks();
    vi.origin().unwrap();
    let times: Vec<f64> = vi.buffer().unwrap().meta.iter().map(|m| m.time - 5e9).collect();
    assert_eq!(times, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
}

#[test]
fn test_scan_boundaries_split_time_bins() {
    let mut vi = iterator(&[]);
    // Scans change every two integrations; a 4 s bin spans the change.
    vi.set_chunk_policy(ChunkPolicy {
        time_bin: Some(4.0),
        ..Default::default()
    });
    assert_eq!(layout(&mut vi), vec![vec![6]; 4]);

    vi.set_chunk_policy(ChunkPolicy {
        time_bin: Some(4.0),
        span_scan: true,
        ..Default::default()
    });
    assert_eq!(layout(&mut vi), vec![vec![12]; 2]);
}

#[test]
fn test_channel_and_correlation_selection() {
    let mut vi = iterator(&[("spw", "0:1~2"), ("correlation", "YY")]);
    assert_eq!(vi.num_selected_rows(), 12);
    assert_eq!(vi.chan_range(0), Some(1..3));
    assert_eq!(vi.corr_indices(0), Some(&[1][..]));
    assert_eq!(layout(&mut vi).len(), 4);

    vi.origin_chunks();
    vi.origin().unwrap();
    let b = vi.buffer().unwrap();
    assert_eq!(b.shape(), (3, 2, 1));
    let data = &b.data[&MsColumn::Data];
    assert_eq!(data[(0, 0, 0)], c32::new(1.0, 1.0));
    assert_eq!(data[(0, 1, 0)], c32::new(2.0, 1.0));
    assert_eq!(b.weight.dim(), (3, 1));
}

#[test]
fn test_weight_spectrum_tiers() {
    let mut vi = iterator(&[]);
    vi.set_columns(vec![MsColumn::Data, MsColumn::WeightSpectrum]);
    vi.origin_chunks();
    vi.origin().unwrap();
    let b = vi.buffer().unwrap().clone();
    assert_abs_diff_eq!(
        b.weight_spectrum_from(crate::weights::WeightSpectrumSource::Column),
        Array3::from_elem((3, NUM_CHANS, 2), 2.0)
    );
    // No WEIGHT_SPECTRUM read: WEIGHT is broadcast.
    let mut flat = b.clone();
    flat.weight_spectrum = None;
    flat.weight.fill(3.0);
    assert_abs_diff_eq!(
        flat.weight_spectrum_from(crate::weights::WeightSpectrumSource::Column),
        Array3::from_elem((3, NUM_CHANS, 2), 3.0)
    );
    // Sigmas of 0.5 are weights of 4.
    let mut from_sigma = b;
    from_sigma.sigma_spectrum = Some(Array3::from_elem((3, NUM_CHANS, 2), 0.5));
    assert_abs_diff_eq!(
        from_sigma.weight_spectrum_from(crate::weights::WeightSpectrumSource::SigmaSpectrum),
        Array3::from_elem((3, NUM_CHANS, 2), 4.0)
    );
    assert_abs_diff_eq!(
        from_sigma.sigma_weight_spectrum(),
        Array3::from_elem((3, NUM_CHANS, 2), 4.0)
    );
}

#[test]
fn test_write_flag_goes_to_the_selected_samples() {
    let mut vi = iterator(&[("spw", "0:1~2"), ("correlation", "YY")]);
    vi.origin_chunks();
    vi.origin().unwrap();
    let rows = vi.buffer().unwrap().rows.clone();
    let flags = Array3::from_elem((3, 2, 1), true);
    vi.write_flag(flags.view()).unwrap();
    vi.write_flag_row(&[true, false, false]).unwrap();
    assert!(vi.buffer().unwrap().flag.iter().all(|f| *f));

    let mut ms = vi.into_input();
    let full = ms
        .read_rows(&rows[..1], &ReadRequest::default())
        .unwrap();
    let expected = array![[false, false], [false, true], [false, true], [false, false]];
    assert_eq!(full.flag.slice(s![0, .., ..]), expected);
    assert_eq!(full.flag_row, vec![true]);
}

#[test]
fn test_missing_column() {
    let mut ms = memory_ms();
    let result = ms.read_rows(
        &[0],
        &ReadRequest {
            columns: &[MsColumn::CorrectedData],
            ..Default::default()
        },
    );
    assert!(matches!(
        result,
        Err(MsError::MissingColumn {
            column: MsColumn::CorrectedData,
            ..
        })
    ));
}

#[test]
fn test_bad_cell_shape() {
    let mut ms = memory_ms();
    ms.rows[2].flag = Array2::from_elem((NUM_CHANS + 1, 2), false);
    let result = ms.read_rows(&[2], &ReadRequest::default());
    assert!(matches!(
        result,
        Err(MsError::BadArrayShape { row: 2, array: "FLAG", .. })
    ));
}

#[test]
fn test_row_out_of_range() {
    let mut ms = memory_ms();
    let result = ms.read_rows(&[100], &ReadRequest::default());
    assert!(matches!(
        result,
        Err(MsError::RowOutOfRange { row: 100, num_rows: 24 })
    ));
}
