use indexmap::IndexMap;
use marlu::c32;
use ndarray::prelude::*;

use super::*;
use crate::{read::SharedMemoryMs, MsColumn, RowMeta};

fn block(num_rows: usize, num_chans: usize) -> OutputBlock {
    let mut data = IndexMap::new();
    data.insert(
        MsColumn::Data,
        Array3::from_shape_fn((num_rows, num_chans, 2), |(r, c, _)| {
            c32::new(r as f32, c as f32)
        }),
    );
    OutputBlock {
        meta: (0..num_rows)
            .map(|r| RowMeta {
                time: r as f64,
                ddi: 1,
                ..Default::default()
            })
            .collect(),
        ddi: 1,
        data,
        float_data: None,
        flag: Array3::from_elem((num_rows, num_chans, 2), false),
        flag_row: vec![false; num_rows],
        weight: Array2::ones((num_rows, 2)),
        sigma: Array2::ones((num_rows, 2)),
        weight_spectrum: Some(Array3::ones((num_rows, num_chans, 2))),
        sigma_spectrum: None,
    }
}

fn schema() -> OutputSchema {
    OutputSchema {
        data_columns: vec![MsColumn::Data],
        weight_spectrum: true,
        sigma_spectrum: false,
    }
}

#[test]
fn test_block_shape() {
    let b = block(3, 5);
    assert_eq!(b.num_rows(), 3);
    assert_eq!(b.shape(), (3, 5, 2));
}

#[test]
fn test_memory_output_appends_blocks() {
    let mut out = SharedMemoryMs::new();
    let handle = out.clone();
    assert!(handle.snapshot().is_err());

    out.create(&schema(), &OutputSubtables::default()).unwrap();
    out.write_block(&block(2, 4)).unwrap();
    out.write_block(&block(3, 4)).unwrap();
    out.finalise().unwrap();
    assert_eq!(out.num_rows(), 5);

    let ms = handle.snapshot().unwrap();
    assert_eq!(ms.rows.len(), 5);
    assert!(ms.columns.contains(&MsColumn::WeightSpectrum));
    assert!(!ms.columns.contains(&MsColumn::SigmaSpectrum));
    let row = &ms.rows[3];
    assert_eq!(row.meta.time, 1.0);
    assert_eq!(row.data[&MsColumn::Data][(2, 0)], c32::new(1.0, 2.0));
    assert_eq!(row.weight_spectrum.as_ref().unwrap().dim(), (4, 2));
}

#[test]
fn test_writing_before_create_fails() {
    let mut out = SharedMemoryMs::new();
    assert!(matches!(
        out.write_block(&block(1, 1)),
        Err(MsError::NotCreated)
    ));
}

#[test]
fn test_ms_writer_refuses_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = MsWriter::new(dir.path(), dir.path().join("input.ms"));
    let result = writer.create(&schema(), &OutputSubtables::default());
    assert!(matches!(result, Err(MsError::OutputExists(_))));
    assert_eq!(writer.num_rows(), 0);
}
