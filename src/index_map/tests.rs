use super::*;
use crate::{DataDescription, MsMetadata, RowMeta};

fn meta() -> MsMetadata {
    MsMetadata {
        data_descriptions: vec![
            DataDescription {
                spw: 0,
                polarization: 0,
            },
            DataDescription {
                spw: 1,
                polarization: 0,
            },
            DataDescription {
                spw: 2,
                polarization: 0,
            },
        ],
        ..Default::default()
    }
}

fn sizes() -> SubtableSizes {
    SubtableSizes {
        observation: 1,
        array: 1,
        state: 4,
        field: 5,
        spw: 3,
        ddi: 3,
        antenna: 8,
    }
}

fn rows() -> Vec<RowMeta> {
    [(2, 5, 3, 2, 7, -1), (5, 7, 1, 2, 7, 3), (2, 7, 3, 0, 9, 3)]
        .into_iter()
        .map(|(antenna1, antenna2, field, ddi, scan, state)| RowMeta {
            antenna1,
            antenna2,
            field,
            ddi,
            scan,
            state,
            ..Default::default()
        })
        .collect()
}

#[test]
fn test_selected_ids() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    assert_eq!(ids.antenna.iter().copied().collect::<Vec<_>>(), vec![2, 5, 7]);
    assert_eq!(ids.field.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(ids.spw.iter().copied().collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(ids.state.iter().copied().collect::<Vec<_>>(), vec![3]);
    assert_eq!(ids.scan.iter().copied().collect::<Vec<_>>(), vec![7, 9]);
}

#[test]
fn test_dense_reindex() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    let maps = IndexMaps::build(&ids, &sizes(), ReindexPolicy::default()).unwrap();
    assert_eq!(maps.antenna.get(2), Some(0));
    assert_eq!(maps.antenna.get(5), Some(1));
    assert_eq!(maps.antenna.get(7), Some(2));
    assert_eq!(maps.antenna.get(0), None);
    assert_eq!(maps.field.get(3), Some(1));
    assert_eq!(maps.spw.get(2), Some(1));
    assert_eq!(maps.ddi.get(2), Some(1));
    assert_eq!(maps.state.get_i32(3), Some(0));
    assert_eq!(maps.state.get_i32(-1), Some(-1));
    assert_eq!(maps.antenna.old_ids().collect::<Vec<_>>(), vec![2, 5, 7]);
}

#[test]
fn test_build_is_deterministic() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    let a = IndexMaps::build(&ids, &sizes(), ReindexPolicy::default()).unwrap();
    let mut reversed = rows();
    reversed.reverse();
    let ids = SelectedIds::from_rows(&reversed, &meta());
    let b = IndexMaps::build(&ids, &sizes(), ReindexPolicy::default()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_no_reindex_is_identity() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    let policy = ReindexPolicy {
        reindex: false,
        ..Default::default()
    };
    let maps = IndexMaps::build(&ids, &sizes(), policy).unwrap();
    assert!(maps.antenna.is_identity());
    assert!(maps.field.is_identity());
    assert!(maps.spw.is_identity());
    assert!(maps.ddi.is_identity());
}

#[test]
fn test_combined_spws_collapse() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    let policy = ReindexPolicy {
        reindex: false,
        combine_spws: true,
        nspws: 1,
        ddi_start: 0,
    };
    let maps = IndexMaps::build(&ids, &sizes(), policy).unwrap();
    assert_eq!(maps.spw.get(0), Some(0));
    assert_eq!(maps.spw.get(2), Some(0));
    assert_eq!(maps.ddi.get(2), Some(0));
    // Other dimensions are left alone.
    assert!(maps.antenna.is_identity());
}

#[test]
fn test_nspws_leaves_room_for_parts() {
    let ids = SelectedIds::from_rows(&rows()[..1], &meta());
    let policy = ReindexPolicy {
        reindex: false,
        combine_spws: false,
        nspws: 3,
        ddi_start: 0,
    };
    let maps = IndexMaps::build(&ids, &sizes(), policy).unwrap();
    assert_eq!(maps.spw.get(2), Some(0));
    assert_eq!(maps.ddi.get(2), Some(0));
}

#[test]
fn test_ddi_start_offsets_only_data_descriptions() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    let policy = ReindexPolicy {
        ddi_start: 4,
        ..Default::default()
    };
    let maps = IndexMaps::build(&ids, &sizes(), policy).unwrap();
    assert_eq!(maps.ddi.get(0), Some(4));
    assert_eq!(maps.ddi.get(2), Some(5));
    assert_eq!(maps.spw.get(2), Some(1));
    assert_eq!(maps.field.get(3), Some(1));
}

#[test]
fn test_dangling_index() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    let sizes = SubtableSizes {
        field: 2,
        ..sizes()
    };
    let result = IndexMaps::build(&ids, &sizes, ReindexPolicy::default());
    assert_eq!(
        result,
        Err(SelectionError::DanglingIndex {
            dimension: "FIELD",
            id: 3,
            size: 2
        })
    );
}

#[test]
fn test_remap_row() {
    let ids = SelectedIds::from_rows(&rows(), &meta());
    let maps = IndexMaps::build(&ids, &sizes(), ReindexPolicy::default()).unwrap();
    let row = rows()[1];
    let new = maps.remap_row(&row).unwrap();
    assert_eq!((new.antenna1, new.antenna2), (1, 2));
    assert_eq!(new.field, 0);
    assert_eq!(new.ddi, 1);
    assert_eq!(new.scan, 7);
    assert_eq!(new.state, 0);

    let outsider = RowMeta {
        antenna1: 0,
        ..row
    };
    assert!(maps.remap_row(&outsider).is_none());
}
