use marlu::RADec;

use super::*;
use crate::{regrid::FreqFrame, DataDescription, Field, Polarization, SpectralWindow};

fn metadata() -> MsMetadata {
    let window = |f0: f64| {
        SpectralWindow::new(
            "w",
            (0..16).map(|i| f0 + i as f64 * 1e6).collect(),
            vec![1e6; 16],
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
            corr_types: vec![9, 10, 11, 12],
            corr_products: vec![[0, 0], [0, 1], [1, 0], [1, 1]],
        }],
        fields: ["3C286", "J1331+3030", "target"]
            .iter()
            .map(|n| Field {
                name: n.to_string(),
                phase_centre: RADec { ra: 0.0, dec: 0.0 },
            })
            .collect(),
        antenna_names: vec!["ea01".into(), "ea02".into(), "ea03".into()],
        state_intents: vec![
            "CALIBRATE_BANDPASS#ON_SOURCE".into(),
            "OBSERVE_TARGET#ON_SOURCE".into(),
        ],
        num_observations: 1,
    }
}

fn row(field: usize, ddi: usize, a1: usize, a2: usize) -> RowMeta {
    RowMeta {
        time: 5e9,
        field,
        ddi,
        antenna1: a1,
        antenna2: a2,
        scan: 1,
        state: 1,
        uvw: [30.0, 40.0, 0.0],
        ..Default::default()
    }
}

fn resolve(pairs: &[(&'static str, &str)]) -> Result<ResolvedSelection, SelectionError> {
    let mut sel = MsSelection::default();
    for (k, v) in pairs {
        sel.set(*k, v).unwrap();
    }
    ResolvedSelection::resolve(&sel, &metadata())
}

#[test]
fn test_id_terms() {
    assert_eq!(IdTerm::parse("3"), Some(IdTerm::Single(3)));
    assert_eq!(IdTerm::parse("1~4"), Some(IdTerm::Range(1, 4)));
    assert_eq!(IdTerm::parse("<2"), Some(IdTerm::Below(2)));
    assert_eq!(IdTerm::parse(">2"), Some(IdTerm::Above(2)));
    assert_eq!(IdTerm::parse("*"), Some(IdTerm::All));
    assert_eq!(IdTerm::parse("4~1"), None);
    assert!(IdTerm::Range(1, 4).contains(4));
    assert!(!IdTerm::Below(2).contains(2));
}

#[test]
fn test_empty_selection_accepts_everything() {
    let r = resolve(&[]).unwrap();
    assert!(r.accepts(&row(2, 1, 0, 2)));
    assert_eq!(r.chan_range(1), Some(0..16));
    assert_eq!(r.corr_indices(0), Some(&[0, 1, 2, 3][..]));
}

#[test]
fn test_field_by_name_and_prefix() {
    let r = resolve(&[("field", "target")]).unwrap();
    assert!(r.accepts(&row(2, 0, 0, 1)));
    assert!(!r.accepts(&row(0, 0, 0, 1)));

    let r = resolve(&[("field", "J13*,0")]).unwrap();
    assert!(r.accepts(&row(0, 0, 0, 1)));
    assert!(r.accepts(&row(1, 0, 0, 1)));
    assert!(!r.accepts(&row(2, 0, 0, 1)));

    assert!(matches!(
        resolve(&[("field", "nope")]),
        Err(SelectionError::NoMatch { key: "field", .. })
    ));
}

#[test]
fn test_spw_with_channel_range() {
    let r = resolve(&[("spw", "1:4~7")]).unwrap();
    assert_eq!(r.chan_range(1), Some(4..8));
    assert_eq!(r.chan_range(0), None);
    assert!(!r.accepts(&row(0, 0, 0, 1)));
    assert!(r.accepts(&row(0, 1, 0, 1)));

    assert!(matches!(
        resolve(&[("spw", "0:10~20")]),
        Err(SelectionError::ChannelOutOfRange { .. })
    ));

    let mut sel = MsSelection::default();
    assert!(sel.set("spw", "0:0~3;8~9").is_err());
}

#[test]
fn test_antennas_and_baselines() {
    let r = resolve(&[("antenna", "ea03")]).unwrap();
    assert!(r.accepts(&row(0, 0, 0, 2)));
    assert!(!r.accepts(&row(0, 0, 0, 1)));

    let r = resolve(&[("antenna", "0&1")]).unwrap();
    assert!(r.accepts(&row(0, 0, 0, 1)));
    assert!(r.accepts(&row(0, 0, 1, 0)));
    assert!(!r.accepts(&row(0, 0, 0, 2)));
}

#[test]
fn test_correlations() {
    let r = resolve(&[("correlation", "XX,YY")]).unwrap();
    assert_eq!(r.corr_indices(0), Some(&[0, 3][..]));

    let mut sel = MsSelection::default();
    assert!(sel.set("correlation", "QQ").is_err());

    assert!(matches!(
        resolve(&[("correlation", "RR")]),
        Err(SelectionError::NoMatch { key: "correlation", .. })
    ));
}

#[test]
fn test_ranges() {
    // The uv distance of the test rows is 50 m.
    assert!(resolve(&[("uvrange", "10~60m")]).unwrap().accepts(&row(0, 0, 0, 1)));
    assert!(!resolve(&[("uvrange", "0.1~1km")]).unwrap().accepts(&row(0, 0, 0, 1)));
    assert!(resolve(&[("uvrange", "<51")]).unwrap().accepts(&row(0, 0, 0, 1)));

    assert!(resolve(&[("timerange", "4e9~6e9")]).unwrap().accepts(&row(0, 0, 0, 1)));
    assert!(!resolve(&[("timerange", ">6e9")]).unwrap().accepts(&row(0, 0, 0, 1)));
}

#[test]
fn test_timerange_dates() {
    // 2000-01-01 is MJD 51544.
    let t = parse_time("2000/01/01/00:00:00").unwrap();
    assert!((t - 51544.0 * 86400.0).abs() < 1e-3);
    let t = parse_time("2000/01/01/01:00:30.5").unwrap();
    assert!((t - (51544.0 * 86400.0 + 3630.5)).abs() < 1e-3);
}

#[test]
fn test_intent() {
    let r = resolve(&[("intent", "observe_target")]).unwrap();
    assert!(r.accepts(&row(0, 0, 0, 1)));
    let r = resolve(&[("intent", "BANDPASS")]).unwrap();
    assert!(!r.accepts(&row(0, 0, 0, 1)));
}

#[test]
fn test_taql_is_rejected() {
    let mut sel = MsSelection::default();
    assert!(matches!(
        sel.set("taql", "ANTENNA1 == 0"),
        Err(ConfigError::Unsupported("taql"))
    ));
}
