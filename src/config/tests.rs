use std::io::Write;

use approx::assert_abs_diff_eq;
use indoc::indoc;
use tempfile::Builder;

use super::*;

fn map(pairs: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn s(v: &str) -> ConfigValue {
    ConfigValue::Str(v.to_string())
}

#[test]
fn test_defaults() {
    let config = TransformConfig::from_map(&BTreeMap::new()).unwrap();
    assert_eq!(config.datacolumn, DataColumn::Corrected);
    assert!(config.chanbin.is_none());
    assert!(config.regrid.is_none());
    assert!(config.time_average.is_none());
    assert_eq!(config.nspws, 1);
    assert!(config.reindex);
    assert_eq!(config.use_weights.kernel(), AverageKernel::Flags);
}

#[test]
fn test_unknown_key() {
    let result = TransformConfig::from_map(&map(&[("chanbinn", ConfigValue::Int(2))]));
    assert!(matches!(result, Err(ConfigError::UnknownKey(k)) if k == "chanbinn"));
}

#[test]
fn test_wrong_type() {
    let result = TransformConfig::from_map(&map(&[("combinespws", s("yes"))]));
    assert!(matches!(result, Err(ConfigError::WrongType { key, .. }) if key == "combinespws"));
}

#[test]
fn test_chanbin_forms() {
    let config = TransformConfig::from_map(&map(&[
        ("chanaverage", ConfigValue::Bool(true)),
        ("chanbin", ConfigValue::Int(4)),
    ]))
    .unwrap();
    assert_eq!(config.chanbin, Some(ChanBin::Uniform(4)));

    let config = TransformConfig::from_map(&map(&[
        ("chanaverage", ConfigValue::Bool(true)),
        ("chanbin", ConfigValue::IntList(vec![2, 4])),
    ]))
    .unwrap();
    assert_eq!(config.chanbin, Some(ChanBin::PerSpw(vec![2, 4])));

    // chanbin without chanaverage does nothing.
    let config =
        TransformConfig::from_map(&map(&[("chanbin", ConfigValue::Int(4))])).unwrap();
    assert!(config.chanbin.is_none());

    let result = TransformConfig::from_map(&map(&[
        ("chanaverage", ConfigValue::Bool(true)),
        ("chanbin", ConfigValue::Int(0)),
    ]));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue { key: "chanbin", .. })
    ));
}

#[test]
fn test_datacolumn() {
    let config = TransformConfig::from_map(&map(&[("datacolumn", s("model"))])).unwrap();
    assert_eq!(
        config.datacolumn.requested(),
        vec![(MsColumn::ModelData, MsColumn::Data)]
    );

    let config =
        TransformConfig::from_map(&map(&[("datacolumn", s("DATA,MODEL_DATA"))])).unwrap();
    assert_eq!(
        config.datacolumn.requested(),
        vec![
            (MsColumn::Data, MsColumn::Data),
            (MsColumn::ModelData, MsColumn::ModelData)
        ]
    );

    assert_eq!(DataColumn::All.requested().len(), 4);

    let result = TransformConfig::from_map(&map(&[("datacolumn", s("RESIDUAL"))]));
    assert!(result.is_err());
}

#[test]
fn test_regrid_spec() {
    let config = TransformConfig::from_map(&map(&[
        ("regridms", ConfigValue::Bool(true)),
        ("mode", s("frequency")),
        ("start", s("1.4GHz")),
        ("width", s("100kHz")),
        ("nchan", ConfigValue::Int(10)),
        ("interpolation", s("cubic")),
        ("outframe", s("lsrk")),
    ]))
    .unwrap();
    let spec = config.regrid.unwrap();
    assert_eq!(spec.mode, RegridMode::Frequency);
    assert_abs_diff_eq!(spec.start.unwrap(), 1.4e9, epsilon = 1e-3);
    assert_abs_diff_eq!(spec.width.unwrap(), 1e5, epsilon = 1e-6);
    assert_eq!(spec.nchan, 10);
    assert_eq!(spec.interpolation, InterpolationMethod::Cubic);
    assert_eq!(spec.outframe, Some(FreqFrame::Lsrk));
}

#[test]
fn test_regrid_velocity_units() {
    let config = TransformConfig::from_map(&map(&[
        ("regridms", ConfigValue::Bool(true)),
        ("mode", s("velocity")),
        ("start", s("-20km/s")),
        ("width", s("500m/s")),
        ("restfreq", s("1420.405752MHz")),
        ("veltype", s("optical")),
    ]))
    .unwrap();
    let spec = config.regrid.unwrap();
    assert_abs_diff_eq!(spec.start.unwrap(), -2e4, epsilon = 1e-9);
    assert_abs_diff_eq!(spec.width.unwrap(), 500.0, epsilon = 1e-9);
    assert_abs_diff_eq!(spec.restfreq.unwrap(), 1420.405752e6, epsilon = 1e-3);
    assert_eq!(spec.veltype, VelocityType::Optical);
}

#[test]
fn test_regrid_channel_mode_needs_whole_channels() {
    let result = TransformConfig::from_map(&map(&[
        ("regridms", ConfigValue::Bool(true)),
        ("mode", s("channel")),
        ("width", ConfigValue::Float(1.5)),
    ]));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue { key: "width", .. })
    ));
}

#[test]
fn test_phasecenter() {
    let config = TransformConfig::from_map(&map(&[
        ("regridms", ConfigValue::Bool(true)),
        ("phasecenter", s("J2000 180deg -45deg")),
    ]))
    .unwrap();
    match config.regrid.unwrap().phasecenter {
        Some(PhaseCentre::Direction(d)) => {
            assert_abs_diff_eq!(d.ra, std::f64::consts::PI, epsilon = 1e-12);
            assert_abs_diff_eq!(d.dec, -std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        }
        other => panic!("unexpected phase centre {other:?}"),
    }

    let config = TransformConfig::from_map(&map(&[
        ("regridms", ConfigValue::Bool(true)),
        ("phasecenter", ConfigValue::Int(2)),
    ]))
    .unwrap();
    assert!(matches!(
        config.regrid.unwrap().phasecenter,
        Some(PhaseCentre::Field(2))
    ));
}

#[test]
fn test_time_average() {
    let config = TransformConfig::from_map(&map(&[
        ("timeaverage", ConfigValue::Bool(true)),
        ("timebin", s("2min")),
        ("timespan", s("scan,state")),
        ("maxuvwdistance", s("0.5km")),
    ]))
    .unwrap();
    let spec = config.time_average.unwrap();
    assert_abs_diff_eq!(spec.timebin, 120.0);
    assert!(spec.span_scan);
    assert!(spec.span_state);
    assert_abs_diff_eq!(spec.max_uvw_distance.unwrap(), 500.0);

    let result = TransformConfig::from_map(&map(&[("timeaverage", ConfigValue::Bool(true))]));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue { key: "timebin", .. })
    ));
}

#[test]
fn test_ddi_start() {
    let config = TransformConfig::from_map(&map(&[("ddistart", ConfigValue::Int(3))])).unwrap();
    assert_eq!(config.ddi_start, 3);

    let result = TransformConfig::from_map(&map(&[("ddistart", ConfigValue::Int(-1))]));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue {
            key: "ddistart",
            ..
        })
    ));
}

#[test]
fn test_taql_is_unsupported() {
    let result = TransformConfig::from_map(&map(&[("taql", s("ANTENNA1 == 0"))]));
    assert!(matches!(result, Err(ConfigError::Unsupported("taql"))));
}

#[test]
fn test_selection_accepts_plain_ids() {
    let config = TransformConfig::from_map(&map(&[
        ("field", ConfigValue::Int(0)),
        ("scan", ConfigValue::IntList(vec![1, 3])),
    ]))
    .unwrap();
    let mut expected = MsSelection::default();
    expected.set("field", "0").unwrap();
    expected.set("scan", "1,3").unwrap();
    assert_eq!(config.selection, expected);
}

#[test]
fn test_from_cli() {
    assert_eq!(ConfigValue::from_cli("true"), ConfigValue::Bool(true));
    assert_eq!(ConfigValue::from_cli("4"), ConfigValue::Int(4));
    assert_eq!(ConfigValue::from_cli("0.5"), ConfigValue::Float(0.5));
    assert_eq!(ConfigValue::from_cli("2,4"), ConfigValue::IntList(vec![2, 4]));
    assert_eq!(ConfigValue::from_cli("0~3"), s("0~3"));
    assert_eq!(ConfigValue::from_cli("DATA,MODEL"), s("DATA,MODEL"));
}

#[test]
fn test_parse_quantity() {
    assert_abs_diff_eq!(parse_quantity("1.5GHz", Unit::Frequency).unwrap(), 1.5e9);
    assert_abs_diff_eq!(parse_quantity("10 kHz", Unit::Frequency).unwrap(), 1e4);
    assert_abs_diff_eq!(parse_quantity("3", Unit::Time).unwrap(), 3.0);
    assert_abs_diff_eq!(parse_quantity("1h", Unit::Time).unwrap(), 3600.0);
    assert!(parse_quantity("1km", Unit::Frequency).is_none());
    assert!(parse_quantity("MHz", Unit::Frequency).is_none());
    assert!(parse_quantity("2m", Unit::Count).is_none());
}

#[test]
fn test_read_toml_arg_file() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(
        indoc! {r#"
            inputms = "in.ms"
            outputms = "out.ms"
            datacolumn = "DATA"
            spw = "0:4~11"
            chanaverage = true
            chanbin = [2]
            regridms = true
            nchan = 4
        "#}
        .as_bytes(),
    )
    .unwrap();
    let values = TransformConfig::read_arg_file(file.path()).unwrap();
    assert_eq!(values["chanbin"], ConfigValue::IntList(vec![2]));
    let config = TransformConfig::from_map(&values).unwrap();
    assert_eq!(config.input_ms, Some(PathBuf::from("in.ms")));
    assert_eq!(config.chanbin, Some(ChanBin::PerSpw(vec![2])));
    assert_eq!(config.regrid.unwrap().nchan, 4);
}

#[test]
fn test_read_json_arg_file() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(
        indoc! {r#"
            {
                "inputms": "in.ms",
                "combinespws": true,
                "nspws": 2,
                "timebin": 4.5
            }
        "#}
        .as_bytes(),
    )
    .unwrap();
    let values = TransformConfig::read_arg_file(file.path()).unwrap();
    assert_eq!(values["timebin"], ConfigValue::Float(4.5));
    let config = TransformConfig::from_map(&values).unwrap();
    assert!(config.combine_spws);
    assert_eq!(config.nspws, 2);
}

#[test]
fn test_arg_file_bad_extension() {
    let file = Builder::new().suffix(".yaml").tempfile().unwrap();
    let result = TransformConfig::read_arg_file(file.path());
    assert!(matches!(result, Err(ConfigError::ArgFile(_))));
}
