//! The parameters of a transformation. A flat key-value map (from an
//! argument file, the command line or a caller) is validated once into an
//! immutable [`TransformConfig`].

mod error;
#[cfg(test)]
mod tests;

pub use error::ConfigError;

use std::{
    collections::BTreeMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use itertools::Itertools;
use log::{debug, warn};
use marlu::RADec;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    kernels::{AverageKernel, InterpolationMethod},
    regrid::{ChanBin, FreqFrame, PhaseCentre, RegridMode, RegridSpec, VelocityType},
    selection::{MsSelection, SELECTION_KEYS},
    MsColumn,
};

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntList(Vec<i64>),
    StrList(Vec<String>),
}

impl ConfigValue {
    /// Interpret a command-line value: booleans, integers, floats and
    /// comma-separated integer lists are recognised, anything else is a
    /// string.
    pub fn from_cli(s: &str) -> ConfigValue {
        let s = s.trim();
        if let Ok(b) = s.parse::<bool>() {
            ConfigValue::Bool(b)
        } else if let Ok(i) = s.parse::<i64>() {
            ConfigValue::Int(i)
        } else if let Ok(f) = s.parse::<f64>() {
            ConfigValue::Float(f)
        } else if s.contains(',') {
            match s.split(',').map(|i| i.trim().parse::<i64>()).collect() {
                Ok(v) => ConfigValue::IntList(v),
                Err(_) => ConfigValue::Str(s.to_string()),
            }
        } else {
            ConfigValue::Str(s.to_string())
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfigValue::Bool(b) => format!("the bool {b}"),
            ConfigValue::Int(i) => format!("the integer {i}"),
            ConfigValue::Float(f) => format!("the float {f}"),
            ConfigValue::Str(s) => format!("the string '{s}'"),
            ConfigValue::IntList(v) => format!("the list {v:?}"),
            ConfigValue::StrList(v) => format!("the list {v:?}"),
        }
    }
}

/// Every recognised key.
pub const KEYS: [&str; 38] = [
    "inputms",
    "outputms",
    "datacolumn",
    "field",
    "spw",
    "scan",
    "antenna",
    "correlation",
    "timerange",
    "intent",
    "array",
    "uvrange",
    "observation",
    "taql",
    "combinespws",
    "chanaverage",
    "chanbin",
    "useweights",
    "regridms",
    "mode",
    "start",
    "width",
    "nchan",
    "interpolation",
    "phasecenter",
    "restfreq",
    "outframe",
    "veltype",
    "hanning",
    "timeaverage",
    "timebin",
    "timespan",
    "maxuvwdistance",
    "nspws",
    "reindex",
    "ddistart",
    "usewtspectrum",
    "buffermode",
];

#[derive(Debug, Display, EnumIter, EnumString)]
enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

/// Which input data columns are transformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataColumn {
    Data,
    /// CORRECTED_DATA, written to DATA.
    Corrected,
    /// MODEL_DATA, written to DATA.
    Model,
    FloatData,
    /// Every present data column, each to itself.
    All,
    /// These columns, each to itself.
    List(Vec<MsColumn>),
}

impl DataColumn {
    fn parse(s: &str) -> Option<DataColumn> {
        let s = s.trim().to_uppercase();
        if s.contains(',') {
            return s
                .split(',')
                .map(|c| Self::column(c.trim()))
                .collect::<Option<Vec<_>>>()
                .map(DataColumn::List);
        }
        Some(match s.as_str() {
            "DATA" => DataColumn::Data,
            "CORRECTED" | "CORRECTED_DATA" => DataColumn::Corrected,
            "MODEL" | "MODEL_DATA" => DataColumn::Model,
            "FLOAT_DATA" => DataColumn::FloatData,
            "ALL" => DataColumn::All,
            _ => return None,
        })
    }

    fn column(s: &str) -> Option<MsColumn> {
        match s {
            "DATA" => Some(MsColumn::Data),
            "CORRECTED" | "CORRECTED_DATA" => Some(MsColumn::CorrectedData),
            "MODEL" | "MODEL_DATA" => Some(MsColumn::ModelData),
            "FLOAT_DATA" => Some(MsColumn::FloatData),
            _ => None,
        }
    }

    /// The (input, output) column pairs requested.
    pub fn requested(&self) -> Vec<(MsColumn, MsColumn)> {
        use MsColumn::*;
        match self {
            DataColumn::Data => vec![(Data, Data)],
            DataColumn::Corrected => vec![(CorrectedData, Data)],
            DataColumn::Model => vec![(ModelData, Data)],
            DataColumn::FloatData => vec![(FloatData, FloatData)],
            DataColumn::All => [Data, CorrectedData, ModelData, FloatData]
                .into_iter()
                .map(|c| (c, c))
                .collect(),
            DataColumn::List(v) => v.iter().map(|&c| (c, c)).collect(),
        }
    }
}

/// How channel averaging treats flags and weights.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, Default)]
#[strum(serialize_all = "lowercase")]
pub enum UseWeights {
    #[default]
    Flags,
    Spectrum,
    Flat,
}

impl UseWeights {
    pub fn kernel(self) -> AverageKernel {
        match self {
            UseWeights::Flags => AverageKernel::Flags,
            UseWeights::Spectrum => AverageKernel::FlagWeights,
            UseWeights::Flat => AverageKernel::Simple,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeAverageSpec {
    /// \[seconds\]
    pub timebin: f64,
    pub span_scan: bool,
    pub span_state: bool,
    /// \[metres\]
    pub max_uvw_distance: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub input_ms: Option<PathBuf>,
    pub output_ms: Option<PathBuf>,
    pub datacolumn: DataColumn,
    pub selection: MsSelection,
    pub combine_spws: bool,
    /// `Some` when channel averaging is on.
    pub chanbin: Option<ChanBin>,
    pub use_weights: UseWeights,
    /// `Some` when regridding is on.
    pub regrid: Option<RegridSpec>,
    pub hanning: bool,
    /// `Some` when time averaging is on.
    pub time_average: Option<TimeAverageSpec>,
    pub nspws: usize,
    pub reindex: bool,
    /// Added to every output data description id, for outputs that are
    /// later concatenated.
    pub ddi_start: usize,
    /// Force (or suppress) WEIGHT_SPECTRUM and SIGMA_SPECTRUM in the output.
    /// By default they are written if the input has them.
    pub use_wt_spectrum: Option<bool>,
    /// Keep transformed buffers in memory instead of writing them.
    pub buffer_mode: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            input_ms: None,
            output_ms: None,
            datacolumn: DataColumn::Corrected,
            selection: MsSelection::default(),
            combine_spws: false,
            chanbin: None,
            use_weights: UseWeights::Flags,
            regrid: None,
            hanning: false,
            time_average: None,
            nspws: 1,
            reindex: true,
            ddi_start: 0,
            use_wt_spectrum: None,
            buffer_mode: false,
        }
    }
}

/// Typed access to a configuration map.
struct Values<'a>(&'a BTreeMap<String, ConfigValue>);

impl<'a> Values<'a> {
    fn get(&self, key: &str) -> Option<&'a ConfigValue> {
        self.0.get(key)
    }

    fn wrong(key: &str, expected: &'static str, got: &ConfigValue) -> ConfigError {
        ConfigError::WrongType {
            key: key.to_string(),
            expected,
            got: got.describe(),
        }
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(ConfigValue::Bool(b)) => Ok(*b),
            Some(v) => Err(Self::wrong(key, "a bool", v)),
        }
    }

    fn int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(i)) => Ok(Some(*i)),
            Some(v) => Err(Self::wrong(key, "an integer", v)),
        }
    }

    fn string(&self, key: &str) -> Result<Option<&'a str>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(s)) => Ok(Some(s.as_str())),
            Some(v) => Err(Self::wrong(key, "a string", v)),
        }
    }

    /// Selection expressions may be given as plain ids.
    fn selection(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(s)) => Ok(Some(s.clone())),
            Some(ConfigValue::Int(i)) => Ok(Some(i.to_string())),
            Some(ConfigValue::IntList(v)) => Ok(Some(v.iter().join(","))),
            Some(ConfigValue::StrList(v)) => Ok(Some(v.join(","))),
            Some(v) => Err(Self::wrong(key, "a selection string", v)),
        }
    }

    /// A number, possibly written as a string with a unit.
    fn quantity(&self, key: &'static str, unit: Unit) -> Result<Option<f64>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(i)) => Ok(Some(*i as f64)),
            Some(ConfigValue::Float(f)) => Ok(Some(*f)),
            Some(ConfigValue::Str(s)) if s.trim().is_empty() => Ok(None),
            Some(ConfigValue::Str(s)) => parse_quantity(s, unit)
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key,
                    value: s.clone(),
                    reason: format!("expected a number with an optional {unit:?} unit"),
                }),
            Some(v) => Err(Self::wrong(key, "a number or a quantity string", v)),
        }
    }
}

/// The kinds of units accepted in quantity strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Plain numbers only.
    Count,
    Frequency,
    Velocity,
    Time,
    Length,
}

/// Parse `"<number><unit>"` into the unit's SI base. A bare number is taken
/// to be in the base unit already.
pub fn parse_quantity(s: &str, unit: Unit) -> Option<f64> {
    let s = s.trim();
    let split = (1..=s.len())
        .rev()
        .find(|&i| s.is_char_boundary(i) && s[..i].parse::<f64>().is_ok())?;
    let value: f64 = s[..split].parse().ok()?;
    let suffix = s[split..].trim().to_lowercase();
    let scale = match (unit, suffix.as_str()) {
        (_, "") => 1.0,
        (Unit::Frequency, "hz") => 1.0,
        (Unit::Frequency, "khz") => 1e3,
        (Unit::Frequency, "mhz") => 1e6,
        (Unit::Frequency, "ghz") => 1e9,
        (Unit::Velocity, "m/s") => 1.0,
        (Unit::Velocity, "km/s") => 1e3,
        (Unit::Time, "s") => 1.0,
        (Unit::Time, "min") => 60.0,
        (Unit::Time, "h") => 3600.0,
        (Unit::Length, "m") => 1.0,
        (Unit::Length, "km") => 1e3,
        _ => return None,
    };
    Some(value * scale)
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

impl TransformConfig {
    /// Validate a flat configuration map.
    pub fn from_map(map: &BTreeMap<String, ConfigValue>) -> Result<TransformConfig, ConfigError> {
        if let Some(unknown) = map.keys().find(|k| !KEYS.contains(&k.as_str())) {
            return Err(ConfigError::UnknownKey(unknown.clone()));
        }
        let values = Values(map);
        let mut config = TransformConfig {
            input_ms: values.string("inputms")?.map(PathBuf::from),
            output_ms: values.string("outputms")?.map(PathBuf::from),
            ..Default::default()
        };

        if let Some(dc) = values.string("datacolumn")? {
            config.datacolumn = DataColumn::parse(dc).ok_or_else(|| {
                invalid(
                    "datacolumn",
                    dc,
                    "expected DATA, CORRECTED, MODEL, FLOAT_DATA, ALL or a list of columns",
                )
            })?;
        }

        for key in SELECTION_KEYS {
            if let Some(s) = values.selection(key)? {
                config.selection.set(key, &s)?;
            }
        }

        config.combine_spws = values.bool("combinespws", false)?;
        config.hanning = values.bool("hanning", false)?;
        config.reindex = values.bool("reindex", true)?;
        config.buffer_mode = values.bool("buffermode", false)?;
        config.use_wt_spectrum = match values.get("usewtspectrum") {
            None => None,
            Some(_) => Some(values.bool("usewtspectrum", false)?),
        };

        if let Some(s) = values.string("useweights")? {
            config.use_weights = UseWeights::from_str(&s.to_lowercase())
                .map_err(|_| invalid("useweights", s, "expected flags, spectrum or flat"))?;
        }

        if values.bool("chanaverage", false)? {
            let chanbin = match values.get("chanbin") {
                None => ChanBin::Uniform(1),
                Some(ConfigValue::Int(b)) if *b >= 1 => ChanBin::Uniform(*b as usize),
                Some(ConfigValue::IntList(v)) if !v.is_empty() && v.iter().all(|b| *b >= 1) => {
                    ChanBin::PerSpw(v.iter().map(|b| *b as usize).collect())
                }
                Some(v) => {
                    return Err(invalid(
                        "chanbin",
                        &v.describe(),
                        "expected a positive integer or a list of them",
                    ))
                }
            };
            if chanbin == ChanBin::Uniform(1) {
                warn!("chanaverage is on, but chanbin is 1; no channels will be averaged");
            }
            config.chanbin = Some(chanbin);
        }

        if values.bool("regridms", false)? {
            config.regrid = Some(Self::regrid_spec(&values)?);
        }

        if values.bool("timeaverage", false)? {
            let timebin = values.quantity("timebin", Unit::Time)?.unwrap_or(0.0);
            if timebin <= 0.0 || timebin.is_nan() {
                return Err(invalid(
                    "timebin",
                    &timebin.to_string(),
                    "time averaging needs a positive time bin",
                ));
            }
            let timespan = values.string("timespan")?.unwrap_or("").to_lowercase();
            let mut spec = TimeAverageSpec {
                timebin,
                span_scan: false,
                span_state: false,
                max_uvw_distance: values
                    .quantity("maxuvwdistance", Unit::Length)?
                    .filter(|d| *d > 0.0),
            };
            for s in timespan.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match s {
                    "scan" => spec.span_scan = true,
                    "state" => spec.span_state = true,
                    _ => return Err(invalid("timespan", s, "expected scan, state or scan,state")),
                }
            }
            config.time_average = Some(spec);
        }

        if let Some(n) = values.int("nspws")? {
            if n < 1 {
                return Err(invalid("nspws", &n.to_string(), "must be at least 1"));
            }
            config.nspws = n as usize;
        }
        if let Some(n) = values.int("ddistart")? {
            if n < 0 {
                return Err(invalid("ddistart", &n.to_string(), "must not be negative"));
            }
            config.ddi_start = n as usize;
        }

        if config.nspws > 1 && config.regrid.is_none() && !config.combine_spws {
            debug!(
                "nspws > 1 without regridding or combination; the input window will be split as-is"
            );
        }

        Ok(config)
    }

    fn regrid_spec(values: &Values) -> Result<RegridSpec, ConfigError> {
        let mut spec = RegridSpec::default();
        if let Some(mode) = values.string("mode")? {
            spec.mode = RegridMode::from_str(&mode.to_lowercase())
                .map_err(|_| invalid("mode", mode, "expected channel, frequency or velocity"))?;
        }
        let unit = match spec.mode {
            RegridMode::Channel => Unit::Count,
            RegridMode::Frequency => Unit::Frequency,
            RegridMode::Velocity => Unit::Velocity,
        };
        spec.start = values.quantity("start", unit)?;
        spec.width = values.quantity("width", unit)?;
        if spec.mode == RegridMode::Channel {
            for (key, v) in [("start", spec.start), ("width", spec.width)] {
                if let Some(v) = v {
                    if v.fract() != 0.0 {
                        return Err(invalid(
                            key,
                            &v.to_string(),
                            "channel mode needs whole channels",
                        ));
                    }
                }
            }
        }
        spec.nchan = values.int("nchan")?.unwrap_or(-1);
        if spec.nchan == 0 {
            return Err(invalid("nchan", "0", "the output grid would have no channels"));
        }
        if let Some(i) = values.string("interpolation")? {
            spec.interpolation = InterpolationMethod::from_str(&i.to_lowercase())
                .map_err(|_| {
                    invalid(
                        "interpolation",
                        i,
                        "expected nearest, linear, cubic, spline or fftshift",
                    )
                })?;
        }
        if let Some(f) = values.string("outframe")?.filter(|s| !s.trim().is_empty()) {
            spec.outframe = Some(
                FreqFrame::from_str(f.trim())
                    .map_err(|_| invalid("outframe", f, "unknown spectral frame"))?,
            );
        }
        if let Some(v) = values.string("veltype")? {
            spec.veltype = VelocityType::from_str(&v.to_lowercase())
                .map_err(|_| invalid("veltype", v, "expected radio or optical"))?;
        }
        spec.restfreq = values.quantity("restfreq", Unit::Frequency)?;
        spec.phasecenter = match values.get("phasecenter") {
            None => None,
            Some(ConfigValue::Int(i)) if *i >= 0 => Some(PhaseCentre::Field(*i as usize)),
            Some(ConfigValue::Str(s)) if s.trim().is_empty() => None,
            Some(ConfigValue::Str(s)) => Some(parse_phase_centre(s)?),
            Some(v) => {
                return Err(invalid(
                    "phasecenter",
                    &v.describe(),
                    "expected a field id or a direction",
                ))
            }
        };
        Ok(spec)
    }

    /// Read a toml or json argument file into a configuration map.
    pub fn read_arg_file(path: &Path) -> Result<BTreeMap<String, ConfigValue>, ConfigError> {
        debug!("Attempting to parse argument file {}", path.display());

        let arg_file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        let mut contents = String::new();
        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                File::open(path)?.read_to_string(&mut contents)?;
                toml::from_str(&contents).map_err(|err| {
                    ConfigError::ArgFile(format!(
                        "Couldn't decode toml structure from {}:\n{err}",
                        path.display()
                    ))
                })
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                File::open(path)?.read_to_string(&mut contents)?;
                serde_json::from_str(&contents).map_err(|err| {
                    ConfigError::ArgFile(format!(
                        "Couldn't decode json structure from {}:\n{err}",
                        path.display()
                    ))
                })
            }
            None => Err(ConfigError::ArgFile(format!(
                "Argument file '{}' doesn't have a recognised file extension! Valid extensions are: toml, json",
                path.display()
            ))),
        }
    }
}

/// `"<field id>"` or `"<frame> <ra> <dec>"` with angles in degrees (`deg`
/// suffix optional) or radians (`rad` suffix).
fn parse_phase_centre(s: &str) -> Result<PhaseCentre, ConfigError> {
    let bad = || invalid("phasecenter", s, "expected a field id or 'J2000 <ra> <dec>'");
    if let Ok(i) = s.trim().parse::<usize>() {
        return Ok(PhaseCentre::Field(i));
    }
    let parts: Vec<&str> = s.split_whitespace().collect();
    let (ra, dec) = match parts.as_slice() {
        [frame, ra, dec] if frame.eq_ignore_ascii_case("J2000") => (*ra, *dec),
        [ra, dec] => (*ra, *dec),
        _ => return Err(bad()),
    };
    let angle = |a: &str| -> Option<f64> {
        let a = a.to_lowercase();
        if let Some(r) = a.strip_suffix("rad") {
            r.parse().ok()
        } else {
            a.strip_suffix("deg")
                .unwrap_or(&a)
                .parse::<f64>()
                .ok()
                .map(f64::to_radians)
        }
    };
    Ok(PhaseCentre::Direction(RADec {
        ra: angle(ra).ok_or_else(bad)?,
        dec: angle(dec).ok_or_else(bad)?,
    }))
}
