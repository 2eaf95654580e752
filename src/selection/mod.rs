//! Row, channel and correlation selection.
//!
//! Each key takes a comma-separated list. Id lists accept `N`, `N~M`
//! (inclusive), `<N`, `>N` and `*`. Fields and antennas may also be named;
//! a trailing `*` matches a prefix. Spectral windows may carry one channel
//! range (`2:10~20`). Antennas select every baseline they are part of (`A`)
//! or a single baseline (`A&B`). Time ranges are `start~end` in MJD seconds
//! or as `YYYY/MM/DD/hh:mm:ss`. UV ranges are `lo~hi` with an optional `m`
//! or `km` unit.

mod error;
#[cfg(test)]
mod tests;

pub use error::SelectionError;

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
};

use hifitime::{Epoch, J1900_OFFSET, SECONDS_PER_DAY};

use crate::{config::ConfigError, MsMetadata, RowMeta};

#[derive(Debug, Clone, PartialEq)]
pub enum IdTerm {
    Single(usize),
    /// Inclusive.
    Range(usize, usize),
    Below(usize),
    Above(usize),
    All,
}

impl IdTerm {
    pub fn contains(&self, id: usize) -> bool {
        match self {
            IdTerm::Single(n) => id == *n,
            IdTerm::Range(a, b) => (*a..=*b).contains(&id),
            IdTerm::Below(n) => id < *n,
            IdTerm::Above(n) => id > *n,
            IdTerm::All => true,
        }
    }

    fn parse(s: &str) -> Option<IdTerm> {
        let s = s.trim();
        if s == "*" {
            Some(IdTerm::All)
        } else if let Some(n) = s.strip_prefix('<') {
            n.trim().parse().ok().map(IdTerm::Below)
        } else if let Some(n) = s.strip_prefix('>') {
            n.trim().parse().ok().map(IdTerm::Above)
        } else if let Some((a, b)) = s.split_once('~') {
            let (a, b) = (a.trim().parse().ok()?, b.trim().parse().ok()?);
            (a <= b).then_some(IdTerm::Range(a, b))
        } else {
            s.parse().ok().map(IdTerm::Single)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NameOrId {
    Id(IdTerm),
    Name(String),
}

impl NameOrId {
    fn parse(s: &str) -> NameOrId {
        match IdTerm::parse(s) {
            Some(t) => NameOrId::Id(t),
            None => NameOrId::Name(s.trim().to_string()),
        }
    }

    /// The indices of `names` matched by this term.
    fn matches(&self, names: &[String]) -> BTreeSet<usize> {
        (0..names.len())
            .filter(|&i| match self {
                NameOrId::Id(t) => t.contains(i),
                NameOrId::Name(n) => match n.strip_suffix('*') {
                    Some(prefix) => names[i].starts_with(prefix),
                    None => names[i] == *n,
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpwTerm {
    pub spws: IdTerm,
    /// Inclusive channel range.
    pub chans: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AntennaTerm {
    pub first: NameOrId,
    pub second: Option<NameOrId>,
}

/// Parsed selection strings. Empty lists do not constrain anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MsSelection {
    pub field: Vec<NameOrId>,
    pub spw: Vec<SpwTerm>,
    pub scan: Vec<IdTerm>,
    pub antenna: Vec<AntennaTerm>,
    /// Stokes codes.
    pub correlation: Vec<i32>,
    /// MJD seconds.
    pub timerange: Option<(f64, f64)>,
    pub intent: Vec<String>,
    pub array: Vec<IdTerm>,
    /// \[metres\]
    pub uvrange: Option<(f64, f64)>,
    pub observation: Vec<IdTerm>,
}

/// The selection keys understood by [`MsSelection::set`].
pub const SELECTION_KEYS: [&str; 11] = [
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
];

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn items(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn id_list(key: &'static str, value: &str) -> Result<Vec<IdTerm>, ConfigError> {
    items(value)
        .map(|s| IdTerm::parse(s).ok_or_else(|| invalid(key, s, "not an id, id range or '*'")))
        .collect()
}

impl MsSelection {
    /// Parse the selection string for `key`. Empty strings select
    /// everything.
    pub fn set(&mut self, key: &'static str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }

        match key {
            "field" => self.field = items(value).map(NameOrId::parse).collect(),
            "spw" => self.spw = items(value).map(parse_spw_term).collect::<Result<_, _>>()?,
            "scan" => self.scan = id_list(key, value)?,
            "array" => self.array = id_list(key, value)?,
            "observation" => self.observation = id_list(key, value)?,
            "antenna" => {
                self.antenna = items(value)
                    .map(|s| {
                        let mut parts = s.splitn(2, '&');
                        let first = parts.next().unwrap_or_default();
                        let second = parts.next().map(str::trim).filter(|s| !s.is_empty());
                        if first.trim().is_empty() {
                            return Err(invalid(key, s, "missing antenna"));
                        }
                        Ok(AntennaTerm {
                            first: NameOrId::parse(first),
                            second: second.map(NameOrId::parse),
                        })
                    })
                    .collect::<Result<_, _>>()?
            }
            "correlation" => {
                self.correlation = value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(|s| corr_code(s).ok_or_else(|| invalid(key, s, "unknown correlation")))
                    .collect::<Result<_, _>>()?
            }
            "intent" => self.intent = items(value).map(|s| s.to_uppercase()).collect(),
            "timerange" => self.timerange = Some(parse_range(key, value, parse_time)?),
            "uvrange" => self.uvrange = Some(parse_uvrange(value)?),
            "taql" => return Err(ConfigError::Unsupported("taql")),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn parse_spw_term(s: &str) -> Result<SpwTerm, ConfigError> {
    let (spws, chans) = match s.split_once(':') {
        Some((spws, chans)) => (spws, Some(chans.trim())),
        None => (s, None),
    };
    let spws =
        IdTerm::parse(spws).ok_or_else(|| invalid("spw", s, "not a spectral window id or range"))?;
    let chans = match chans {
        None => None,
        Some(c) if c.contains(';') => {
            return Err(invalid("spw", s, "only one channel range per spectral window is supported"))
        }
        Some(c) => match IdTerm::parse(c) {
            Some(IdTerm::Single(n)) => Some((n, n)),
            Some(IdTerm::Range(a, b)) => Some((a, b)),
            _ => return Err(invalid("spw", s, "channels must be 'N' or 'N~M'")),
        },
    };
    Ok(SpwTerm { spws, chans })
}

/// Stokes code of a correlation name.
pub fn corr_code(name: &str) -> Option<i32> {
    Some(match name.trim().to_uppercase().as_str() {
        "I" => 1,
        "Q" => 2,
        "U" => 3,
        "V" => 4,
        "RR" => 5,
        "RL" => 6,
        "LR" => 7,
        "LL" => 8,
        "XX" => 9,
        "XY" => 10,
        "YX" => 11,
        "YY" => 12,
        _ => return None,
    })
}

fn parse_range(
    key: &'static str,
    value: &str,
    parse: fn(&str) -> Option<f64>,
) -> Result<(f64, f64), ConfigError> {
    let bad = || invalid(key, value, "expected 'lo~hi', '<hi' or '>lo'");
    if let Some(hi) = value.strip_prefix('<') {
        Ok((f64::NEG_INFINITY, parse(hi).ok_or_else(bad)?))
    } else if let Some(lo) = value.strip_prefix('>') {
        Ok((parse(lo).ok_or_else(bad)?, f64::INFINITY))
    } else if let Some((lo, hi)) = value.split_once('~') {
        let range = (parse(lo).ok_or_else(bad)?, parse(hi).ok_or_else(bad)?);
        if range.0 > range.1 {
            return Err(bad());
        }
        Ok(range)
    } else {
        Err(bad())
    }
}

/// MJD seconds, or a `YYYY/MM/DD/hh:mm:ss[.s]` UTC date.
fn parse_time(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(t) = s.parse::<f64>() {
        return Some(t);
    }
    let mut parts = s.splitn(4, '/');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    let (hour, minute, second) = match parts.next() {
        Some(hms) => {
            let mut hms = hms.splitn(3, ':');
            let h: u8 = hms.next()?.parse().ok()?;
            let m: u8 = hms.next().unwrap_or("0").parse().ok()?;
            let sec: f64 = hms.next().unwrap_or("0").parse().ok()?;
            (h, m, sec)
        }
        None => (0, 0, 0.0),
    };
    let whole = second.trunc();
    let nanos = ((second - whole) * 1e9).round() as u32;
    let epoch =
        Epoch::maybe_from_gregorian_utc(year, month, day, hour, minute, whole as u8, nanos)
            .ok()?;
    Some(epoch.to_utc_seconds() + J1900_OFFSET * SECONDS_PER_DAY)
}

fn parse_uvrange(value: &str) -> Result<(f64, f64), ConfigError> {
    // The unit applies to the whole range.
    let (value, scale) = if let Some(v) = value.strip_suffix("km") {
        (v, 1000.0)
    } else if let Some(v) = value.strip_suffix('m') {
        (v, 1.0)
    } else if value.ends_with("lambda") {
        return Err(invalid("uvrange", value, "wavelength units are not supported"));
    } else {
        (value, 1.0)
    };
    let (lo, hi) = parse_range("uvrange", value.trim(), |s| s.trim().parse().ok())?;
    Ok((lo * scale, hi * scale))
}

/// A selection checked against the subtables of a measurement set.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSelection {
    fields: Option<BTreeSet<usize>>,

    /// Selected spectral windows and their channel ranges.
    spws: BTreeMap<usize, Range<usize>>,

    /// Selected data descriptions.
    ddis: BTreeSet<usize>,

    /// Selected correlation indices of each polarization setup.
    corrs: BTreeMap<usize, Vec<usize>>,

    scans: Vec<IdTerm>,
    arrays: Vec<IdTerm>,
    observations: Vec<IdTerm>,
    antennas: Vec<(BTreeSet<usize>, Option<BTreeSet<usize>>)>,
    states: Option<BTreeSet<i32>>,
    timerange: Option<(f64, f64)>,
    uvrange: Option<(f64, f64)>,
}

impl ResolvedSelection {
    pub fn resolve(
        sel: &MsSelection,
        meta: &MsMetadata,
    ) -> Result<ResolvedSelection, SelectionError> {
        let no_match = |key: &'static str, value: String| SelectionError::NoMatch { key, value };

        let fields = if sel.field.is_empty() {
            None
        } else {
            let names: Vec<String> = meta.fields.iter().map(|f| f.name.clone()).collect();
            let mut set = BTreeSet::new();
            for term in &sel.field {
                let matched = term.matches(&names);
                if matched.is_empty() {
                    return Err(no_match("field", format!("{term:?}")));
                }
                set.extend(matched);
            }
            Some(set)
        };

        let mut spws = BTreeMap::new();
        for (i_spw, window) in meta.spectral_windows.iter().enumerate() {
            let num_chans = window.num_chans();
            if sel.spw.is_empty() {
                spws.insert(i_spw, 0..num_chans);
                continue;
            }
            for term in sel.spw.iter().filter(|t| t.spws.contains(i_spw)) {
                let range = match term.chans {
                    None => 0..num_chans,
                    Some((first, last)) => {
                        if last >= num_chans {
                            return Err(SelectionError::ChannelOutOfRange {
                                spw: i_spw,
                                first,
                                last,
                                num_chans,
                            });
                        }
                        first..last + 1
                    }
                };
                spws.insert(i_spw, range);
            }
        }
        for term in &sel.spw {
            if !spws.keys().any(|&s| term.spws.contains(s)) {
                return Err(no_match("spw", format!("{:?}", term.spws)));
            }
        }

        let mut corrs = BTreeMap::new();
        for (i_pol, pol) in meta.polarizations.iter().enumerate() {
            let indices: Vec<usize> = if sel.correlation.is_empty() {
                (0..pol.corr_types.len()).collect()
            } else {
                pol.corr_types
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| sel.correlation.contains(c))
                    .map(|(i, _)| i)
                    .collect()
            };
            if !indices.is_empty() {
                corrs.insert(i_pol, indices);
            }
        }
        if corrs.is_empty() && !meta.polarizations.is_empty() {
            return Err(no_match("correlation", format!("{:?}", sel.correlation)));
        }

        let ddis = meta
            .data_descriptions
            .iter()
            .enumerate()
            .filter(|(_, dd)| spws.contains_key(&dd.spw) && corrs.contains_key(&dd.polarization))
            .map(|(i, _)| i)
            .collect();

        let mut antennas = vec![];
        for term in &sel.antenna {
            let first = term.first.matches(&meta.antenna_names);
            let second = term.second.as_ref().map(|t| t.matches(&meta.antenna_names));
            if first.is_empty() || second.as_ref().map(|s| s.is_empty()).unwrap_or(false) {
                return Err(no_match("antenna", format!("{term:?}")));
            }
            antennas.push((first, second));
        }

        let states = if sel.intent.is_empty() {
            None
        } else {
            let states: BTreeSet<i32> = meta
                .state_intents
                .iter()
                .enumerate()
                .filter(|(_, mode)| {
                    let mode = mode.to_uppercase();
                    sel.intent.iter().any(|i| mode.contains(i.as_str()))
                })
                .map(|(i, _)| i as i32)
                .collect();
            if states.is_empty() {
                return Err(no_match("intent", sel.intent.join(",")));
            }
            Some(states)
        };

        Ok(ResolvedSelection {
            fields,
            spws,
            ddis,
            corrs,
            scans: sel.scan.clone(),
            arrays: sel.array.clone(),
            observations: sel.observation.clone(),
            antennas,
            states,
            timerange: sel.timerange,
            uvrange: sel.uvrange,
        })
    }

    /// Is this main-table row selected?
    pub fn accepts(&self, row: &RowMeta) -> bool {
        let in_list =
            |terms: &[IdTerm], id: usize| terms.is_empty() || terms.iter().any(|t| t.contains(id));

        self.ddis.contains(&row.ddi)
            && self.fields.as_ref().map_or(true, |f| f.contains(&row.field))
            && (self.scans.is_empty()
                || row.scan >= 0 && in_list(&self.scans, row.scan as usize))
            && in_list(&self.arrays, row.array)
            && in_list(&self.observations, row.observation)
            && self.states.as_ref().map_or(true, |s| s.contains(&row.state))
            && self
                .timerange
                .map_or(true, |(lo, hi)| (lo..=hi).contains(&row.time))
            && self
                .uvrange
                .map_or(true, |(lo, hi)| (lo..=hi).contains(&row.uv_distance()))
            && (self.antennas.is_empty()
                || self.antennas.iter().any(|(a, b)| match b {
                    None => a.contains(&row.antenna1) || a.contains(&row.antenna2),
                    Some(b) => {
                        (a.contains(&row.antenna1) && b.contains(&row.antenna2))
                            || (b.contains(&row.antenna1) && a.contains(&row.antenna2))
                    }
                }))
    }

    /// The selected spectral windows, ascending.
    pub fn spws(&self) -> impl Iterator<Item = usize> + '_ {
        self.spws.keys().copied()
    }

    pub fn ddis(&self) -> &BTreeSet<usize> {
        &self.ddis
    }

    pub fn chan_range(&self, spw: usize) -> Option<Range<usize>> {
        self.spws.get(&spw).cloned()
    }

    pub fn corr_indices(&self, polarization: usize) -> Option<&[usize]> {
        self.corrs.get(&polarization).map(|v| v.as_slice())
    }
}
