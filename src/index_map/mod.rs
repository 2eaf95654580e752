//! Old-to-new id mappings for the subtable dimensions of a measurement set.
//! They are built once from the selected rows and only read afterwards.

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use log::debug;

use crate::{selection::SelectionError, MsMetadata, RowMeta};

/// The ids referenced by the selected rows, per dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedIds {
    pub observation: BTreeSet<usize>,
    pub array: BTreeSet<usize>,
    pub scan: BTreeSet<i32>,
    /// Rows without a state (-1) are not recorded.
    pub state: BTreeSet<usize>,
    pub field: BTreeSet<usize>,
    pub spw: BTreeSet<usize>,
    pub ddi: BTreeSet<usize>,
    pub antenna: BTreeSet<usize>,
}

impl SelectedIds {
    pub fn from_rows<'a, I>(rows: I, meta: &MsMetadata) -> SelectedIds
    where
        I: IntoIterator<Item = &'a RowMeta>,
    {
        let mut ids = SelectedIds::default();
        for row in rows {
            ids.observation.insert(row.observation);
            ids.array.insert(row.array);
            ids.scan.insert(row.scan);
            if row.state >= 0 {
                ids.state.insert(row.state as usize);
            }
            ids.field.insert(row.field);
            ids.ddi.insert(row.ddi);
            if let Some(spw) = meta.spw_of_ddi(row.ddi) {
                ids.spw.insert(spw);
            }
            ids.antenna.insert(row.antenna1);
            ids.antenna.insert(row.antenna2);
        }
        ids
    }
}

/// The number of rows in each subtable. Scans have no subtable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtableSizes {
    pub observation: usize,
    pub array: usize,
    pub state: usize,
    pub field: usize,
    pub spw: usize,
    pub ddi: usize,
    pub antenna: usize,
}

impl SubtableSizes {
    pub fn from_metadata(meta: &MsMetadata) -> SubtableSizes {
        SubtableSizes {
            observation: meta.num_observations,
            // The ARRAY_ID column has no subtable to check against.
            array: usize::MAX,
            state: meta.state_intents.len(),
            field: meta.fields.len(),
            spw: meta.spectral_windows.len(),
            ddi: meta.data_descriptions.len(),
            antenna: meta.antenna_names.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexPolicy {
    /// Renumber every subtable dimension densely.
    pub reindex: bool,
    /// All selected spectral windows become one.
    pub combine_spws: bool,
    /// Each output spectral window is split into this many.
    pub nspws: usize,
    /// The first output data description id.
    pub ddi_start: usize,
}

impl Default for ReindexPolicy {
    fn default() -> Self {
        ReindexPolicy {
            reindex: true,
            combine_spws: false,
            nspws: 1,
            ddi_start: 0,
        }
    }
}

/// A mapping from input ids to output ids. Iteration order is output order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap(IndexMap<usize, usize>);

impl IdMap {
    fn dense(ids: &BTreeSet<usize>) -> IdMap {
        IdMap(ids.iter().enumerate().map(|(new, &old)| (old, new)).collect())
    }

    fn identity(ids: &BTreeSet<usize>) -> IdMap {
        IdMap(ids.iter().map(|&old| (old, old)).collect())
    }

    pub fn get(&self, old: usize) -> Option<usize> {
        self.0.get(&old).copied()
    }

    /// For id columns where negative values mean "none".
    pub fn get_i32(&self, old: i32) -> Option<i32> {
        if old < 0 {
            Some(old)
        } else {
            self.get(old as usize).map(|new| new as i32)
        }
    }

    /// The input ids, in the order of their output ids.
    pub fn old_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0.iter().map(|(&old, &new)| (old, new))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.0.iter().all(|(old, new)| old == new)
    }
}

impl FromIterator<(usize, usize)> for IdMap {
    fn from_iter<I: IntoIterator<Item = (usize, usize)>>(iter: I) -> Self {
        IdMap(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMaps {
    pub observation: IdMap,
    pub array: IdMap,
    /// Scan numbers are labels, not subtable rows; they are never renumbered.
    pub scan: BTreeSet<i32>,
    pub state: IdMap,
    pub field: IdMap,
    /// Maps to the first output spectral window made from the input one.
    pub spw: IdMap,
    /// Maps to the first output data description made from the input one.
    pub ddi: IdMap,
    pub antenna: IdMap,
}

impl IndexMaps {
    /// Build the mappings. New ids are handed out in ascending order of the
    /// selected input ids, so the same selection always gives the same maps
    /// and the relative order of ids is kept.
    pub fn build(
        ids: &SelectedIds,
        sizes: &SubtableSizes,
        policy: ReindexPolicy,
    ) -> Result<IndexMaps, SelectionError> {
        check_dangling("OBSERVATION", &ids.observation, sizes.observation)?;
        check_dangling("ARRAY", &ids.array, sizes.array)?;
        check_dangling("STATE", &ids.state, sizes.state)?;
        check_dangling("FIELD", &ids.field, sizes.field)?;
        check_dangling("SPECTRAL_WINDOW", &ids.spw, sizes.spw)?;
        check_dangling("DATA_DESCRIPTION", &ids.ddi, sizes.ddi)?;
        check_dangling("ANTENNA", &ids.antenna, sizes.antenna)?;

        let map = |set: &BTreeSet<usize>| {
            if policy.reindex {
                IdMap::dense(set)
            } else {
                IdMap::identity(set)
            }
        };
        let nspws = policy.nspws.max(1);
        // Changing the spectral windows always renumbers them.
        let (spw, ddi) = if policy.combine_spws {
            (
                IdMap(ids.spw.iter().map(|&old| (old, 0)).collect()),
                IdMap(ids.ddi.iter().map(|&old| (old, 0)).collect()),
            )
        } else if policy.reindex || nspws > 1 {
            (
                IdMap(
                    ids.spw
                        .iter()
                        .enumerate()
                        .map(|(i, &old)| (old, i * nspws))
                        .collect(),
                ),
                IdMap(
                    ids.ddi
                        .iter()
                        .enumerate()
                        .map(|(i, &old)| (old, i * nspws))
                        .collect(),
                ),
            )
        } else {
            (IdMap::identity(&ids.spw), IdMap::identity(&ids.ddi))
        };
        let ddi = IdMap(ddi.iter().map(|(old, new)| (old, new + policy.ddi_start)).collect());

        let maps = IndexMaps {
            observation: map(&ids.observation),
            array: map(&ids.array),
            scan: ids.scan.clone(),
            state: map(&ids.state),
            field: map(&ids.field),
            spw,
            ddi,
            antenna: map(&ids.antenna),
        };
        debug!(
            "Index maps: {} observation(s), {} field(s), {} spw(s), {} ddi(s), {} antenna(s)",
            maps.observation.len(),
            maps.field.len(),
            maps.spw.len(),
            maps.ddi.len(),
            maps.antenna.len()
        );
        Ok(maps)
    }

    /// Remap the id columns of a row. `None` if the row references an id
    /// outside the selection.
    pub fn remap_row(&self, row: &RowMeta) -> Option<RowMeta> {
        Some(RowMeta {
            antenna1: self.antenna.get(row.antenna1)?,
            antenna2: self.antenna.get(row.antenna2)?,
            field: self.field.get(row.field)?,
            ddi: self.ddi.get(row.ddi)?,
            state: self.state.get_i32(row.state)?,
            observation: self.observation.get(row.observation)?,
            array: self.array.get(row.array)?,
            ..*row
        })
    }
}

fn check_dangling(
    dimension: &'static str,
    ids: &BTreeSet<usize>,
    size: usize,
) -> Result<(), SelectionError> {
    match ids.iter().find(|&&id| id >= size) {
        Some(&id) => Err(SelectionError::DanglingIndex {
            dimension,
            id,
            size,
        }),
        None => Ok(()),
    }
}
