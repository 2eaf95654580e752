use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("The '{key}' selection '{value}' matched nothing in the measurement set")]
    NoMatch { key: &'static str, value: String },

    #[error("Channels {first}~{last} of spectral window {spw} are out of range; it has {num_chans} channels")]
    ChannelOutOfRange {
        spw: usize,
        first: usize,
        last: usize,
        num_chans: usize,
    },

    #[error("The selection yields zero rows")]
    NoRowsSelected,

    #[error("Selected {dimension} id {id} has no row in its subtable (which has {size} rows)")]
    DanglingIndex {
        dimension: &'static str,
        id: usize,
        size: usize,
    },
}
