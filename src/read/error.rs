//! Errors associated with reading and writing measurement sets.

use std::path::PathBuf;

use marlu::rubbl_casatables;
use thiserror::Error;

use crate::MsColumn;

#[derive(Error, Debug)]
pub enum MsError {
    #[error("Supplied file path {0} does not exist or is not readable!")]
    BadFile(PathBuf),

    #[error("The main table of the measurement set contains no rows!")]
    MainTableEmpty,

    #[error("Column {column} is not present in {table}")]
    MissingColumn { table: String, column: MsColumn },

    #[error("{table} row {row}: {array} has shape {got:?}, expected {expected:?}")]
    BadArrayShape {
        table: String,
        row: usize,
        array: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Found a negative {column} ({value}) in row {row}")]
    NegativeId {
        column: &'static str,
        value: i32,
        row: usize,
    },

    #[error("DATA_DESC_ID {0} has no row in the DATA_DESCRIPTION table")]
    UnknownDdi(usize),

    #[error("Row {row} is out of range; the table has {num_rows} rows")]
    RowOutOfRange { row: usize, num_rows: usize },

    #[error("Output {0} already exists; refusing to overwrite it")]
    OutputExists(PathBuf),

    #[error("The output measurement set has not been created yet")]
    NotCreated,

    #[error("The in-memory measurement set was left in an inconsistent state by a panicking thread")]
    Poisoned,

    #[error("Error when trying to interface with measurement set: {0}")]
    Table(#[from] rubbl_casatables::TableError),

    #[error("Error from casacore: {0}")]
    Casacore(#[from] rubbl_casatables::CasacoreError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
