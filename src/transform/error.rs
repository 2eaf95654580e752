//! Errors of the transformation stages.

use strum_macros::Display;
use thiserror::Error;

use super::State;
use crate::{config::ConfigError, read::MsError, selection::SelectionError};

/// The stage of a transformation.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Configure,
    Open,
    Setup,
    Fill,
    Close,
}

#[derive(Error, Debug)]
#[error("mstransform {stage} failed: {source}")]
pub struct TransformError {
    pub stage: Stage,
    pub source: TransformErrorKind,
}

impl TransformError {
    pub(crate) fn new<E: Into<TransformErrorKind>>(stage: Stage, source: E) -> TransformError {
        TransformError {
            stage,
            source: source.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransformErrorKind {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Ms(#[from] MsError),

    #[error("the transformation is {state}; expected it to be {expected}")]
    WrongState { state: State, expected: State },
}

/// Problems with the visibilities themselves.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("None of the requested data columns ({requested}) are present in {ms}")]
    NoDataColumns { requested: String, ms: String },

    #[error("Spectral window {0} has selected rows but no output grid")]
    UnplannedSpw(usize),
}
