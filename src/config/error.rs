use thiserror::Error;

use crate::{kernels::KernelError, regrid::FreqFrame};

/// Problems with the parameters of a transformation. These are caught before
/// any output is written.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unrecognised configuration key '{0}'")]
    UnknownKey(String),

    #[error("Configuration key '{key}' expects {expected}, but got {got}")]
    WrongType {
        key: String,
        expected: &'static str,
        got: String,
    },

    #[error("Invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("'{0}' must be given")]
    MissingKey(&'static str),

    #[error("'{0}' is not supported")]
    Unsupported(&'static str),

    #[error("{0}")]
    Contradictory(String),

    #[error("'chanbin' has {got} entries, but {expected} spectral windows are selected")]
    ChanbinCount { expected: usize, got: usize },

    #[error("The output grid of spectral window {spw} would have no channels")]
    NoOutputChannels { spw: String },

    #[error("Cannot convert frequencies from {from} to {to} for this data")]
    UndefinedFrameConversion { from: FreqFrame, to: FreqFrame },

    #[error("Velocity regridding needs a rest frequency ('restfreq')")]
    MissingRestFreq,

    #[error("{0}")]
    ArgFile(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
