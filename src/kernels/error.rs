use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum KernelError {
    #[error("The input abscissa must be strictly ascending")]
    NotAscending,

    #[error("fftshift regridding needs an output grid that is a pure shift of the input grid ({0})")]
    NotAShift(String),
}
