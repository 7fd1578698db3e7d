use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable errors surfaced by the simulator.
///
/// Caller bugs (out-of-range page numbers, an erase aimed at a page address)
/// are not represented here: they panic.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid flash geometry: `{field}` must be non-zero")]
    InvalidGeometry { field: &'static str },
    #[error("flash geometry overflows the address space at `{field}`")]
    GeometryOverflow { field: &'static str },
    #[error("operation {0:?} is not supported")]
    UnknownOperation(String),
    #[error("unknown workload {0:?}")]
    UnknownWorkload(String),
    #[error("workload of {pages} pages exceeds device capacity of {capacity} pages")]
    WorkloadTooLarge { pages: usize, capacity: usize },
    #[error("simulation ran out of events before the awaited future completed")]
    Deadlock,
    #[error("simulation executor has shut down")]
    Shutdown,
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
