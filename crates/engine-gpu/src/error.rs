use engine_cpu::SieveError;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device pipeline {0} is not loaded")]
    NotLoaded(&'static str),

    #[error("frame layout invalid: {0}")]
    Layout(String),

    #[error("could not allocate {what} ({len} entries)")]
    Allocation { what: &'static str, len: usize },

    #[error(transparent)]
    Sieve(#[from] SieveError),
}
