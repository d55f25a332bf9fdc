use std::path::PathBuf;

/// Errors raised while loading or validating mining configuration.
///
/// These are fatal to the subsystem that asked for the configuration: a worker
/// that cannot get a valid pattern declines to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for `{field}`")]
    InvalidNumber { field: &'static str, value: String },

    #[error("no offsets read ({0})")]
    EmptyPattern(&'static str),

    #[error("duplicate offset or index {value} ({label})")]
    Duplicate { label: &'static str, value: u32 },

    #[error("offset index {index} out of range, pattern has {len} offsets ({label})")]
    IndexOutOfRange {
        label: &'static str,
        index: u32,
        len: usize,
    },

    #[error("pattern has {len} offsets, at most {max} are supported")]
    PatternTooLong { len: usize, max: usize },

    #[error("offsets must be strictly ascending ({0})")]
    Unordered(&'static str),

    #[error("no origins loaded")]
    NoOrigins,

    #[error("primorial of the first {0} primes does not fit in 64 bits")]
    PrimorialOverflow(u32),

    #[error("invalid proof hash: {0}")]
    InvalidProofHash(String),
}
