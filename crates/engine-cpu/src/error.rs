use prime_core::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum WheelError {
    #[error("{sieve_primes} sieve primes leave nothing to sieve after the first {end_prime} primorial primes")]
    TooFewPrimes { sieve_primes: usize, end_prime: u32 },

    #[error("prime {prime} divides primorial {primorial}, it has no inverse")]
    NoInverse { prime: u32, primorial: u64 },

    #[error("{inverse} is not the inverse of primorial {primorial} modulo {prime}")]
    BadInverse {
        prime: u32,
        inverse: u32,
        primorial: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SieveError {
    #[error("sieve size {0} is not a power of two of at least 64 bits")]
    BadSize(u64),

    #[error("could not allocate a {bits}-bit sieve")]
    Allocation { bits: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sieve_bits_log2 {0} out of range 6..=32")]
    BitsOutOfRange(u32),

    #[error("wheel was built for primorial {wheel}, configuration asks for {config}")]
    PrimorialMismatch { wheel: u64, config: u64 },

    #[error("origins leave no room for a single sieve window below 2^64")]
    NoSearchSpace,
}

/// Per-candidate logic errors. The candidate is logged and skipped.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CandidateError {
    #[error("Offset begin greater than end. beg={begin} end={end}")]
    BeginAfterEnd { begin: usize, end: usize },

    #[error("Offset index out of bounds. beg={begin} end={end} len={len} combo={combo:032b}")]
    IndexOutOfRange {
        begin: usize,
        end: usize,
        len: usize,
        combo: u32,
    },

    #[error("Chain length of {length} too high. Max {max}")]
    ChainTooLong { length: u32, max: u32 },

    #[error("nonce for offset {offset} does not fit in 64 bits")]
    NonceOverflow { offset: u64 },
}
