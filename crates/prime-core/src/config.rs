//! Offset-pattern and origin-list loading.
//!
//! Offsets file: one value per line, everything after `#` on a line is a
//! comment, blank lines are skipped. Values in order:
//!
//! ```text
//! 6                       # primorial end prime (first N primes)
//! 0                       # base offset added to every origin
//! 0, 2, 6, 8, 12, 18, 20  # offsets
//! 0, 1, 2, 3, 4, 5, 6     # sieve sub-pattern A (indices)
//! 1, 2, 3                 # compaction sub-pattern B (indices)
//! 2, 3                    # device pre-test sub-pattern T (indices)
//! ```
//!
//! Origins file: whitespace separated `u64` displacements.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::round::MAX_PATTERN_OFFSETS;

/// The chain shape under search and its sub-patterns.
///
/// Offsets are strictly ascending; sub-patterns are indices into them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffsetPattern {
    offsets: Vec<u32>,
    sieve: Vec<usize>,
    compact: Vec<usize>,
    device_tested: Vec<usize>,
}

impl OffsetPattern {
    pub fn new(
        offsets: Vec<u32>,
        sieve: Vec<u32>,
        compact: Vec<u32>,
        device_tested: Vec<u32>,
    ) -> Result<Self, ConfigError> {
        check_values("Offsets ", &offsets)?;
        if offsets.len() > MAX_PATTERN_OFFSETS {
            return Err(ConfigError::PatternTooLong {
                len: offsets.len(),
                max: MAX_PATTERN_OFFSETS,
            });
        }
        if offsets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Unordered("Offsets "));
        }

        let sieve = check_indices("OffsetsA", &sieve, offsets.len())?;
        let compact = check_indices("OffsetsB", &compact, offsets.len())?;
        let device_tested = check_indices("OffsetsT", &device_tested, offsets.len())?;

        Ok(Self {
            offsets,
            sieve,
            compact,
            device_tested,
        })
    }

    /// Number of slots in the pattern.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn offset(&self, index: usize) -> Option<u32> {
        self.offsets.get(index).copied()
    }

    /// Indices struck by the wheel sieve (sub-pattern A).
    pub fn sieve_indices(&self) -> &[usize] {
        &self.sieve
    }

    /// Indices compacted by device pipelines (sub-pattern B).
    pub fn compact_indices(&self) -> &[usize] {
        &self.compact
    }

    /// Indices already Fermat tested by a device pipeline (sub-pattern T).
    pub fn device_tested_indices(&self) -> &[usize] {
        &self.device_tested
    }

    pub fn is_device_tested(&self, index: usize) -> bool {
        self.device_tested.contains(&index)
    }

    /// Lowest and highest slot index sieved by a device pipeline (A and B).
    pub fn device_range(&self) -> (usize, usize) {
        let all = self.sieve.iter().chain(self.compact.iter());
        let begin = all.clone().copied().min().unwrap_or(0);
        let end = all.copied().max().unwrap_or(0);
        (begin, end)
    }

    fn render(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .map(|&i| self.offsets[i].to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Log the pattern the way it is used: absolute values for every sub-pattern.
    pub fn log_summary(&self) {
        let all: Vec<usize> = (0..self.offsets.len()).collect();
        log::info!("Offsets  = {}", self.render(&all));
        log::info!("OffsetsA = {}", self.render(&self.sieve));
        log::info!("OffsetsB = {}", self.render(&self.compact));
        log::info!("OffsetsT = {}", self.render(&self.device_tested));
    }
}

fn check_values(label: &'static str, values: &[u32]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::EmptyPattern(label));
    }
    for (i, a) in values.iter().enumerate() {
        if values[i + 1..].contains(a) {
            return Err(ConfigError::Duplicate { label, value: *a });
        }
    }
    Ok(())
}

fn check_indices(
    label: &'static str,
    indices: &[u32],
    len: usize,
) -> Result<Vec<usize>, ConfigError> {
    check_values(label, indices)?;
    indices
        .iter()
        .map(|&index| {
            if (index as usize) < len {
                Ok(index as usize)
            } else {
                Err(ConfigError::IndexOutOfRange { label, index, len })
            }
        })
        .collect()
}

/// Parsed offsets file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffsetsFile {
    /// Number of leading primes folded into the primorial.
    pub primorial_end_prime: u32,
    pub base_offset: u64,
    pub pattern: OffsetPattern,
}

fn parse_list(field: &'static str, line: &str) -> Result<Vec<u32>, ConfigError> {
    line.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|_| ConfigError::InvalidNumber {
                field,
                value: s.to_string(),
            })
        })
        .collect()
}

pub fn parse_offsets(text: &str) -> Result<OffsetsFile, ConfigError> {
    let mut values = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty());

    let mut next = |field: &'static str| values.next().ok_or(ConfigError::MissingField(field));

    let end_prime = next("primorial end prime")?;
    let primorial_end_prime = end_prime
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidNumber {
            field: "primorial end prime",
            value: end_prime.to_string(),
        })?;

    let base = next("base offset")?;
    let base_offset = base.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
        field: "base offset",
        value: base.to_string(),
    })?;

    let offsets = parse_list("offsets", next("offsets")?)?;
    let sieve = parse_list("OffsetsA", next("OffsetsA")?)?;
    let compact = parse_list("OffsetsB", next("OffsetsB")?)?;
    let device_tested = parse_list("OffsetsT", next("OffsetsT")?)?;

    Ok(OffsetsFile {
        primorial_end_prime,
        base_offset,
        pattern: OffsetPattern::new(offsets, sieve, compact, device_tested)?,
    })
}

pub fn parse_origins(text: &str) -> Result<Vec<u64>, ConfigError> {
    let origins = text
        .split_whitespace()
        .map(|s| {
            s.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                field: "origin",
                value: s.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if origins.is_empty() {
        return Err(ConfigError::NoOrigins);
    }
    Ok(origins)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_offsets(path: impl AsRef<Path>) -> Result<OffsetsFile, ConfigError> {
    let file = parse_offsets(&read(path.as_ref())?)?;
    log::info!("base_offset = {}", file.base_offset);
    file.pattern.log_summary();
    Ok(file)
}

pub fn load_origins(path: impl AsRef<Path>) -> Result<Vec<u64>, ConfigError> {
    let origins = parse_origins(&read(path.as_ref())?)?;
    log::info!("{} Origins Loaded.", origins.len());
    Ok(origins)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFSETS: &str = "\
6 # primorial end prime
0 # base offset
0, 2, 6, 8, 12, 18, 20 # offsets
0, 1, 2, 3, 4, 5, 6 # A
1, 2, 3 # B

# device tested
2, 3
";

    #[test]
    fn parses_offsets_file() {
        let file = parse_offsets(OFFSETS).unwrap();
        assert_eq!(file.primorial_end_prime, 6);
        assert_eq!(file.base_offset, 0);
        assert_eq!(file.pattern.offsets(), &[0, 2, 6, 8, 12, 18, 20]);
        assert_eq!(file.pattern.sieve_indices().len(), 7);
        assert_eq!(file.pattern.compact_indices(), &[1, 2, 3]);
        assert!(file.pattern.is_device_tested(3));
        assert!(!file.pattern.is_device_tested(0));
        assert_eq!(file.pattern.device_range(), (0, 6));
    }

    #[test]
    fn rejects_duplicate_offsets() {
        let err = OffsetPattern::new(vec![0, 2, 2], vec![0], vec![1], vec![1]).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate { value: 2, .. }));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let err = OffsetPattern::new(vec![0, 2, 6], vec![0, 3], vec![1], vec![1]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::IndexOutOfRange {
                label: "OffsetsA",
                index: 3,
                len: 3
            }
        ));
    }

    #[test]
    fn rejects_empty_and_unordered_patterns() {
        assert!(matches!(
            OffsetPattern::new(vec![], vec![0], vec![0], vec![0]),
            Err(ConfigError::EmptyPattern(_))
        ));
        assert!(matches!(
            OffsetPattern::new(vec![0, 6, 2], vec![0], vec![0], vec![0]),
            Err(ConfigError::Unordered(_))
        ));
        let long: Vec<u32> = (0..33).map(|i| i * 2).collect();
        assert!(matches!(
            OffsetPattern::new(long, vec![0], vec![0], vec![0]),
            Err(ConfigError::PatternTooLong { len: 33, .. })
        ));
    }

    #[test]
    fn full_width_pattern_is_accepted() {
        let offsets: Vec<u32> = (0..32).map(|i| i * 2).collect();
        let pattern = OffsetPattern::new(offsets, vec![0], vec![0], vec![31]).unwrap();
        assert_eq!(pattern.len(), 32);
        assert!(pattern.is_device_tested(31));
    }

    #[test]
    fn missing_pattern_line_is_reported() {
        let err = parse_offsets("6\n0\n0, 2, 6\n0, 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("OffsetsB")));
    }

    #[test]
    fn garbage_numbers_are_reported() {
        let err = parse_offsets("six\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn parses_origins() {
        assert_eq!(parse_origins("15551\n17651 8621\n").unwrap(), vec![15551, 17651, 8621]);
        assert!(matches!(parse_origins("  \n"), Err(ConfigError::NoOrigins)));
        assert!(parse_origins("1 two").is_err());
    }
}
