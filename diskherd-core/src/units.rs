use crate::error::{HerdError, Result};

// Ordered so that multi-letter suffixes match before the bare "B".
const UNITS: &[(&str, u64)] = &[
    ("KIB", 1 << 10),
    ("MIB", 1 << 20),
    ("GIB", 1 << 30),
    ("TIB", 1 << 40),
    ("PIB", 1 << 50),
    ("B", 1),
];

/// Parse a human-readable capacity ("10GiB", "1024MiB", "512", "4096B")
/// into bytes. Units are IEC; a bare number is taken as bytes.
pub fn parse_size(input: &str) -> Result<u64> {
    let upper = input.trim().to_uppercase();
    for (suffix, multiplier) in UNITS {
        if let Some(number) = upper.strip_suffix(suffix) {
            let value: u64 = number
                .trim()
                .parse()
                .map_err(|_| HerdError::InvalidSize(input.to_string()))?;
            return value
                .checked_mul(*multiplier)
                .ok_or_else(|| HerdError::InvalidSize(input.to_string()));
        }
    }
    upper
        .parse()
        .map_err(|_| HerdError::InvalidSize(input.to_string()))
}
