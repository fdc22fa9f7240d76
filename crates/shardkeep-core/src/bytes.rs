//! Byte size values ("10mb", "512k", "0")

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;
const PB: u64 = TB * 1024;

/// A non-negative quantity of bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ByteSizeValue(u64);

impl ByteSizeValue {
    /// Zero bytes
    pub const ZERO: ByteSizeValue = ByteSizeValue(0);

    /// Create from a number of bytes
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from mebibytes
    pub const fn from_mb(mb: u64) -> Self {
        Self(mb * MB)
    }

    /// Number of bytes
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// Whether the value is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a byte size literal.
    ///
    /// Accepts a plain number of bytes or a number followed by one of
    /// `b`, `k`/`kb`, `m`/`mb`, `g`/`gb`, `t`/`tb`, `p`/`pb` (binary
    /// multiples, case-insensitive). Fractions are allowed with a unit and
    /// truncated to whole bytes.
    pub fn parse(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return Err(CoreError::InvalidByteSize("empty value".to_string()));
        }

        let (num_str, multiplier) = split_unit(&lower);
        let num_str = num_str.trim();
        if num_str.is_empty() {
            return Err(CoreError::InvalidByteSize(s.to_string()));
        }
        if num_str.starts_with('-') {
            return Err(CoreError::InvalidByteSize(format!("negative value: {}", s)));
        }

        if let Ok(whole) = num_str.parse::<u64>() {
            return whole
                .checked_mul(multiplier)
                .map(Self)
                .ok_or_else(|| CoreError::ByteSizeOverflow(s.to_string()));
        }

        let fraction: f64 = num_str
            .parse()
            .map_err(|_| CoreError::InvalidByteSize(s.to_string()))?;
        if !fraction.is_finite() || fraction < 0.0 {
            return Err(CoreError::InvalidByteSize(s.to_string()));
        }
        let bytes = fraction * multiplier as f64;
        if bytes >= u64::MAX as f64 {
            return Err(CoreError::ByteSizeOverflow(s.to_string()));
        }
        Ok(Self(bytes as u64))
    }
}

fn split_unit(s: &str) -> (&str, u64) {
    const UNITS: [(&str, u64); 11] = [
        ("pb", PB),
        ("tb", TB),
        ("gb", GB),
        ("mb", MB),
        ("kb", KB),
        ("p", PB),
        ("t", TB),
        ("g", GB),
        ("m", MB),
        ("k", KB),
        ("b", 1),
    ];

    for (suffix, multiplier) in UNITS {
        if let Some(num) = s.strip_suffix(suffix) {
            return (num, multiplier);
        }
    }
    (s, 1)
}

impl FromStr for ByteSizeValue {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ByteSizeValue {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ByteSizeValue> for String {
    fn from(v: ByteSizeValue) -> Self {
        v.to_string()
    }
}

impl fmt::Display for ByteSizeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes == 0 {
            return f.write_str("0b");
        }
        for (unit, size) in [("pb", PB), ("tb", TB), ("gb", GB), ("mb", MB), ("kb", KB)] {
            if bytes % size == 0 {
                return write!(f, "{}{}", bytes / size, unit);
            }
        }
        write!(f, "{}b", bytes)
    }
}
