//! Device serial numbers: `BI-<year>-<6-digit sequence>`.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use bierp_core::DomainError;

const PREFIX: &str = "BI";

/// Sequence name for the serials of one calendar year.
pub fn serial_sequence_key(year: i32) -> String {
    format!("serial:{year}")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SerialNumber {
    year: i32,
    sequence: u64,
}

impl SerialNumber {
    pub fn new(year: i32, sequence: u64) -> Self {
        Self { year, sequence }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl core::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{PREFIX}-{}-{:06}", self.year, self.sequence)
    }
}

impl FromStr for SerialNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid serial number '{s}'"));
        let mut parts = s.trim().splitn(3, '-');
        if parts.next() != Some(PREFIX) {
            return Err(invalid());
        }
        let year = parts
            .next()
            .and_then(|y| y.parse::<i32>().ok())
            .ok_or_else(invalid)?;
        let digits = parts.next().ok_or_else(invalid)?;
        if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let sequence = digits.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { year, sequence })
    }
}

impl TryFrom<String> for SerialNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SerialNumber> for String {
    fn from(value: SerialNumber) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn renders_zero_padded() {
        assert_eq!(SerialNumber::new(2025, 42).to_string(), "BI-2025-000042");
        assert_eq!(serial_sequence_key(2025), "serial:2025");
    }

    #[test]
    fn rejects_foreign_formats() {
        assert!("XX-2025-000001".parse::<SerialNumber>().is_err());
        assert!("BI-2025-12".parse::<SerialNumber>().is_err());
        assert!("BI-year-000001".parse::<SerialNumber>().is_err());
    }

    #[test]
    fn serde_uses_the_rendered_form() {
        let json = serde_json::to_string(&SerialNumber::new(2024, 7)).unwrap();
        assert_eq!(json, "\"BI-2024-000007\"");
    }

    proptest! {
        #[test]
        fn increasing_sequences_give_increasing_distinct_serials(
            year in 2000i32..2100,
            start in 1u64..999_000,
            n in 1usize..50,
        ) {
            let serials: Vec<SerialNumber> =
                (0..n as u64).map(|i| SerialNumber::new(year, start + i)).collect();
            for pair in serials.windows(2) {
                prop_assert!(pair[0] < pair[1]);
                prop_assert_ne!(pair[0].to_string(), pair[1].to_string());
            }
            for s in &serials {
                prop_assert_eq!(&s.to_string().parse::<SerialNumber>().unwrap(), s);
            }
        }
    }
}
