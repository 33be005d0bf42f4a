// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Memory size units for configuration values such as `"512 MiB"`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeUnitError {
    #[error("Illegal memory size unit {0:?}")]
    UnknownUnit(String),
    #[error("Invalid size value {0:?}")]
    InvalidValue(String),
    #[error("Size value {0:?} does not fit in 64 bits")]
    Overflow(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SizeUnit {
    Bytes,
    KiloBytes,
    KibiBytes,
    MegaBytes,
    MebiBytes,
    GigaBytes,
    GibiBytes,
    TeraBytes,
    TebiBytes,
}

const NON_BINARY: [SizeUnit; 4] = [
    SizeUnit::TeraBytes,
    SizeUnit::GigaBytes,
    SizeUnit::MegaBytes,
    SizeUnit::KiloBytes,
];

const BINARY: [SizeUnit; 4] = [
    SizeUnit::TebiBytes,
    SizeUnit::GibiBytes,
    SizeUnit::MebiBytes,
    SizeUnit::KibiBytes,
];

impl SizeUnit {
    pub fn size(self) -> u64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::KiloBytes => 1000,
            SizeUnit::KibiBytes => 1024,
            SizeUnit::MegaBytes => 1000 * 1000,
            SizeUnit::MebiBytes => 1024 * 1024,
            SizeUnit::GigaBytes => 1000 * 1000 * 1000,
            SizeUnit::GibiBytes => 1024 * 1024 * 1024,
            SizeUnit::TeraBytes => 1000 * 1000 * 1000 * 1000,
            SizeUnit::TebiBytes => 1024 * 1024 * 1024 * 1024,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            SizeUnit::Bytes => "b",
            SizeUnit::KiloBytes => "kb",
            SizeUnit::KibiBytes => "kib",
            SizeUnit::MegaBytes => "mb",
            SizeUnit::MebiBytes => "mib",
            SizeUnit::GigaBytes => "gb",
            SizeUnit::GibiBytes => "gib",
            SizeUnit::TeraBytes => "tb",
            SizeUnit::TebiBytes => "tib",
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            SizeUnit::Bytes => "bytes",
            SizeUnit::KiloBytes => "kilobytes",
            SizeUnit::KibiBytes => "kibibytes",
            SizeUnit::MegaBytes => "megabytes",
            SizeUnit::MebiBytes => "mebibytes",
            SizeUnit::GigaBytes => "gigabytes",
            SizeUnit::GibiBytes => "gibibytes",
            SizeUnit::TeraBytes => "terabytes",
            SizeUnit::TebiBytes => "tebibytes",
        }
    }

    pub fn to_bytes(self, amount: f64) -> Result<u64, SizeUnitError> {
        let value = self.size() as f64 * amount;
        if !value.is_finite() || value < 0.0 || value >= u64::MAX as f64 {
            return Err(SizeUnitError::Overflow(format!("{amount} {self}")));
        }
        Ok(value as u64)
    }

    pub fn from_bytes(self, amount: u64) -> f64 {
        amount as f64 / self.size() as f64
    }

    /// Largest unit that expresses `bytes` nicely. Decimal units are
    /// preferred unless the binary unit of the same magnitude divides exactly.
    pub fn best_fit(bytes: u64) -> SizeUnit {
        if bytes == 0 {
            return SizeUnit::Bytes;
        }
        for (binary, decimal) in BINARY.iter().zip(NON_BINARY.iter()) {
            if bytes % binary.size() == 0 {
                return *binary;
            } else if bytes / decimal.size() > 0 {
                return *decimal;
            }
        }
        SizeUnit::Bytes
    }

    /// Largest unit that divides `bytes` with no remainder.
    pub fn best_fit_exact(bytes: u64) -> SizeUnit {
        if bytes == 0 {
            return SizeUnit::Bytes;
        }
        let ordered = [
            SizeUnit::TebiBytes,
            SizeUnit::TeraBytes,
            SizeUnit::GibiBytes,
            SizeUnit::GigaBytes,
            SizeUnit::MebiBytes,
            SizeUnit::MegaBytes,
            SizeUnit::KibiBytes,
            SizeUnit::KiloBytes,
        ];
        ordered
            .into_iter()
            .find(|unit| bytes % unit.size() == 0)
            .unwrap_or(SizeUnit::Bytes)
    }

    /// Parses `"<number> [unit]"`. Without a unit, `default_unit` applies;
    /// if there is none the value is rejected.
    pub fn parse_value(input: &str, default_unit: Option<SizeUnit>) -> Result<u64, SizeUnitError> {
        let invalid = || SizeUnitError::InvalidValue(input.to_string());
        let trimmed = input.trim();

        let number_end = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, rest) = trimmed.split_at(number_end);
        let well_formed = match number.split_once('.') {
            Some((int, frac)) => !int.is_empty() && !frac.is_empty() && !frac.contains('.'),
            None => !number.is_empty(),
        };
        if !well_formed {
            return Err(invalid());
        }
        let amount: f64 = number.parse().map_err(|_| invalid())?;

        let unit_text = rest.trim();
        let unit = if unit_text.is_empty() {
            default_unit.ok_or_else(invalid)?
        } else {
            if !unit_text.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(invalid());
            }
            unit_text.parse::<SizeUnit>().map_err(|_| invalid())?
        };

        unit.to_bytes(amount)
    }
}

impl FromStr for SizeUnit {
    type Err = SizeUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit = match s.trim().to_lowercase().as_str() {
            "b" | "bytes" => SizeUnit::Bytes,
            "kb" | "kilobytes" => SizeUnit::KiloBytes,
            "kib" | "kibibytes" => SizeUnit::KibiBytes,
            "mb" | "megabytes" => SizeUnit::MegaBytes,
            "mib" | "mebibytes" => SizeUnit::MebiBytes,
            "gb" | "gigabytes" => SizeUnit::GigaBytes,
            "gib" | "gibibytes" => SizeUnit::GibiBytes,
            "tb" | "terabytes" => SizeUnit::TeraBytes,
            "tib" | "tebibytes" => SizeUnit::TebiBytes,
            _ => return Err(SizeUnitError::UnknownUnit(s.to_string())),
        };
        Ok(unit)
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A byte count that deserializes from either an integer or a string with a
/// unit (`"1 GiB"`, `"512mb"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = SizeUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SizeUnit::parse_value(s, Some(SizeUnit::Bytes)).map(ByteSize)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = SizeUnit::best_fit_exact(self.0);
        write!(f, "{} {}", self.0 / unit.size(), unit)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl<'de> de::Visitor<'de> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count or a string such as \"256 MiB\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ByteSize, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom("negative byte count"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteSize, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_units() {
        assert_eq!(SizeUnit::parse_value("1 GiB", None).unwrap(), 1 << 30);
        assert_eq!(SizeUnit::parse_value("  512mb ", None).unwrap(), 512_000_000);
        assert_eq!(SizeUnit::parse_value("1.5 kib", None).unwrap(), 1536);
        assert_eq!(SizeUnit::parse_value("2 Kilobytes", None).unwrap(), 2000);
    }

    #[test]
    fn test_default_unit() {
        assert_eq!(SizeUnit::parse_value("42", Some(SizeUnit::Bytes)).unwrap(), 42);
        assert!(SizeUnit::parse_value("42", None).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", "mb", "1.", ".5 mb", "1..2 mb", "1 parsecs", "-1 mb", "1 m-b"] {
            assert!(SizeUnit::parse_value(bad, Some(SizeUnit::Bytes)).is_err(), "{bad}");
        }
        assert!(SizeUnit::parse_value("100000 tib", None).is_err());
    }

    #[test]
    fn test_best_fit() {
        assert_eq!(SizeUnit::best_fit(0), SizeUnit::Bytes);
        assert_eq!(SizeUnit::best_fit(1024 * 1024), SizeUnit::MebiBytes);
        assert_eq!(SizeUnit::best_fit(1_500_000), SizeUnit::MegaBytes);
        assert_eq!(SizeUnit::best_fit(999), SizeUnit::Bytes);
        assert_eq!(SizeUnit::best_fit_exact(3_000_000), SizeUnit::MegaBytes);
        assert_eq!(SizeUnit::best_fit_exact(1001), SizeUnit::Bytes);
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(ByteSize(256 * 1024 * 1024).to_string(), "256 mib");
        assert_eq!("1 GiB".parse::<ByteSize>().unwrap(), ByteSize(1 << 30));
    }
}
