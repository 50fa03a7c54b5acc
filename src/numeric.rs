//! The two element widths the bridge understands.

use std::fmt;
use std::str::FromStr;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::error::{KMeansError, Result};

/// Element width of a flat buffer crossing the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NumericWidth {
    /// IEEE-754 single precision, 4 bytes per element.
    #[serde(rename = "f32", alias = "float32", alias = "single")]
    F32,
    /// IEEE-754 double precision, 8 bytes per element.
    #[default]
    #[serde(rename = "f64", alias = "float64", alias = "double")]
    F64,
}

impl NumericWidth {
    /// Bytes occupied by one element.
    pub const fn bytes(self) -> usize {
        match self {
            NumericWidth::F32 => 4,
            NumericWidth::F64 => 8,
        }
    }

    /// Resolve a width from its size in bytes.
    pub fn from_bytes(bytes: usize) -> Result<Self> {
        match bytes {
            4 => Ok(NumericWidth::F32),
            8 => Ok(NumericWidth::F64),
            other => Err(KMeansError::UnsupportedType(format!(
                "{other}-byte elements; only 4-byte (f32) and 8-byte (f64) floats are accepted"
            ))),
        }
    }
}

impl fmt::Display for NumericWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericWidth::F32 => write!(f, "f32"),
            NumericWidth::F64 => write!(f, "f64"),
        }
    }
}

impl FromStr for NumericWidth {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "f32" | "float32" | "single" => Ok(Self::F32),
            "f64" | "float64" | "double" => Ok(Self::F64),
            other => Err(KMeansError::UnsupportedType(format!(
                "'{other}'; expected f32 or f64"
            ))),
        }
    }
}

/// Scalar types that may live in the arena and be read by the engine.
pub trait Element: Pod + Copy + Send + Sync + Into<f64> + 'static {
    const WIDTH: NumericWidth;

    fn from_f64(value: f64) -> Self;

    #[inline]
    fn to_f64(self) -> f64 {
        self.into()
    }
}

impl Element for f32 {
    const WIDTH: NumericWidth = NumericWidth::F32;

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Element for f64 {
    const WIDTH: NumericWidth = NumericWidth::F64;

    fn from_f64(value: f64) -> Self {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_parsing_accepts_aliases() {
        assert_eq!("Float32".parse::<NumericWidth>().unwrap(), NumericWidth::F32);
        assert_eq!(" double ".parse::<NumericWidth>().unwrap(), NumericWidth::F64);
        assert_eq!(NumericWidth::from_bytes(4).unwrap(), NumericWidth::F32);
    }

    #[test]
    fn unknown_widths_are_unsupported() {
        let err = "int16".parse::<NumericWidth>().unwrap_err();
        assert!(matches!(err, KMeansError::UnsupportedType(_)));
        let err = NumericWidth::from_bytes(2).unwrap_err();
        assert!(matches!(err, KMeansError::UnsupportedType(_)));
    }

    #[test]
    fn serde_uses_short_names() {
        let json = serde_json::to_string(&NumericWidth::F32).unwrap();
        assert_eq!(json, "\"f32\"");
        let parsed: NumericWidth = serde_json::from_str("\"double\"").unwrap();
        assert_eq!(parsed, NumericWidth::F64);
    }
}
