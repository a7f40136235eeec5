use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Sample encodings a codec may place in the interleaved buffer.
///
/// Discriminants match the tags carried in the wire channel descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleFormat {
    #[serde(rename = "int24-lj")]
    Int24LeftJustified = 1,
    #[serde(rename = "int24-i2s")]
    Int24I2s = 2,
    #[serde(rename = "int24-rj")]
    Int24RightJustified = 3,
    #[serde(rename = "int24-32rj")]
    Int24In32RightJustified = 4,
    #[serde(rename = "int32")]
    Int32 = 5,
    #[serde(rename = "binary")]
    Binary = 6,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 6] = [
        SampleFormat::Int24LeftJustified,
        SampleFormat::Int24I2s,
        SampleFormat::Int24RightJustified,
        SampleFormat::Int24In32RightJustified,
        SampleFormat::Int32,
        SampleFormat::Binary,
    ];

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Every format travels in one 32-bit word per sample.
    #[inline]
    pub const fn bytes_per_sample(self) -> usize {
        4
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::Int24LeftJustified => "int24-lj",
            SampleFormat::Int24I2s => "int24-i2s",
            SampleFormat::Int24RightJustified => "int24-rj",
            SampleFormat::Int24In32RightJustified => "int24-32rj",
            SampleFormat::Int32 => "int32",
            SampleFormat::Binary => "binary",
        }
    }
}

impl TryFrom<u8> for SampleFormat {
    type Error = SessionError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        SampleFormat::ALL
            .into_iter()
            .find(|format| format.tag() == tag)
            .ok_or_else(|| SessionError::invalid(format!("unknown sample format tag {tag}")))
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stream direction as seen from the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Direction {
    Input = 0,
    Output = 1,
}

impl Direction {
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Prefix used for channel labels.
    pub fn label_prefix(self) -> &'static str {
        match self {
            Direction::Input => "IN",
            Direction::Output => "OUT",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = SessionError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Direction::Input),
            1 => Ok(Direction::Output),
            other => Err(SessionError::invalid(format!(
                "unsupported direction tag {other}"
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tags_round_trip() {
        for format in SampleFormat::ALL {
            assert_eq!(SampleFormat::try_from(format.tag()).unwrap(), format);
        }
        assert!(SampleFormat::try_from(0).is_err());
        assert!(SampleFormat::try_from(7).is_err());
    }

    #[test]
    fn unknown_direction_is_invalid_request() {
        assert_eq!(Direction::try_from(1).unwrap(), Direction::Output);
        let err = Direction::try_from(2).unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
    }

    #[test]
    fn serde_names_match_display() {
        for format in SampleFormat::ALL {
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{format}\""));
        }
        let direction: Direction = serde_json::from_str("\"output\"").unwrap();
        assert_eq!(direction, Direction::Output);
    }
}
