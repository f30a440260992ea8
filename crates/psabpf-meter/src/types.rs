//! Meter colors and unit domains.

use serde::{Deserialize, Serialize};

/// Result of metering one packet.
///
/// Discriminants follow `PSA_MeterColor_t` as seen by generated programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u32)]
pub enum Color {
    /// Exceeds the peak rate.
    Red = 0,
    /// Conforms to both rates.
    Green = 1,
    /// Exceeds the committed rate only.
    Yellow = 2,
}

impl Color {
    /// Decodes the numeric PSA color.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Red),
            1 => Some(Self::Green),
            2 => Some(Self::Yellow),
            _ => None,
        }
    }

    /// Returns the numeric PSA color.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parses a color string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RED" => Some(Self::Red),
            "GREEN" => Some(Self::Green),
            "YELLOW" => Some(Self::Yellow),
            _ => None,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "RED",
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a meter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeterUnit {
    /// Each packet costs its length in bytes.
    #[default]
    Bytes,
    /// Each packet costs one unit.
    Packets,
}

impl MeterUnit {
    /// Parses a unit string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BYTES" => Some(Self::Bytes),
            "PACKETS" => Some(Self::Packets),
            _ => None,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bytes => "BYTES",
            Self::Packets => "PACKETS",
        }
    }

    /// Converts a packet length into the units this meter debits.
    pub fn size_units(&self, packet_len: u32) -> u64 {
        match self {
            Self::Bytes => u64::from(packet_len),
            Self::Packets => 1,
        }
    }
}
