//! Physical units used in link and flow descriptions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error produced when a rate or delay string cannot be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {kind} `{value}`: {reason}")]
pub struct ParseUnitError {
    kind: &'static str,
    value: String,
    reason: &'static str,
}

impl ParseUnitError {
    fn new(kind: &'static str, value: &str, reason: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            reason,
        }
    }
}

/// Raw form of a quantity in configuration files.
#[doc(hidden)]
#[derive(Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(f64),
    String(String),
}

fn split_number(s: &str) -> Option<(f64, &str)> {
    let s = s.trim();
    let pos = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '-' || c == '+'))
        .unwrap_or(s.len());
    // 'e' may also start a unit name, so retry without it on failure
    let (number, unit) = s.split_at(pos);
    match number.parse::<f64>() {
        Ok(value) => Some((value, unit.trim())),
        Err(_) => {
            let pos = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
            let (number, unit) = s.split_at(pos);
            number.parse::<f64>().ok().map(|value| (value, unit.trim()))
        }
    }
}

/// Data rate in bits per second.
///
/// Parsed from a plain number of bits per second or from a string with a unit suffix:
/// `bps`, `kbps`, `Mbps`, `Gbps` (decimal multipliers), e.g. `"10Mbps"`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "NumberOrString", into = "f64")]
pub struct DataRate(f64);

impl DataRate {
    /// Creates a data rate, which must be positive and finite.
    pub fn from_bps(bps: f64) -> Result<Self, ParseUnitError> {
        if !bps.is_finite() || bps <= 0. {
            return Err(ParseUnitError::new("data rate", &bps.to_string(), "must be positive"));
        }
        Ok(Self(bps))
    }

    /// Convenience constructor for megabits per second.
    pub fn mbps(mbps: f64) -> Self {
        Self(mbps * 1e6)
    }

    /// Returns the rate in bits per second.
    pub fn bps(&self) -> f64 {
        self.0
    }

    /// Returns the time needed to transmit `bytes` at this rate, in seconds.
    pub fn transmission_time(&self, bytes: u32) -> f64 {
        bytes as f64 * 8. / self.0
    }
}

impl FromStr for DataRate {
    type Err = ParseUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_number(s).ok_or_else(|| ParseUnitError::new("data rate", s, "no number"))?;
        let multiplier = match unit {
            "" | "bps" | "b/s" => 1.,
            "kbps" | "Kbps" | "kb/s" => 1e3,
            "Mbps" | "mbps" | "Mb/s" => 1e6,
            "Gbps" | "gbps" | "Gb/s" => 1e9,
            _ => return Err(ParseUnitError::new("data rate", s, "unknown unit")),
        };
        Self::from_bps(value * multiplier).map_err(|_| ParseUnitError::new("data rate", s, "must be positive"))
    }
}

impl TryFrom<NumberOrString> for DataRate {
    type Error = ParseUnitError;

    fn try_from(value: NumberOrString) -> Result<Self, Self::Error> {
        match value {
            NumberOrString::Number(bps) => Self::from_bps(bps),
            NumberOrString::String(s) => s.parse(),
        }
    }
}

impl From<DataRate> for f64 {
    fn from(rate: DataRate) -> Self {
        rate.0
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1e9 {
            write!(f, "{}Gbps", self.0 / 1e9)
        } else if self.0 >= 1e6 {
            write!(f, "{}Mbps", self.0 / 1e6)
        } else if self.0 >= 1e3 {
            write!(f, "{}kbps", self.0 / 1e3)
        } else {
            write!(f, "{}bps", self.0)
        }
    }
}

/// Time interval in seconds.
///
/// Parsed from a plain number of seconds or from a string with a unit suffix:
/// `s`, `ms`, `us`, `ns`, e.g. `"20ms"`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "NumberOrString", into = "f64")]
pub struct Delay(f64);

impl Delay {
    /// Creates a delay, which must be non-negative and finite.
    pub fn from_secs(secs: f64) -> Result<Self, ParseUnitError> {
        if !secs.is_finite() || secs < 0. {
            return Err(ParseUnitError::new("delay", &secs.to_string(), "must be non-negative"));
        }
        Ok(Self(secs))
    }

    /// Convenience constructor for milliseconds.
    pub fn ms(ms: f64) -> Self {
        Self(ms / 1e3)
    }

    /// Returns the delay in seconds.
    pub fn secs(&self) -> f64 {
        self.0
    }
}

impl FromStr for Delay {
    type Err = ParseUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_number(s).ok_or_else(|| ParseUnitError::new("delay", s, "no number"))?;
        let divisor = match unit {
            "" | "s" => 1.,
            "ms" => 1e3,
            "us" => 1e6,
            "ns" => 1e9,
            _ => return Err(ParseUnitError::new("delay", s, "unknown unit")),
        };
        Self::from_secs(value / divisor).map_err(|_| ParseUnitError::new("delay", s, "must be non-negative"))
    }
}

impl TryFrom<NumberOrString> for Delay {
    type Error = ParseUnitError;

    fn try_from(value: NumberOrString) -> Result<Self, Self::Error> {
        match value {
            NumberOrString::Number(secs) => Self::from_secs(secs),
            NumberOrString::String(s) => s.parse(),
        }
    }
}

impl From<Delay> for f64 {
    fn from(delay: Delay) -> Self {
        delay.0
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != 0. && self.0 < 1e-3 {
            write!(f, "{}us", self.0 * 1e6)
        } else if self.0 < 1. {
            write!(f, "{}ms", self.0 * 1e3)
        } else {
            write!(f, "{}s", self.0)
        }
    }
}
