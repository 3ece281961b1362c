// Channel identifiers and per-slot sample model
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every series the chart can draw: two detector signals and four solvent ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "primary")]
    Primary,
    #[serde(rename = "secondary")]
    Secondary,
    #[serde(rename = "A")]
    RatioA,
    #[serde(rename = "B")]
    RatioB,
    #[serde(rename = "C")]
    RatioC,
    #[serde(rename = "D")]
    RatioD,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Primary,
        Channel::Secondary,
        Channel::RatioA,
        Channel::RatioB,
        Channel::RatioC,
        Channel::RatioD,
    ];

    pub const SIGNALS: [Channel; 2] = [Channel::Primary, Channel::Secondary];

    pub fn key(&self) -> &'static str {
        match self {
            Channel::Primary => "primary",
            Channel::Secondary => "secondary",
            Channel::RatioA => "A",
            Channel::RatioB => "B",
            Channel::RatioC => "C",
            Channel::RatioD => "D",
        }
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, Channel::Primary | Channel::Secondary)
    }

    /// Opacity of the drawn line when the channel is visible.
    pub fn visible_opacity(&self) -> f64 {
        if self.is_signal() { 1.0 } else { 0.8 }
    }

    /// Ratio C and D start hidden; everything else is drawn from the start.
    pub fn visible_by_default(&self) -> bool {
        !matches!(self, Channel::RatioC | Channel::RatioD)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalValues {
    pub primary: Option<f64>,
    pub secondary: Option<f64>,
}

impl SignalValues {
    pub fn new(primary: f64, secondary: f64) -> Self {
        Self {
            primary: Some(primary),
            secondary: Some(secondary),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RatioValues {
    #[serde(rename = "A", alias = "a")]
    pub a: f64,
    #[serde(rename = "B", alias = "b")]
    pub b: f64,
    #[serde(rename = "C", alias = "c")]
    pub c: f64,
    #[serde(rename = "D", alias = "d")]
    pub d: f64,
}

impl RatioValues {
    pub fn iter(&self) -> impl Iterator<Item = f64> {
        [self.a, self.b, self.c, self.d].into_iter()
    }
}

/// One time slot of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Minutes since run start, always `slot * resolution`.
    pub time: f64,
    pub signal_channels: SignalValues,
    pub ratio_channels: RatioValues,
}

impl Sample {
    pub fn value(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Primary => self.signal_channels.primary,
            Channel::Secondary => self.signal_channels.secondary,
            Channel::RatioA => Some(self.ratio_channels.a),
            Channel::RatioB => Some(self.ratio_channels.b),
            Channel::RatioC => Some(self.ratio_channels.c),
            Channel::RatioD => Some(self.ratio_channels.d),
        }
    }
}
