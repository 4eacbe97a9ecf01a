//! Shared primitive IDs and ADIF-related enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Monotonic version of the local log, bumped on every successful commit.
pub type LogVersion = u64;

/// Remote QSL/logbook service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// eQSL.cc.
    Eqsl,
    /// ARRL Logbook of The World.
    Lotw,
    /// Club Log.
    Clublog,
    /// QRZ.com logbook.
    Qrz,
}

impl ProviderId {
    /// Every known provider, in stable order.
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Eqsl,
        ProviderId::Lotw,
        ProviderId::Clublog,
        ProviderId::Qrz,
    ];

    /// Stable lowercase id, e.g. `"eqsl"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Eqsl => "eqsl",
            ProviderId::Lotw => "lotw",
            ProviderId::Clublog => "clublog",
            ProviderId::Qrz => "qrz",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eqsl" => Ok(ProviderId::Eqsl),
            "lotw" => Ok(ProviderId::Lotw),
            "clublog" => Ok(ProviderId::Clublog),
            "qrz" => Ok(ProviderId::Qrz),
            other => Err(format!("unknown provider id: {other}")),
        }
    }
}

/// Per-provider confirmation state of a QSO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    /// Not (yet) confirmed by the provider.
    #[default]
    Unconfirmed,
    /// Confirmed by the provider.
    Confirmed,
    /// Conflicting reports; kept for audit.
    Disputed,
}

/// Which directions a sync run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Fetch confirmations only.
    #[default]
    Pull,
    /// Upload local records only.
    Push,
    /// Pull, then push.
    Both,
}

impl SyncMode {
    /// True when the mode fetches from providers.
    pub fn pulls(self) -> bool {
        matches!(self, SyncMode::Pull | SyncMode::Both)
    }

    /// True when the mode uploads to providers.
    pub fn pushes(self) -> bool {
        matches!(self, SyncMode::Push | SyncMode::Both)
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" => Ok(SyncMode::Pull),
            "push" => Ok(SyncMode::Push),
            "both" | "bidirectional" => Ok(SyncMode::Both),
            other => Err(format!("unknown sync mode: {other}")),
        }
    }
}

/// ADIF band enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    /// 2190 meters.
    #[serde(rename = "2190m")]
    B2190m,
    /// 630 meters.
    #[serde(rename = "630m")]
    B630m,
    /// 160 meters.
    #[serde(rename = "160m")]
    B160m,
    /// 80 meters.
    #[serde(rename = "80m")]
    B80m,
    /// 60 meters.
    #[serde(rename = "60m")]
    B60m,
    /// 40 meters.
    #[serde(rename = "40m")]
    B40m,
    /// 30 meters.
    #[serde(rename = "30m")]
    B30m,
    /// 20 meters.
    #[serde(rename = "20m")]
    B20m,
    /// 17 meters.
    #[serde(rename = "17m")]
    B17m,
    /// 15 meters.
    #[serde(rename = "15m")]
    B15m,
    /// 12 meters.
    #[serde(rename = "12m")]
    B12m,
    /// 10 meters.
    #[serde(rename = "10m")]
    B10m,
    /// 6 meters.
    #[serde(rename = "6m")]
    B6m,
    /// 4 meters.
    #[serde(rename = "4m")]
    B4m,
    /// 2 meters.
    #[serde(rename = "2m")]
    B2m,
    /// 1.25 meters.
    #[serde(rename = "1.25m")]
    B1_25m,
    /// 70 centimeters.
    #[serde(rename = "70cm")]
    B70cm,
    /// 33 centimeters.
    #[serde(rename = "33cm")]
    B33cm,
    /// 23 centimeters.
    #[serde(rename = "23cm")]
    B23cm,
}

// (band, lower edge Hz, upper edge Hz), per the ADIF band table.
const BAND_EDGES: [(Band, u64, u64); 19] = [
    (Band::B2190m, 135_700, 137_800),
    (Band::B630m, 472_000, 479_000),
    (Band::B160m, 1_800_000, 2_000_000),
    (Band::B80m, 3_500_000, 4_000_000),
    (Band::B60m, 5_060_000, 5_450_000),
    (Band::B40m, 7_000_000, 7_300_000),
    (Band::B30m, 10_100_000, 10_150_000),
    (Band::B20m, 14_000_000, 14_350_000),
    (Band::B17m, 18_068_000, 18_168_000),
    (Band::B15m, 21_000_000, 21_450_000),
    (Band::B12m, 24_890_000, 24_990_000),
    (Band::B10m, 28_000_000, 29_700_000),
    (Band::B6m, 50_000_000, 54_000_000),
    (Band::B4m, 70_000_000, 71_000_000),
    (Band::B2m, 144_000_000, 148_000_000),
    (Band::B1_25m, 222_000_000, 225_000_000),
    (Band::B70cm, 420_000_000, 450_000_000),
    (Band::B33cm, 902_000_000, 928_000_000),
    (Band::B23cm, 1_240_000_000, 1_300_000_000),
];

impl Band {
    /// ADIF band string, e.g. `"20m"`.
    pub fn as_adif(self) -> &'static str {
        match self {
            Band::B2190m => "2190m",
            Band::B630m => "630m",
            Band::B160m => "160m",
            Band::B80m => "80m",
            Band::B60m => "60m",
            Band::B40m => "40m",
            Band::B30m => "30m",
            Band::B20m => "20m",
            Band::B17m => "17m",
            Band::B15m => "15m",
            Band::B12m => "12m",
            Band::B10m => "10m",
            Band::B6m => "6m",
            Band::B4m => "4m",
            Band::B2m => "2m",
            Band::B1_25m => "1.25m",
            Band::B70cm => "70cm",
            Band::B33cm => "33cm",
            Band::B23cm => "23cm",
        }
    }

    /// Parses an ADIF band string, case-insensitively.
    pub fn from_adif(s: &str) -> Option<Band> {
        let wanted = s.trim().to_ascii_lowercase();
        BAND_EDGES
            .iter()
            .map(|(band, _, _)| *band)
            .find(|band| band.as_adif() == wanted)
    }

    /// Maps a frequency to its band, if it falls inside one.
    pub fn from_freq_hz(freq_hz: u64) -> Option<Band> {
        BAND_EDGES
            .iter()
            .find(|(_, lo, hi)| (*lo..=*hi).contains(&freq_hz))
            .map(|(band, _, _)| *band)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_adif())
    }
}

/// Normalized (upper-case) ADIF mode, e.g. `"FT8"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mode(String);

impl Mode {
    /// Builds a mode, trimming and upper-casing the input.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    /// Normalized mode text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims and upper-cases a callsign.
pub fn normalize_call(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
