//! Tilt hydrometer advertisement decoding.
//!
//! A Tilt broadcasts an iBeacon frame in the manufacturer-specific data field:
//!
//! ```text
//! [4C 00][02 15][identity: 16 bytes][temperature °F: u16 BE][gravity x1000: u16 BE][tx power: 1 byte]
//! ```
//!
//! The identity selects the hydrometer color. The trailing tx power byte is
//! reused by recent firmware as "weeks since battery change".

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Advertisement, Reading};

/// Apple, Inc.
pub(crate) const COMPANY_ID: u16 = 0x004C;
const IBEACON_MARKER: [u8; 2] = [0x02, 0x15];
pub(crate) const MIN_PAYLOAD_LEN: usize = 24;
const MAX_BATTERY_WEEKS: u8 = 152;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum Color {
    Red,
    Green,
    Black,
    Purple,
    Orange,
    Blue,
    Yellow,
    Pink,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Red,
        Color::Green,
        Color::Black,
        Color::Purple,
        Color::Orange,
        Color::Blue,
        Color::Yellow,
        Color::Pink,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Color::Red => "Red",
            Color::Green => "Green",
            Color::Black => "Black",
            Color::Purple => "Purple",
            Color::Orange => "Orange",
            Color::Blue => "Blue",
            Color::Yellow => "Yellow",
            Color::Pink => "Pink",
        }
    }

    /// Card background used by the dashboard.
    pub fn css(self) -> &'static str {
        match self {
            Color::Red => "#FF4B4B",
            Color::Green => "#4BFF4B",
            Color::Black => "#222222",
            Color::Purple => "#A020F0",
            Color::Orange => "#FFA500",
            Color::Blue => "#4B4BFF",
            Color::Yellow => "#FFFF4B",
            Color::Pink => "#FF69B4",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown color `{0}`")]
pub(crate) struct UnknownColor(String);

impl FromStr for Color {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecodeError {
    #[error("payload truncated: {0} bytes")]
    Truncated(usize),
    #[error("not a Tilt advertisement")]
    NotABeacon,
    #[error("unknown beacon identity {0}")]
    UnknownIdentity(Uuid),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum TableError {
    #[error("color {0} is assigned to both {1} and {2}")]
    DuplicateColor(Color, Uuid, Uuid),
}

/// Immutable identity to color mapping, one color per identity and vice versa.
#[derive(Debug, Clone)]
pub(crate) struct ColorTable {
    colors: HashMap<Uuid, Color>,
}

impl ColorTable {
    pub fn new<I: IntoIterator<Item = (Uuid, Color)>>(entries: I) -> Result<Self, TableError> {
        let mut colors = HashMap::new();
        let mut owners: HashMap<Color, Uuid> = HashMap::new();
        for (identity, color) in entries {
            if let Some(owner) = owners.get(&color) {
                if *owner != identity {
                    return Err(TableError::DuplicateColor(color, *owner, identity));
                }
            }
            owners.insert(color, identity);
            colors.insert(identity, color);
        }
        Ok(Self { colors })
    }

    pub fn color(&self, identity: &Uuid) -> Option<Color> {
        self.colors.get(identity).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// The published Tilt identities: A495BBx0-C5B1-4B44-B512-1370F02D74DE.
    pub fn tilt() -> HashMap<Uuid, Color> {
        Color::ALL
            .iter()
            .enumerate()
            .map(|(i, color)| {
                let nibble = (i as u128 + 1) << 100;
                (
                    Uuid::from_u128(0xa495bb00_c5b1_4b44_b512_1370f02d74de | nibble),
                    *color,
                )
            })
            .collect()
    }
}

impl Default for ColorTable {
    fn default() -> Self {
        Self {
            colors: Self::tilt(),
        }
    }
}

/// Decode one advertisement into a reading.
///
/// Pure: the result only depends on the table and the advertisement.
pub(crate) fn decode(
    table: &ColorTable,
    advertisement: &Advertisement,
) -> Result<Reading, DecodeError> {
    let payload = &advertisement.payload;
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::Truncated(payload.len()));
    }
    if payload[0..2] != COMPANY_ID.to_le_bytes() || payload[2..4] != IBEACON_MARKER {
        return Err(DecodeError::NotABeacon);
    }

    let mut identity = [0u8; 16];
    identity.copy_from_slice(&payload[4..20]);
    let device = Uuid::from_bytes(identity);
    let color = table
        .color(&device)
        .ok_or(DecodeError::UnknownIdentity(device))?;

    let temperature_f = u16::from_be_bytes([payload[20], payload[21]]);
    let gravity_points = u16::from_be_bytes([payload[22], payload[23]]);
    let battery_weeks = payload
        .get(24)
        .copied()
        .filter(|weeks| *weeks <= MAX_BATTERY_WEEKS);

    Ok(Reading {
        device,
        color,
        address: advertisement.address,
        timestamp: advertisement.timestamp,
        temperature_f: i32::from(temperature_f),
        gravity_points,
        rssi: advertisement.rssi,
        battery_weeks,
    })
}
