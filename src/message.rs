use btleplug::api::BDAddr;
use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::beacon::Color;

/// A raw manufacturer-data advertisement as heard by the radio.
///
/// `payload` starts with the little-endian company identifier.
#[derive(Debug, Clone)]
pub(crate) struct Advertisement {
    pub timestamp: DateTime<Local>,
    pub address: BDAddr,
    pub rssi: Option<i16>,
    pub payload: Vec<u8>,
}

/// One decoded hydrometer measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Reading {
    pub device: Uuid,
    pub color: Color,
    /// Radio that delivered the advertisement
    #[serde(serialize_with = "serialize_address")]
    pub address: BDAddr,
    pub timestamp: DateTime<Local>,
    /// Degrees Fahrenheit
    pub temperature_f: i32,
    /// Specific gravity times 1000
    pub gravity_points: u16,
    pub rssi: Option<i16>,
    /// Weeks since the battery was changed, if the beacon reports it
    pub battery_weeks: Option<u8>,
}

fn serialize_address<S: Serializer>(address: &BDAddr, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(address)
}

impl Reading {
    pub fn temperature_c(&self) -> f64 {
        (f64::from(self.temperature_f) - 32.0) * 5.0 / 9.0
    }

    pub fn gravity(&self) -> f64 {
        f64::from(self.gravity_points) / 1000.0
    }
}
