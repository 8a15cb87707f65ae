use std::{collections::HashMap, net::SocketAddr, time::Duration};

use anyhow::ensure;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    beacon::{Color, ColorTable, TableError},
    sink::SinkConfig,
};

#[inline]
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1234))
}
#[inline]
fn default_stale_window() -> Duration {
    Duration::from_secs(60)
}
#[inline]
fn default_sweep_period() -> Duration {
    Duration::from_secs(5)
}
#[inline]
fn default_history_capacity() -> usize {
    720
}
#[inline]
fn default_queue_size() -> usize {
    64
}
#[inline]
fn default_retry_min() -> Duration {
    Duration::from_secs(1)
}
#[inline]
fn default_retry_max() -> Duration {
    Duration::from_secs(60)
}
#[inline]
fn default_retry_backoff() -> u16 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct Config {
    // Dashboard bind address
    // optional, default: 0.0.0.0:1234
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    // A hydrometer silent for longer than this is flagged stale
    // optional, default: 60s
    #[serde(with = "humantime_serde", default = "default_stale_window")]
    pub stale_window: Duration,
    // Interval between staleness sweeps
    // optional, default: 5s
    #[serde(with = "humantime_serde", default = "default_sweep_period")]
    pub sweep_period: Duration,
    // Readings kept per hydrometer
    // optional, default: 720
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    // Advertisements buffered between the radio and the decoder
    // optional, default: 64
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    // Smallest delay before restarting an interrupted scan
    // optional, default: 1s
    #[serde(with = "humantime_serde", default = "default_retry_min")]
    pub retry_min: Duration,
    // Largest delay before restarting an interrupted scan
    // optional, default: 60s
    #[serde(with = "humantime_serde", default = "default_retry_max")]
    pub retry_max: Duration,
    // Number of restarts before hitting the largest delay
    // The backoff multiplier will be automatically calculated
    // optional, default: 10
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: u16,
    // Beacon identity to color table, replaces the Tilt table when given
    #[serde(default = "ColorTable::tilt")]
    pub beacons: HashMap<Uuid, Color>,
    // Historical log writers
    // optional, default: none
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.history_capacity > 0, "history_capacity must be at least 1");
        ensure!(self.queue_size > 0, "queue_size must be at least 1");
        ensure!(!self.sweep_period.is_zero(), "sweep_period must not be zero");
        ensure!(
            self.retry_min <= self.retry_max,
            "retry_min must not exceed retry_max"
        );
        Ok(())
    }

    pub fn color_table(&self) -> Result<ColorTable, TableError> {
        ColorTable::new(self.beacons.iter().map(|(identity, color)| (*identity, *color)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            stale_window: default_stale_window(),
            sweep_period: default_sweep_period(),
            history_capacity: default_history_capacity(),
            queue_size: default_queue_size(),
            retry_min: default_retry_min(),
            retry_max: default_retry_max(),
            retry_backoff: default_retry_backoff(),
            beacons: ColorTable::tilt(),
            sinks: Vec::new(),
        }
    }
}
