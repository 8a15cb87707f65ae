use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Local};
use log::info;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{beacon::Color, message::Reading};

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("record keyed {key} holds {record} ({color}), refusing {reading_color} reading")]
    Inconsistency {
        key: Uuid,
        record: Uuid,
        color: Color,
        reading_color: Color,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum Status {
    Online,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DeviceRecord {
    pub identity: Uuid,
    pub color: Color,
    pub latest: Reading,
    /// Oldest first
    pub history: VecDeque<Reading>,
    pub last_seen: DateTime<Local>,
    pub status: Status,
}

impl DeviceRecord {
    fn new(reading: Reading) -> Self {
        let mut history = VecDeque::new();
        history.push_back(reading.clone());
        Self {
            identity: reading.device,
            color: reading.color,
            last_seen: reading.timestamp,
            latest: reading,
            history,
            status: Status::Online,
        }
    }

    fn apply(&mut self, reading: Reading, capacity: usize) {
        while self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back(reading.clone());
        // Arrival order wins for `latest`, a late packet never rewinds `last_seen`.
        self.last_seen = self.last_seen.max(reading.timestamp);
        self.latest = reading;
        self.status = Status::Online;
    }
}

/// Latest reading and bounded history per hydrometer.
///
/// The outer lock only guards membership; every record sits behind its own
/// mutex so writers to different devices do not wait for each other.
pub(crate) struct Store {
    capacity: usize,
    devices: RwLock<HashMap<Uuid, Arc<Mutex<DeviceRecord>>>>,
}

impl Store {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert(&self, reading: Reading) -> Result<(), Error> {
        let existing = self.devices.read().await.get(&reading.device).cloned();
        let record = match existing {
            Some(record) => record,
            None => {
                let mut devices = self.devices.write().await;
                match devices.get(&reading.device) {
                    Some(record) => record.clone(),
                    None => {
                        info!("new hydrometer {} ({})", reading.color, reading.device);
                        let record = DeviceRecord::new(reading.clone());
                        devices.insert(reading.device, Arc::new(Mutex::new(record)));
                        return Ok(());
                    }
                }
            }
        };

        let mut record = record.lock().await;
        if record.identity != reading.device || record.color != reading.color {
            return Err(Error::Inconsistency {
                key: reading.device,
                record: record.identity,
                color: record.color,
                reading_color: reading.color,
            });
        }
        if record.status == Status::Stale {
            info!("hydrometer {} is back online", record.color);
        }
        record.apply(reading, self.capacity);
        Ok(())
    }

    /// Copies of every record, ordered by color name.
    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        let records: Vec<_> = self.devices.read().await.values().cloned().collect();
        let mut snapshot = Vec::with_capacity(records.len());
        for record in records {
            snapshot.push(record.lock().await.clone());
        }
        snapshot.sort_by(|a, b| a.color.name().cmp(b.color.name()));
        snapshot
    }

    /// Flag every device not heard from for longer than `window`.
    ///
    /// Returns the number of devices that went stale in this sweep.
    pub async fn mark_stale(&self, now: DateTime<Local>, window: Duration) -> usize {
        let records: Vec<_> = self.devices.read().await.values().cloned().collect();
        let mut flagged = 0;
        for record in records {
            let mut record = record.lock().await;
            if record.status == Status::Stale {
                continue;
            }
            match (now - record.last_seen).to_std() {
                Ok(elapsed) if elapsed > window => {
                    info!(
                        "hydrometer {} offline, last seen {}s ago",
                        record.color,
                        elapsed.as_secs()
                    );
                    record.status = Status::Stale;
                    flagged += 1;
                }
                _ => {}
            }
        }
        flagged
    }
}
