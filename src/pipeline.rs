use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::{
    beacon::{self, ColorTable, DecodeError},
    message::Advertisement,
    sink::Sink,
    store::{self, Store},
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DecodeStats {
    pub accepted: u64,
    pub truncated: u64,
    pub not_a_beacon: u64,
    pub unknown_identity: u64,
}

impl DecodeStats {
    fn reject(&mut self, error: &DecodeError) {
        match error {
            DecodeError::Truncated(_) => self.truncated += 1,
            DecodeError::NotABeacon => self.not_a_beacon += 1,
            DecodeError::UnknownIdentity(_) => self.unknown_identity += 1,
        }
    }
}

/// Decodes queued advertisements into the store and the historical log.
pub(crate) struct Pipeline {
    table: ColorTable,
    store: Arc<Store>,
    sinks: Vec<Box<dyn Sink>>,
    stats: DecodeStats,
}

impl Pipeline {
    pub fn new(table: ColorTable, store: Arc<Store>, sinks: Vec<Box<dyn Sink>>) -> Self {
        Self {
            table,
            store,
            sinks,
            stats: DecodeStats::default(),
        }
    }

    /// Runs until every sender is gone and the queue is drained.
    pub async fn run(
        mut self,
        mut source: mpsc::Receiver<Advertisement>,
    ) -> Result<DecodeStats, store::Error> {
        while let Some(advertisement) = source.recv().await {
            self.handle(advertisement).await?;
        }
        info!(
            "decoder stopped: {} readings, {} truncated, {} foreign, {} unknown identities",
            self.stats.accepted,
            self.stats.truncated,
            self.stats.not_a_beacon,
            self.stats.unknown_identity
        );
        Ok(self.stats)
    }

    async fn handle(&mut self, advertisement: Advertisement) -> Result<(), store::Error> {
        let reading = match beacon::decode(&self.table, &advertisement) {
            Ok(reading) => reading,
            Err(e) => {
                debug!("ignoring advertisement from {}: {}", advertisement.address, e);
                self.stats.reject(&e);
                return Ok(());
            }
        };
        debug!(
            "{} tilt: {}F, gravity {}",
            reading.color, reading.temperature_f, reading.gravity_points
        );
        self.stats.accepted += 1;
        self.store.upsert(reading.clone()).await?;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.update(&reading).await {
                error!("failed to log reading from {} tilt: {:#}", reading.color, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        beacon::{
            tests::{advertisement, identity, payload},
            Color,
        },
        message::Reading,
    };

    struct Recorder(Arc<Mutex<Vec<Reading>>>);

    #[async_trait]
    impl Sink for Recorder {
        async fn update(&mut self, reading: &Reading) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(reading.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Sink for Broken {
        async fn update(&mut self, _reading: &Reading) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn noisy_stream_only_keeps_beacons() {
        let table =
            ColorTable::new(vec![(identity(1), Color::Red), (identity(40), Color::Green)]).unwrap();
        let store = Arc::new(Store::new(16));
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(Broken), Box::new(Recorder(recorded.clone()))];
        let pipeline = Pipeline::new(table, store.clone(), sinks);

        let (sender, receiver) = mpsc::channel(16);
        let mut foreign = payload(identity(1), 60, 1000);
        foreign[0] = 0x06;
        let inputs = vec![
            payload(identity(1), 70, 1050),
            vec![0x4C, 0x00],
            foreign,
            payload(identity(99), 70, 1050),
            payload(identity(40), 64, 1010),
            payload(identity(1), 71, 1048),
        ];
        for input in inputs {
            sender.send(advertisement(input)).await.unwrap();
        }
        drop(sender);

        let stats = pipeline.run(receiver).await.unwrap();
        assert_eq!(
            stats,
            DecodeStats {
                accepted: 3,
                truncated: 1,
                not_a_beacon: 1,
                unknown_identity: 1,
            }
        );

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].color, Color::Green);
        assert_eq!(snapshot[1].color, Color::Red);
        assert_eq!(snapshot[1].latest.temperature_f, 71);
        assert_eq!(snapshot[1].history.len(), 2);

        let recorded = recorded.lock().unwrap();
        let points: Vec<_> = recorded.iter().map(|r| r.gravity_points).collect();
        assert_eq!(points, vec![1050, 1010, 1048]);
    }

    #[tokio::test]
    async fn closed_queue_ends_cleanly() {
        let pipeline = Pipeline::new(ColorTable::default(), Arc::new(Store::new(4)), Vec::new());
        let (sender, receiver) = mpsc::channel(1);
        drop(sender);
        assert_eq!(pipeline.run(receiver).await.unwrap(), DecodeStats::default());
    }
}
