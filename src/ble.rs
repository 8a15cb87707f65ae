use std::{collections::HashMap, pin::Pin};

use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use chrono::{DateTime, Local};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, error::TrySendError},
    },
    time::sleep,
};

use crate::{config::Config, message::Advertisement, util::Backoff};

/// Legacy advertising PDUs carry at most 31 bytes of advertisement data.
pub(crate) const MAX_PAYLOAD_LEN: usize = 31;

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("cannot find bluetooth adapter")]
    NoAdapter,
    #[error("bluetooth radio unavailable: {0}")]
    RadioUnavailable(#[source] btleplug::Error),
    #[error("scan interrupted: {0}")]
    ScanInterrupted(#[source] btleplug::Error),
    #[error("advertisement stream ended")]
    StreamEnded,
}

#[derive(Debug, PartialEq, Eq)]
enum ScanOutcome {
    Terminated,
    Closed,
}

async fn get_central(manager: &Manager) -> Result<Adapter, Error> {
    let adapters = manager.adapters().await.map_err(Error::RadioUnavailable)?;
    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Split one manufacturer-data event into raw advertisements.
///
/// Each payload is prefixed with its little-endian company identifier, the
/// way it appears on air. Oversized payloads are dropped.
pub(crate) fn advertisements(
    timestamp: DateTime<Local>,
    address: BDAddr,
    rssi: Option<i16>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
) -> Vec<Advertisement> {
    manufacturer_data
        .into_iter()
        .filter_map(|(company, data)| {
            if data.len() + 2 > MAX_PAYLOAD_LEN {
                debug!(
                    "dropping oversized payload from {}: {} bytes",
                    address,
                    data.len() + 2
                );
                return None;
            }
            let mut payload = Vec::with_capacity(data.len() + 2);
            payload.extend_from_slice(&company.to_le_bytes());
            payload.extend_from_slice(&data);
            Some(Advertisement {
                timestamp,
                address,
                rssi,
                payload,
            })
        })
        .collect()
}

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// A radio that cannot start its first scan is unavailable; later failures
/// are interruptions and get retried.
fn start_failure(error: btleplug::Error, scanned_before: bool) -> Error {
    if scanned_before {
        Error::ScanInterrupted(error)
    } else {
        Error::RadioUnavailable(error)
    }
}

/// Owner of the Bluetooth radio.
///
/// Acquired once at startup with the first scan already running; `run`
/// consumes it and stops scanning before the adapter and manager are dropped.
pub(crate) struct Scanner {
    _manager: Manager,
    central: Adapter,
    backoff: Backoff,
    events: Option<EventStream>,
}

impl Scanner {
    pub async fn acquire(config: &Config) -> Result<Self, Error> {
        let manager = Manager::new().await.map_err(Error::RadioUnavailable)?;
        let central = get_central(&manager).await?;
        let adapter_info = central
            .adapter_info()
            .await
            .map_err(Error::RadioUnavailable)?;
        info!("using bluetooth adapter {}", adapter_info);

        let mut scanner = Self {
            _manager: manager,
            central,
            backoff: Backoff::new(config.retry_min, config.retry_max, config.retry_backoff),
            events: None,
        };
        scanner.events = Some(scanner.start(false).await?);
        Ok(scanner)
    }

    async fn start(&self, scanned_before: bool) -> Result<EventStream, Error> {
        let events = self
            .central
            .events()
            .await
            .map_err(|e| start_failure(e, scanned_before))?;
        self.central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| start_failure(e, scanned_before))?;
        info!("scanning for tilt advertisements");
        Ok(events)
    }

    pub async fn run(
        mut self,
        sender: mpsc::Sender<Advertisement>,
        mut termination_receiver: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        loop {
            let events = match self.events.take() {
                Some(events) => Ok(events),
                None => self.start(true).await,
            };
            let outcome = match events {
                Ok(events) => self.scan(events, &sender, &mut termination_receiver).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(ScanOutcome::Terminated) => {
                    debug!("terminate message received");
                    break;
                }
                Ok(ScanOutcome::Closed) => {
                    info!("advertisement queue closed");
                    break;
                }
                Err(e) => {
                    let delay = self.backoff.next_jittered();
                    warn!("{}, restarting scan in {:?}", e, delay);
                    self.central.stop_scan().await.ok();
                    tokio::select! {
                        _ = termination_receiver.recv() => break,
                        _ = sleep(delay) => {},
                    }
                }
            }
        }

        info!("scanning stopping...");
        if let Err(e) = self.central.stop_scan().await {
            warn!("failed to stop scanning: {}", e);
        }
        info!("scanning stopped");
        Ok(())
    }

    async fn scan(
        &mut self,
        mut events: EventStream,
        sender: &mpsc::Sender<Advertisement>,
        termination_receiver: &mut broadcast::Receiver<()>,
    ) -> Result<ScanOutcome, Error> {
        loop {
            let event = tokio::select! {
                _ = termination_receiver.recv() => return Ok(ScanOutcome::Terminated),
                event = events.next() => event.ok_or(Error::StreamEnded)?,
            };
            let (id, manufacturer_data) = match event {
                CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } => (id, manufacturer_data),
                _ => continue,
            };
            let timestamp = Local::now();
            self.backoff.reset();

            let (address, rssi) = self.properties(&id).await;
            for advertisement in advertisements(timestamp, address, rssi, manufacturer_data) {
                match sender.try_send(advertisement) {
                    Ok(()) => {}
                    Err(TrySendError::Full(advertisement)) => {
                        debug!("queue full, dropping advertisement from {}", advertisement.address);
                    }
                    Err(TrySendError::Closed(_)) => return Ok(ScanOutcome::Closed),
                }
            }
        }
    }

    async fn properties(&self, id: &PeripheralId) -> (BDAddr, Option<i16>) {
        let properties = match self.central.peripheral(id).await {
            Ok(peripheral) => peripheral.properties().await.ok().flatten(),
            Err(e) => {
                debug!("peripheral {:?} vanished: {}", id, e);
                None
            }
        };
        properties.map_or((BDAddr::default(), None), |p| (p.address, p.rssi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{self, tests::identity, Color, ColorTable};

    #[test]
    fn payload_carries_company_prefix() {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(identity(1).as_bytes());
        data.extend_from_slice(&[0x00, 0x46, 0x03, 0xFC, 0xC5]);
        let mut manufacturer_data = HashMap::new();
        manufacturer_data.insert(beacon::COMPANY_ID, data);

        let address = BDAddr::from([1, 2, 3, 4, 5, 6]);
        let ads = advertisements(Local::now(), address, Some(-50), manufacturer_data);
        assert_eq!(ads.len(), 1);
        assert_eq!(&ads[0].payload[..4], &[0x4C, 0x00, 0x02, 0x15]);
        assert_eq!(ads[0].address, address);

        let table = ColorTable::new(vec![(identity(1), Color::Red)]).unwrap();
        let reading = beacon::decode(&table, &ads[0]).unwrap();
        assert_eq!(reading.gravity_points, 1020);
        assert_eq!(reading.rssi, Some(-50));
    }

    #[test]
    fn oversized_payload_is_dropped() {
        let mut manufacturer_data = HashMap::new();
        manufacturer_data.insert(beacon::COMPANY_ID, vec![0u8; MAX_PAYLOAD_LEN]);
        manufacturer_data.insert(0x0499, vec![0u8; MAX_PAYLOAD_LEN - 2]);
        let ads = advertisements(Local::now(), BDAddr::default(), None, manufacturer_data);
        assert_eq!(ads.len(), 1);
        assert_eq!(&ads[0].payload[..2], &[0x99, 0x04]);
        assert_eq!(ads[0].payload.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn first_scan_failure_is_fatal() {
        let error = start_failure(btleplug::Error::PermissionDenied, false);
        assert!(matches!(error, Error::RadioUnavailable(_)));
    }

    #[test]
    fn later_scan_failure_is_retried() {
        let error = start_failure(btleplug::Error::PermissionDenied, true);
        assert!(matches!(error, Error::ScanInterrupted(_)));
    }
}
