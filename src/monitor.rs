use std::{sync::Arc, time::Duration};

use chrono::Local;
use log::debug;
use tokio::{
    sync::broadcast,
    time::{interval, MissedTickBehavior},
};

use crate::store::Store;

/// Sweeps the store every `period`, flagging devices silent for over `window`.
pub(crate) async fn watch(
    store: Arc<Store>,
    period: Duration,
    window: Duration,
    mut termination_receiver: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = termination_receiver.recv() => break,
            _ = ticker.tick() => {
                let flagged = store.mark_stale(Local::now(), window).await;
                if flagged > 0 {
                    debug!("{} hydrometer(s) went stale", flagged);
                }
            }
        }
    }
    debug!("staleness monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{beacon::Color, beacon::tests::identity, message::Reading, store::Status};
    use btleplug::api::BDAddr;

    fn reading(seed: u8, color: Color, age: chrono::Duration) -> Reading {
        Reading {
            device: identity(seed),
            color,
            address: BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            timestamp: Local::now() - age,
            temperature_f: 66,
            gravity_points: 1012,
            rssi: None,
            battery_weeks: Some(3),
        }
    }

    #[tokio::test]
    async fn sweeps_until_terminated() {
        let store = Arc::new(Store::new(8));
        store
            .upsert(reading(1, Color::Red, chrono::Duration::minutes(10)))
            .await
            .unwrap();
        store
            .upsert(reading(2, Color::Pink, chrono::Duration::seconds(1)))
            .await
            .unwrap();

        let (termination_sender, termination_receiver) = broadcast::channel(1);
        let task = tokio::spawn(watch(
            store.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
            termination_receiver,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        termination_sender.send(()).unwrap();
        task.await.unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot[0].color, Color::Pink);
        assert_eq!(snapshot[0].status, Status::Online);
        assert_eq!(snapshot[1].color, Color::Red);
        assert_eq!(snapshot[1].status, Status::Stale);
        assert_eq!(snapshot[1].latest.battery_weeks, Some(3));
    }
}
