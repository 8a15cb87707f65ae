use async_trait::async_trait;

use super::Sink;
use crate::message::Reading;

pub struct ConsoleSink;

#[async_trait]
impl Sink for ConsoleSink {
    async fn update(&mut self, reading: &Reading) -> anyhow::Result<()> {
        println!(
            "[update] {}: {} tilt reports {}F ({:.1}C), gravity {:.3}, rssi {}",
            reading.timestamp,
            reading.color,
            reading.temperature_f,
            reading.temperature_c(),
            reading.gravity(),
            reading
                .rssi
                .map_or_else(|| "n/a".to_string(), |rssi| format!("{}db", rssi)),
        );
        Ok(())
    }
}
