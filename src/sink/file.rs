use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

use super::Sink;
use crate::message::Reading;

const HEADER: &str = "timestamp,color,identity,temperature_f,gravity_points\n";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    path: String,
}

/// Append-only log of readings, one comma-delimited row each.
pub struct FileSink {
    path: String,
    file: File,
}

impl FileSink {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .await
            .with_context(|| format!("failed to open file {}", config.path))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("failed to stat file {}", config.path))?
            .len();
        if len == 0 {
            file.write_all(HEADER.as_bytes())
                .await
                .with_context(|| format!("failed to write header to {}", config.path))?;
            file.flush()
                .await
                .with_context(|| format!("failed to flush file {}", config.path))?;
        }
        Ok(Self {
            file,
            path: config.path,
        })
    }
}

fn row(reading: &Reading) -> String {
    format!(
        "{},{},{},{},{}\n",
        reading.timestamp.to_rfc3339(),
        reading.color,
        reading.device.hyphenated(),
        reading.temperature_f,
        reading.gravity_points
    )
}

#[async_trait]
impl Sink for FileSink {
    async fn update(&mut self, reading: &Reading) -> anyhow::Result<()> {
        self.file
            .write_all(row(reading).as_bytes())
            .await
            .with_context(|| format!("failed to append to file {}", self.path))?;
        self.file
            .flush()
            .await
            .with_context(|| format!("failed to flush file {}", self.path))?;
        Ok(())
    }
}
