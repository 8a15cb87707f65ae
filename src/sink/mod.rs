mod console;
mod file;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Reading;

/// Receives every accepted reading, in arrival order.
#[async_trait]
pub(crate) trait Sink: Send + Sync {
    async fn update(&mut self, reading: &Reading) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) enum SinkConfig {
    Console,
    File(file::Config),
}

impl SinkConfig {
    pub async fn into_sink(self) -> anyhow::Result<Box<dyn Sink>> {
        match self {
            SinkConfig::Console => Ok(Box::new(console::ConsoleSink)),
            SinkConfig::File(config) => Ok(Box::new(
                file::FileSink::new(config)
                    .await
                    .context("failed to create file sink")?,
            )),
        }
    }
}
