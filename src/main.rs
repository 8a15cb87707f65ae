mod beacon;
mod ble;
mod config;
mod dashboard;
mod message;
mod monitor;
mod pipeline;
mod sink;
mod store;
mod util;
use crate::config::Config;
use crate::util::AttachContext;

use std::{
    fs::File,
    io::{BufReader, ErrorKind},
    sync::Arc,
};

use anyhow::Context;
use clap::{App, Arg};
use env_logger::Env;
use futures::future::try_join4;
use indoc::indoc;
use log::{info, warn};
use tokio::{
    net::TcpListener,
    sync::{self, mpsc},
    time::{sleep, Duration, Instant},
};

const DEFAULT_CONFIG: &str = "config.yaml";

fn load_config(path: &str, explicit: bool) -> anyhow::Result<Config> {
    match File::open(path) {
        Ok(file) => serde_yaml::from_reader(BufReader::new(file))
            .attach_with_context(|| format!("failed to parse config file {}", path)),
        Err(e) if e.kind() == ErrorKind::NotFound && !explicit => {
            info!("config file {} not found, using defaults", path);
            Ok(Config::default())
        }
        Err(e) => Err(e).attach_with_context(|| format!("failed to open file {}", path)),
    }
}

fn override_listen(config: &mut Config, listen: Option<&str>) -> anyhow::Result<()> {
    if let Some(listen) = listen {
        config.listen = listen
            .parse()
            .attach_with_context(|| format!("invalid listen address {}", listen))?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cmd = App::new("tilt-monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Monitor Tilt hydrometers over Bluetooth Low Energy")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .help("Sets custom config file location")
                .long_help(indoc!(
                    "Sets custom config file location, default to read config.yaml
                    The custom config must be a file of YAML 1.2 format.
                    The following configuration keys are supported:
                    listen: optional, default 0.0.0.0:1234, dashboard address
                    stale_window: optional, default 60s, silence before a tilt is offline
                    sweep_period: optional, default 5s, staleness check interval
                    history_capacity: optional, default 720, readings kept per tilt
                    queue_size: optional, default 64, buffered advertisements
                    retry_min, retry_max, retry_backoff: optional, scan restart backoff
                    beacons: optional, map of beacon UUID to color
                    sinks: optional, list of Console or File: {path: ...}
                    "
                ))
                .value_name("FILE")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .help("Overrides the dashboard listen address")
                .value_name("ADDR")
                .takes_value(true),
        )
        .get_matches();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config_path = cmd.value_of("config");
    info!(
        "open and parse config file {}",
        config_path.unwrap_or(DEFAULT_CONFIG)
    );
    let mut config = load_config(
        config_path.unwrap_or(DEFAULT_CONFIG),
        config_path.is_some(),
    )?;
    override_listen(&mut config, cmd.value_of("listen"))?;
    config.validate()?;
    let table = config
        .color_table()
        .attach_context("invalid beacon table")?;
    info!("tracking {} beacon identities", table.len());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .attach_context("failed to start async runtime")?;

    let scanner = runtime
        .block_on(ble::Scanner::acquire(&config))
        .attach_context("bluetooth is not available")?;
    let listener = runtime
        .block_on(TcpListener::bind(config.listen))
        .attach_with_context(|| format!("failed to bind dashboard to {}", config.listen))?;
    info!("dashboard listening on http://{}", config.listen);
    let sinks = runtime.block_on(async {
        let mut sinks = Vec::with_capacity(config.sinks.len());
        for sink in config.sinks.iter().cloned() {
            sinks.push(sink.into_sink().await?);
        }
        anyhow::Ok(sinks)
    })?;

    let (termination_sender, mut termination_receiver) = sync::broadcast::channel(1);
    let (advertisement_sender, advertisement_receiver) = mpsc::channel(config.queue_size);
    let store = Arc::new(store::Store::new(config.history_capacity));

    let source_handle = scanner.run(advertisement_sender, termination_sender.subscribe());
    let pipeline_handle =
        pipeline::Pipeline::new(table, store.clone(), sinks).run(advertisement_receiver);
    let monitor_handle = monitor::watch(
        store.clone(),
        config.sweep_period,
        config.stale_window,
        termination_sender.subscribe(),
    );
    let dashboard_handle = dashboard::serve(listener, store, termination_sender.subscribe());
    let task_handle = try_join4(
        async { source_handle.await.context("advertisement source failed") },
        async {
            pipeline_handle
                .await
                .map(|_| ())
                .context("decode pipeline failed")
        },
        async {
            monitor_handle.await;
            anyhow::Ok(())
        },
        async { dashboard_handle.await.context("dashboard failed") },
    );
    ctrlc::set_handler(move || {
        info!("signal received, terminating...");
        let _ = termination_sender.send(());
    })
    .attach_context("failed to set up signal handlers")?;

    let result = runtime.block_on(async move {
        let deadline = sleep(Duration::from_secs(5));
        let mut terminated = false;
        tokio::pin!(deadline);
        tokio::pin!(task_handle);
        loop {
            tokio::select! {
                _ = termination_receiver.recv(), if !terminated => {
                    terminated = true;
                    deadline.as_mut().reset(Instant::now() + Duration::from_secs(5));
                },
                _ = &mut deadline, if terminated => {
                    warn!("tasks didn't terminate in time, force exit in 1s");
                    return Ok(());
                },
                r = &mut task_handle => {
                    return r.map(|_| ());
                },
            }
        }
    });
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
