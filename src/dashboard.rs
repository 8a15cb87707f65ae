//! Live hydrometer dashboard.
//!
//! Every request takes exactly one store snapshot and renders it against one
//! clock reading, so a page never mixes two states of the store.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Local};
use indoc::indoc;
use serde::Serialize;
use tokio::{net::TcpListener, sync::broadcast};
use uuid::Uuid;

use crate::{
    beacon::Color,
    message::Reading,
    store::{DeviceRecord, Status, Store},
};

const PAGE_HEAD: &str = indoc!(
    r#"
    <!DOCTYPE html>
    <html lang="en">
    <head>
        <meta charset="UTF-8">
        <title>Tilt Hydrometer Dashboard</title>
        <meta http-equiv="refresh" content="2">
        <style>
            body { background: #222; color: #fff; font-family: Helvetica, Arial, sans-serif; }
            .tilt-card {
                margin: 20px auto; padding: 30px; border-radius: 20px;
                width: 80%; max-width: 600px; text-align: center;
                box-shadow: 0 4px 24px rgba(0,0,0,0.2);
            }
            .tilt-card.stale { opacity: 0.45; }
            .tilt-title { font-size: 3em; font-weight: bold; margin-bottom: 10px; }
            .tilt-values { font-size: 2em; }
            .tilt-meta { font-size: 1em; margin-top: 10px; }
        </style>
    </head>
    <body>
        <h1 style="text-align:center;">Tilt Hydrometer Dashboard</h1>
    "#
);

const PAGE_EMPTY: &str =
    "    <div style=\"text-align:center; margin-top:40px;\">No Tilt devices found.</div>\n";

const PAGE_TAIL: &str = "</body>\n</html>\n";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct DeviceView {
    pub color: Color,
    pub identity: Uuid,
    /// Radio that delivered the latest reading
    pub address: String,
    pub temperature_f: i32,
    pub temperature_c: f64,
    pub gravity_points: u16,
    pub gravity: f64,
    pub rssi: Option<i16>,
    pub battery_weeks: Option<u8>,
    pub seconds_since_last_seen: i64,
    pub status: Status,
}

impl DeviceView {
    pub fn new(record: &DeviceRecord, now: DateTime<Local>) -> Self {
        let latest = &record.latest;
        Self {
            color: record.color,
            identity: record.identity,
            address: latest.address.to_string(),
            temperature_f: latest.temperature_f,
            temperature_c: (latest.temperature_c() * 10.0).round() / 10.0,
            gravity_points: latest.gravity_points,
            gravity: latest.gravity(),
            rssi: latest.rssi,
            battery_weeks: latest.battery_weeks,
            seconds_since_last_seen: (now - record.last_seen).num_seconds().max(0),
            status: record.status,
        }
    }
}

pub(crate) fn views(snapshot: &[DeviceRecord], now: DateTime<Local>) -> Vec<DeviceView> {
    snapshot.iter().map(|record| DeviceView::new(record, now)).collect()
}

fn card(view: &DeviceView) -> String {
    let (class, status) = match view.status {
        Status::Online => ("tilt-card", "online"),
        Status::Stale => ("tilt-card stale", "offline"),
    };
    let rssi = view
        .rssi
        .map_or_else(|| "n/a".to_string(), |rssi| format!("{} dBm", rssi));
    let battery = view
        .battery_weeks
        .map_or_else(|| "n/a".to_string(), |weeks| format!("{} weeks", weeks));
    format!(
        concat!(
            "    <div class=\"{class}\" style=\"background: {css}; color: #fff;\">\n",
            "        <div class=\"tilt-title\">{color}</div>\n",
            "        <div class=\"tilt-values\">Temp: {temp_f}&deg;F ({temp_c:.1}&deg;C) &nbsp; Gravity: {gravity:.3}</div>\n",
            "        <div class=\"tilt-meta\">{status}, last seen {seen}s ago &middot; RSSI {rssi} &middot; battery {battery}</div>\n",
            "        <div class=\"tilt-meta\">{address}</div>\n",
            "    </div>\n",
        ),
        class = class,
        css = view.color.css(),
        color = view.color,
        temp_f = view.temperature_f,
        temp_c = view.temperature_c,
        gravity = view.gravity,
        status = status,
        seen = view.seconds_since_last_seen,
        rssi = rssi,
        battery = battery,
        address = view.address,
    )
}

pub(crate) fn render(views: &[DeviceView]) -> String {
    let mut page = String::from(PAGE_HEAD);
    if views.is_empty() {
        page.push_str(PAGE_EMPTY);
    }
    for view in views {
        page.push_str(&card(view));
    }
    page.push_str(PAGE_TAIL);
    page
}

async fn index(State(store): State<Arc<Store>>) -> Html<String> {
    let now = Local::now();
    let snapshot = store.snapshot().await;
    Html(render(&views(&snapshot, now)))
}

async fn devices(State(store): State<Arc<Store>>) -> Json<Vec<DeviceView>> {
    let now = Local::now();
    let snapshot = store.snapshot().await;
    Json(views(&snapshot, now))
}

async fn history(
    Path(color): Path<String>,
    State(store): State<Arc<Store>>,
) -> Result<Json<Vec<Reading>>, StatusCode> {
    let color: Color = color.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    store
        .snapshot()
        .await
        .into_iter()
        .find(|record| record.color == color)
        .map(|record| Json(record.history.into_iter().collect()))
        .ok_or(StatusCode::NOT_FOUND)
}

pub(crate) fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/devices", get(devices))
        .route("/api/devices/:color/history", get(history))
        .with_state(store)
}

/// Serve until termination, letting in-flight requests finish.
pub(crate) async fn serve(
    listener: TcpListener,
    store: Arc<Store>,
    mut termination_receiver: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            termination_receiver.recv().await.ok();
        })
        .await
}
