//! HTTP request handlers.

use super::AppState;
use crate::report::ReportSummary;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub interval_secs: f64,
    pub tolerance_secs: f64,
    pub window: usize,
    pub udp_targets: Vec<String>,
    pub http_targets: Vec<String>,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.monitor.config();

    Json(StatusResponse {
        running: state.monitor.is_running(),
        interval_secs: config.interval.as_secs_f64(),
        tolerance_secs: config.tolerance.as_secs_f64(),
        window: config.window,
        udp_targets: config.udp_targets.clone(),
        http_targets: config.http_targets.clone(),
    })
}

pub async fn handle_report(State(state): State<AppState>) -> Json<Option<ReportSummary>> {
    Json(state.monitor.report().map(|r| r.summary()))
}

/// Stream every published report as a `report` event until the monitor stops.
pub async fn handle_report_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .monitor
        .subscribe()
        .map(|report| Event::default().event("report").json_data(report.summary()));

    Sse::new(stream).keep_alive(KeepAlive::default())
}
