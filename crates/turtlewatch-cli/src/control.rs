//! HTTP control surface: start the loop, run ad-hoc analyses, report health.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use reqwest::Url;
use serde_json::{json, Value};
use tiny_http::{Header, Request, Response, Server};
use tracing::{error, info, warn};
use turtlewatch_engine::scheduler::SchedulerSupervisor;
use turtlewatch_engine::vision::AnalysisClient;

pub const ROOT_MESSAGE: &str = "Scheduler application is running.";

pub struct ControlState {
    pub supervisor: SchedulerSupervisor,
    pub analysis: Arc<AnalysisClient>,
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl ControlReply {
    fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.to_string(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }
}

/// Maps one request onto a reply without touching the socket.
pub fn route(state: &ControlState, method: &str, url: &str) -> ControlReply {
    let parsed = match Url::parse(&format!("http://localhost{url}")) {
        Ok(parsed) => parsed,
        Err(_) => return ControlReply::error(400, "malformed request target"),
    };
    let known = matches!(
        parsed.path(),
        "/" | "/health" | "/start-scheduler" | "/image-analysis"
    );
    if !known {
        return ControlReply::error(404, "not found");
    }
    if !method.eq_ignore_ascii_case("GET") {
        return ControlReply::error(405, "method not allowed");
    }

    match parsed.path() {
        "/" => ControlReply::text(200, ROOT_MESSAGE),
        "/health" => ControlReply::json(
            200,
            json!({
                "status": "ok",
                "scheduler_running": state.supervisor.is_running(),
            }),
        ),
        "/start-scheduler" => start_scheduler(state),
        _ => image_analysis(state, &parsed),
    }
}

fn start_scheduler(state: &ControlState) -> ControlReply {
    match state.supervisor.start() {
        Ok(status) => {
            info!(status = status.as_str(), "start-scheduler requested");
            ControlReply::json(
                200,
                json!({
                    "status": status.as_str(),
                    "interval_minutes": state.interval_minutes,
                }),
            )
        }
        Err(err) => {
            error!("failed to start scheduler: {err:#}");
            ControlReply::error(500, "scheduler could not be started")
        }
    }
}

fn image_analysis(state: &ControlState, url: &Url) -> ControlReply {
    let image_path = url
        .query_pairs()
        .find(|(key, _)| key == "image_path")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let Some(image_path) = image_path else {
        return ControlReply::error(400, "missing image_path query parameter");
    };
    let record = state.analysis.analyze(Path::new(&image_path));
    match serde_json::to_value(&record) {
        Ok(value) => ControlReply::json(200, value),
        Err(err) => {
            error!("failed to serialize analysis record: {err}");
            ControlReply::error(500, "analysis record could not be encoded")
        }
    }
}

pub fn bind(addr: &str) -> Result<Server> {
    Server::http(addr).map_err(|err| anyhow!("failed to bind control surface on {addr}: {err}"))
}

/// Serves until the server is unblocked; each request gets its own thread.
pub fn serve(state: Arc<ControlState>, server: Server) {
    info!(addr = ?server.server_addr(), "control surface listening");
    for request in server.incoming_requests() {
        let state = Arc::clone(&state);
        let spawned = thread::Builder::new()
            .name("turtlewatch-http".to_string())
            .spawn(move || handle(&state, request));
        if let Err(err) = spawned {
            error!("failed to spawn request handler: {err}");
        }
    }
}

fn handle(state: &ControlState, request: Request) {
    let method = request.method().as_str().to_string();
    let url = request.url().to_string();
    let reply = route(state, &method, &url);
    info!(method = %method, url = %url, status = reply.status, "control request");

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(err) = request.respond(response) {
        warn!("failed to write control response: {err}");
    }
}
