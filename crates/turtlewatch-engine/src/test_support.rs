use std::io::Read;
use std::net::TcpListener;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use tiny_http::{Response, Server};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) body: String,
    pub(crate) headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// In-process HTTP endpoint that answers every request with a canned reply and
/// hands the request back to the test.
pub(crate) struct StubServer {
    server: Arc<Server>,
    pub(crate) base_url: String,
    requests: mpsc::Receiver<RecordedRequest>,
}

impl StubServer {
    pub(crate) fn start(status: u16, body: &str) -> anyhow::Result<Self> {
        let server = Arc::new(Server::http("127.0.0.1:0").map_err(|err| anyhow!(err))?);
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| anyhow!("stub server has no IP address"))?;
        let (tx, rx) = mpsc::channel();
        let body = body.to_string();
        let worker = Arc::clone(&server);
        thread::spawn(move || {
            while let Ok(mut request) = worker.recv() {
                let mut payload = String::new();
                let _ = request.as_reader().read_to_string(&mut payload);
                let recorded = RecordedRequest {
                    method: request.method().as_str().to_string(),
                    url: request.url().to_string(),
                    body: payload,
                    headers: request
                        .headers()
                        .iter()
                        .map(|header| (header.field.to_string(), header.value.to_string()))
                        .collect(),
                };
                let _ = tx.send(recorded);
                let response = Response::from_string(body.clone()).with_status_code(status);
                let _ = request.respond(response);
            }
        });
        Ok(Self {
            server,
            base_url: format!("http://{addr}"),
            requests: rx,
        })
    }

    pub(crate) fn next_request(&self, timeout: Duration) -> Option<RecordedRequest> {
        self.requests.recv_timeout(timeout).ok()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

/// Base URL of a local port with nothing listening on it.
pub(crate) fn refused_base_url() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}
