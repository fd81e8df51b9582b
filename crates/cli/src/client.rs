//! HTTP-over-Unix-socket client for the daemon's verb protocol.

use anyhow::{Context, Result};
use bytes::Bytes;
use dcd_core::progress::ProgressReport;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, header};
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// How often a running operation is polled for progress.
const POLL_INTERVAL: Duration = Duration::from_millis(300);

pub struct Client {
    socket: PathBuf,
    path: String,
    progress: bool,
}

impl Client {
    pub fn new(socket: PathBuf, path: String, progress: bool) -> Self {
        Self {
            socket,
            path,
            progress,
        }
    }

    /// Dial the socket and issue a single request. Each request uses its
    /// own connection, mirroring the short-lived client lifecycle.
    async fn send(&self, method: &str, query: &str) -> Result<Response<Incoming>> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .with_context(|| format!("cannot connect to {}", self.socket.display()))?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .context("handshake failed")?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "connection closed");
            }
        });

        let uri = if query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, query)
        };
        tracing::debug!(method, uri = %uri, "request");

        let req = Request::builder()
            .method(Method::from_bytes(method.as_bytes())?)
            .uri(uri)
            .header(header::HOST, "local-socket")
            .body(Empty::<Bytes>::new())?;
        Ok(sender.send_request(req).await?)
    }

    /// Stream the archive to the writer.
    pub async fn get(&self, out: &mut (impl tokio::io::AsyncWrite + Unpin)) -> Result<()> {
        let monitor = self.start_monitor();
        let query = monitor
            .as_ref()
            .map(|m| format!("progress={}", m.id))
            .unwrap_or_default();

        let mut resp = self.send("GET", &query).await?;
        if resp.status() != 200 {
            return Err(response_error(resp).await);
        }

        while let Some(frame) = resp.body_mut().frame().await {
            let frame = frame.context("cannot read archive stream")?;
            if let Some(data) = frame.data_ref() {
                out.write_all(data).await?;
            }
        }
        out.flush().await?;
        Ok(())
    }

    pub async fn edit(&self, force: bool) -> Result<()> {
        self.mutate("EDIT", force).await
    }

    pub async fn commit(&self, force: bool) -> Result<()> {
        self.mutate("COMMIT", force).await
    }

    pub async fn update(&self, force: bool) -> Result<()> {
        self.mutate("UPDATE", force).await
    }

    async fn mutate(&self, method: &str, force: bool) -> Result<()> {
        let monitor = self.start_monitor();
        let mut params = Vec::new();
        if let Some(m) = &monitor {
            params.push(format!("progress={}", m.id));
        }
        if force {
            params.push("force=true".to_string());
        }

        let resp = self.send(method, &params.join("&")).await?;
        if resp.status() != 200 {
            return Err(response_error(resp).await);
        }

        if let Some(monitor) = monitor {
            monitor.finish(resp).await?;
        }
        Ok(())
    }

    fn start_monitor(&self) -> Option<ProgressMonitor> {
        if !self.progress {
            return None;
        }
        let id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos()
            .to_string();

        let poller = Client {
            socket: self.socket.clone(),
            path: self.path.clone(),
            progress: false,
        };
        let poll_id = id.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                if let Ok(report) = poller.fetch_progress(&poll_id).await {
                    report_progress(&report, false);
                }
            }
        });
        Some(ProgressMonitor { id, task })
    }

    async fn fetch_progress(&self, id: &str) -> Result<ProgressReport> {
        let resp = self.send("PROGRESS", &format!("progress={id}")).await?;
        if resp.status() != 200 {
            return Err(response_error(resp).await);
        }
        let body = resp.into_body().collect().await?.to_bytes();
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Background poller for one running operation.
struct ProgressMonitor {
    id: String,
    task: tokio::task::JoinHandle<()>,
}

impl ProgressMonitor {
    /// Stop polling and report the final snapshot from the response body.
    async fn finish(self, resp: Response<Incoming>) -> Result<()> {
        self.task.abort();
        let body = resp.into_body().collect().await?.to_bytes();
        let report: ProgressReport =
            serde_json::from_slice(&body).context("malformed progress report")?;
        report_progress(&report, true);
        Ok(())
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn report_progress(report: &ProgressReport, done: bool) {
    if done {
        eprintln!("\r{} / {}", report.progress, report.total);
    } else {
        eprint!("\r{} / {}", report.progress, report.total);
    }
}

/// Decode the daemon's JSON error body; anything else is opaque.
async fn response_error(resp: Response<Incoming>) -> anyhow::Error {
    let is_json = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !is_json {
        return anyhow::anyhow!("unknown error");
    }
    match resp.into_body().collect().await {
        Ok(body) => {
            let bytes = body.to_bytes();
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => match value.get("message").and_then(|m| m.as_str()) {
                    Some(message) => anyhow::anyhow!("{message}"),
                    None => anyhow::anyhow!("unknown error"),
                },
                Err(e) => anyhow::anyhow!("malformed error body: {e}"),
            }
        }
        Err(e) => anyhow::anyhow!("cannot read error body: {e}"),
    }
}
