//! `vigil serve`: newline-delimited JSON requests on stdin.
//!
//! Requests are handled concurrently, so responses can arrive out of order.
//! The loop ends at end of input or when the idle monitor cancels the
//! shutdown token; either way in-flight requests finish and cached models
//! are torn down before exit.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_serving::pipeline::StagedInput;
use vigil_serving::{
    DetectionRequest, DetectionResult, DetectionService, RequestInput, RequestOptions, ServingConfig, ServingError,
};

const PING: &str = "ping";
const PONG: &str = "pong";

/// One request line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WireRequest {
    options: RequestOptions,
    #[serde(default)]
    image_path: Option<PathBuf>,
    #[serde(default)]
    video_file_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct WireError {
    error: String,
    status: u16,
}

pub async fn execute(config: ServingConfig) -> Result<()> {
    let service = Arc::new(DetectionService::new(config)?);
    let shutdown = CancellationToken::new();
    let background = service.spawn_background(&shutdown);

    let mut lines = spawn_stdin_reader();
    let (responses, mut outbox) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = outbox.recv().await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    info!("Serving requests on stdin");
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Idle timeout reached, shutting down");
                break;
            }
            line = lines.recv() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to read stdin, shutting down");
                        break;
                    }
                    None => {
                        info!("End of input, shutting down");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let service = Arc::clone(&service);
                let responses = responses.clone();
                handlers.spawn(async move {
                    let response = handle_line(&service, &line).await;
                    let _ = responses.send(response);
                });
            }
        }
    }

    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Request handler failed");
        }
    }
    drop(responses);
    writer.await??;

    shutdown.cancel();
    background.join().await;
    service.shutdown();
    Ok(())
}

/// Read stdin lines on a plain thread. A blocked read never holds up
/// runtime shutdown this way.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn handle_line(service: &DetectionService, line: &str) -> String {
    if line.trim() == PING {
        return PONG.to_string();
    }

    let encoded = match respond(service, line).await {
        Ok(result) => serde_json::to_string(&result),
        Err(e) => {
            warn!(status = e.status(), error = %e, "Request failed");
            serde_json::to_string(&WireError { error: e.to_string(), status: e.status() })
        }
    };
    encoded.unwrap_or_else(|e| format!(r#"{{"error":"failed to encode response: {e}","status":500}}"#))
}

async fn respond(service: &DetectionService, line: &str) -> Result<DetectionResult, ServingError> {
    let request: WireRequest =
        serde_json::from_str(line).map_err(|e| ServingError::InvalidInput(format!("invalid request: {e}")))?;

    let mut staged = None;
    let input = match (request.image_path, request.video_file_path) {
        (Some(_), Some(_)) => {
            return Err(ServingError::InvalidInput(
                "imagePath and videoFilePath are mutually exclusive".to_string(),
            ));
        }
        (Some(path), None) => {
            let bytes = std::fs::read(&path)
                .map_err(|e| ServingError::InvalidInput(format!("cannot read image {}: {e}", path.display())))?;
            Some(RequestInput::Bytes(bytes))
        }
        (None, Some(path)) => {
            let path = staged_video(&service.config().results_dir, &path)?;
            staged = Some(path.clone());
            Some(RequestInput::StagedFile(path))
        }
        (None, None) => None,
    };

    let request = match DetectionRequest::from_parts(request.options, input) {
        Ok(request) => request,
        Err(e) => {
            // Rejected before the service took ownership of the staged copy.
            drop(staged.map(StagedInput::new));
            return Err(e);
        }
    };
    debug!(mode = %request.mode(), "Accepted request");
    service.detect(request).await
}

/// Resolve a client-named video to its staged copy in `results_dir`.
///
/// Accepts a bare file name or a path whose directory is `results_dir`.
fn staged_video(results_dir: &Path, path: &Path) -> Result<PathBuf, ServingError> {
    let rejected = || {
        ServingError::InvalidInput(format!(
            "videoFilePath must name a file staged in {}: {}",
            results_dir.display(),
            path.display()
        ))
    };

    let Some(Component::Normal(name)) = path.components().next_back() else {
        return Err(rejected());
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let same_dir = match (parent.canonicalize(), results_dir.canonicalize()) {
            (Ok(parent), Ok(results)) => parent == results,
            _ => false,
        };
        if !same_dir {
            return Err(rejected());
        }
    }
    Ok(results_dir.join(name))
}
