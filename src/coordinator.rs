/// Runs one yt-dlp download from launch to outcome.
///
/// Each request gets its own child process, its own parsers and its own
/// state. Two requests for the same video are not deduplicated: they race
/// on the same output template and may trip over each other's files.
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::DownloadError;
use crate::models::{DownloadEvent, DownloadOutcome, DownloadRequest, ProgressEvent};
use crate::process::{
    OutputChunk, OutputStream, ProcessInvocation, ProcessRunner, RunningProcess,
};
use crate::progress::ProgressParser;
use crate::store::ArtifactStore;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// Lifecycle of a single download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Per-request bookkeeping: state, parsers, accumulated stderr.
#[derive(Debug)]
struct DownloadRun {
    state: DownloadState,
    stdout: ProgressParser,
    stderr: ProgressParser,
    stderr_bytes: Vec<u8>,
}

impl DownloadRun {
    fn new() -> Self {
        Self {
            state: DownloadState::Starting,
            stdout: ProgressParser::new(),
            stderr: ProgressParser::new(),
            stderr_bytes: Vec::new(),
        }
    }

    fn mark_running(&mut self) {
        if self.state == DownloadState::Starting {
            self.state = DownloadState::Running;
        }
    }

    fn feed(&mut self, chunk: &OutputChunk) -> Vec<ProgressEvent> {
        match chunk.stream {
            OutputStream::Stdout => self.stdout.feed(&chunk.bytes),
            OutputStream::Stderr => {
                self.stderr_bytes.extend_from_slice(&chunk.bytes);
                self.stderr.feed(&chunk.bytes)
            }
        }
    }

    fn finish(&mut self) -> Vec<ProgressEvent> {
        let mut events = self.stdout.finish();
        events.extend(self.stderr.finish());
        events
    }

    /// Latest progress line; yt-dlp prints its bar on stdout.
    fn current(&self) -> Option<&ProgressEvent> {
        self.stdout.current().or_else(|| self.stderr.current())
    }

    fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr_bytes).into_owned()
    }

    /// Move to the terminal state matching `outcome`. Only the first call
    /// counts; later ones are ignored and return false.
    fn settle(&mut self, outcome: &DownloadOutcome) -> bool {
        if self.state.is_terminal() {
            warn!("Ignoring second outcome for an already settled download");
            return false;
        }
        self.state = if outcome.is_success() {
            DownloadState::Succeeded
        } else {
            DownloadState::Failed
        };
        true
    }
}

pub struct DownloadCoordinator {
    ytdlp_path: String,
    cookies_path: Option<PathBuf>,
    timeout: Option<Duration>,
    store: ArtifactStore,
}

impl DownloadCoordinator {
    pub fn new(config: &Config, store: ArtifactStore) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            cookies_path: config.cookies_path.clone(),
            timeout: config.download_timeout,
            store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn ytdlp_path(&self) -> &str {
        &self.ytdlp_path
    }

    /// Derive the yt-dlp command line for a request.
    pub fn build_invocation(&self, request: &DownloadRequest) -> ProcessInvocation {
        let target_url = format!("{}{}", WATCH_URL, request.video_id());
        let output_template = self
            .store
            .dir()
            .join(format!("{}.%(ext)s", request.video_id()));

        // LEARNING: `let mut` declares a mutable variable. By default, all
        // variables in Rust are immutable (like `val` in Kotlin or `let` in Swift).
        let mut args = vec![
            target_url.clone(),
            "--output".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--format".to_string(),
            request.resolution().format_selector().to_string(),
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "--progress".to_string(),
            "--newline".to_string(),
        ];

        if let Some(cookies) = self.cookies_path.as_ref().filter(|p| p.exists()) {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        ProcessInvocation {
            executable: self.ytdlp_path.clone(),
            target_url,
            output_template,
            args,
        }
    }

    /// Launch the download in the background. The receiver yields progress
    /// events in the order yt-dlp printed them, then exactly one `Finished`.
    /// Dropping the receiver kills the child, whether or not it is printing.
    pub fn start(self: &Arc<Self>, request: DownloadRequest) -> mpsc::Receiver<DownloadEvent> {
        let (tx, rx) = mpsc::channel(32);
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            let outcome = coordinator.run(&request, &tx).await;
            if tx.send(DownloadEvent::Finished(outcome)).await.is_err() {
                warn!(
                    "Client left before the outcome for {} was delivered",
                    request.video_id()
                );
            }
        });

        rx
    }

    /// Drive one download to its outcome, forwarding progress to `events`.
    pub async fn run(
        &self,
        request: &DownloadRequest,
        events: &mpsc::Sender<DownloadEvent>,
    ) -> DownloadOutcome {
        let invocation = self.build_invocation(request);
        info!(
            "Downloading {} ({}) with {}",
            invocation.target_url,
            request.resolution().label(),
            invocation.executable
        );
        debug!(
            "Output template {}, args: {:?}",
            invocation.output_template.display(),
            invocation.args
        );

        let mut run = DownloadRun::new();
        let outcome = match ProcessRunner::spawn(&invocation) {
            Ok(mut process) => {
                run.mark_running();
                self.supervise(request, &mut process, &mut run, events).await
            }
            Err(e) => {
                error!("Failed to launch {}: {}", invocation.executable, e);
                DownloadOutcome::Failure(DownloadError::Launch(e))
            }
        };

        if run.settle(&outcome) {
            if let DownloadOutcome::Success { file_path, .. } = &outcome {
                info!("Saved {} to {}", request.video_id(), file_path.display());
            }
        }
        outcome
    }

    async fn supervise(
        &self,
        request: &DownloadRequest,
        process: &mut RunningProcess,
        run: &mut DownloadRun,
        events: &mpsc::Sender<DownloadEvent>,
    ) -> DownloadOutcome {
        let driven = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, drive(process, run, events))
                .await
                .unwrap_or(Err(DownloadError::Timeout(limit))),
            None => drive(process, run, events).await,
        };

        match driven {
            Ok(status) if status.success() => {
                info!("yt-dlp finished for {}", request.video_id());
                self.resolve(request)
            }
            Ok(status) => {
                for line in run.stdout.diagnostics() {
                    debug!("yt-dlp said: {}", line);
                }
                let stderr = run.stderr_text();
                error!(
                    "yt-dlp failed for {} ({:?}): {}",
                    request.video_id(),
                    status.code(),
                    stderr.trim_end()
                );
                DownloadOutcome::Failure(DownloadError::ExitedNonZero {
                    exit_code: status.code(),
                    stderr,
                })
            }
            Err(e) => {
                let last = run.current().map_or("none", |p| p.raw_line.as_str());
                warn!(
                    "Stopping download of {}: {} (last progress: {})",
                    request.video_id(),
                    e,
                    last
                );
                process.kill().await;
                DownloadOutcome::Failure(e)
            }
        }
    }

    fn resolve(&self, request: &DownloadRequest) -> DownloadOutcome {
        match self.store.resolve_by_prefix(request.video_id()) {
            Ok(entry) => {
                info!("Resolved {} ({} bytes)", entry.filename, entry.size_bytes);
                DownloadOutcome::Success {
                    retrieval_url: entry.retrieval_url(),
                    filename: entry.filename,
                    file_path: entry.path,
                }
            }
            Err(e) => {
                error!("yt-dlp reported success for {} but: {}", request.video_id(), e);
                DownloadOutcome::Failure(e)
            }
        }
    }
}

/// Pump output through the parsers until both pipes close, then reap.
/// Gives up with `Cancelled` as soon as the listener drops its receiver,
/// even while the child is silent.
async fn drive(
    process: &mut RunningProcess,
    run: &mut DownloadRun,
    events: &mpsc::Sender<DownloadEvent>,
) -> Result<ExitStatus, DownloadError> {
    loop {
        let chunk = tokio::select! {
            chunk = process.next_output() => chunk,
            () = events.closed() => return Err(DownloadError::Cancelled),
        };
        let Some(chunk) = chunk else { break };
        debug!(
            "yt-dlp {:?}: {}",
            chunk.stream,
            String::from_utf8_lossy(&chunk.bytes).trim_end()
        );
        for event in run.feed(&chunk) {
            events
                .send(DownloadEvent::Progress(event))
                .await
                .map_err(|_| DownloadError::Cancelled)?;
        }
    }
    for event in run.finish() {
        events
            .send(DownloadEvent::Progress(event))
            .await
            .map_err(|_| DownloadError::Cancelled)?;
    }
    if let Some(current) = run.current() {
        debug!("Last progress: {}", current.raw_line);
    }

    tokio::select! {
        status = process.wait() => Ok(status?),
        () = events.closed() => Err(DownloadError::Cancelled),
    }
}
