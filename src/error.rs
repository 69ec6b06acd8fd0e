/// Failure taxonomy for a single download.
///
/// LEARNING: `thiserror` derives `std::error::Error` + `Display` from the
/// `#[error(...)]` attributes, so each variant carries its own message.
use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Bad input, rejected before any process starts.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to launch downloader: {0}")]
    Launch(#[source] io::Error),

    #[error("{}", exited_message(.exit_code, .stderr))]
    ExitedNonZero {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("downloaded file not found for {0}")]
    ArtifactNotFound(String),

    #[error("several downloaded files match {video_id}: {}", .candidates.join(", "))]
    ArtifactAmbiguous {
        video_id: String,
        candidates: Vec<String>,
    },

    #[error("download timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("artifact directory error: {0}")]
    Io(#[from] io::Error),

    /// The client stopped listening; the child was killed.
    #[error("download cancelled: client disconnected")]
    Cancelled,
}

fn exited_message(exit_code: &Option<i32>, stderr: &str) -> String {
    let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    format!("yt-dlp failed with code {}: {}", code, stderr.trim_end())
}

impl DownloadError {
    /// Stable machine-readable code written into failure frames.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Launch(_) => "launch_error",
            Self::ExitedNonZero { .. } => "process_exited_non_zero",
            Self::ArtifactNotFound(_) => "artifact_not_found",
            Self::ArtifactAmbiguous { .. } => "artifact_ambiguous",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io_error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitedNonZero { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}
