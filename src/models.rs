/// Data models for download requests, progress and outcomes.
///
/// LEARNING: Serde's derive macros auto-generate JSON serialization code.
/// #[derive(Deserialize)] → can parse from JSON
/// #[derive(Serialize)]   → can convert to JSON
/// #[serde(rename_all = "camelCase")] → field names match what the browser sends
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::DownloadError;

/// Raw body of `POST /api/download`. Every field is optional so a missing
/// `videoId` becomes a 400 from our own validation, not a serde rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPayload {
    pub video_id: Option<String>,
    pub resolution: Option<String>,
}

/// Quality cap requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    P360,
    P480,
    P720,
    P1080,
    #[default]
    Best,
}

impl Resolution {
    /// Unknown or missing labels fall back to `Best`, never an error.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("360p") => Self::P360,
            Some("480p") => Self::P480,
            Some("720p") => Self::P720,
            Some("1080p") => Self::P1080,
            _ => Self::Best,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::Best => "best",
        }
    }

    /// yt-dlp `--format` expression for this cap.
    pub fn format_selector(self) -> &'static str {
        match self {
            Self::P360 => "best[height<=360]",
            Self::P480 => "best[height<=480]",
            Self::P720 => "best[height<=720]",
            Self::P1080 => "best[height<=1080]",
            Self::Best => "best",
        }
    }
}

/// A validated download request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    video_id: String,
    resolution: Resolution,
}

impl DownloadRequest {
    /// Validates the identifier. It ends up inside a filesystem path
    /// template, so separators, `..` and yt-dlp template markers are refused.
    pub fn new(video_id: &str, resolution: Resolution) -> Result<Self, DownloadError> {
        let video_id = video_id.trim();
        if video_id.is_empty() {
            return Err(DownloadError::InvalidRequest("Video ID is required".into()));
        }
        if video_id.contains(['/', '\\', '%', '\0']) || video_id.contains("..") {
            return Err(DownloadError::InvalidRequest(format!(
                "Video ID contains forbidden characters: {video_id}"
            )));
        }
        Ok(Self {
            video_id: video_id.to_string(),
            resolution,
        })
    }

    pub fn from_payload(payload: &DownloadPayload) -> Result<Self, DownloadError> {
        let video_id = payload.video_id.as_deref().unwrap_or_default();
        Self::new(video_id, Resolution::from_label(payload.resolution.as_deref()))
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// One recognized progress line from the downloader's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// The percentage token as printed, e.g. `42.5%`.
    pub percentage: Option<String>,
    pub raw_line: String,
}

/// A file in the artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: SystemTime,
}

impl ArtifactEntry {
    /// Public URL the file is served from.
    pub fn retrieval_url(&self) -> String {
        format!("/downloads/{}", self.filename)
    }
}

/// Terminal result of one download. Exactly one per request.
#[derive(Debug)]
pub enum DownloadOutcome {
    Success {
        filename: String,
        file_path: PathBuf,
        retrieval_url: String,
    },
    Failure(DownloadError),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Messages a running download emits, in order: any number of
/// `Progress`, then exactly one `Finished`.
#[derive(Debug)]
pub enum DownloadEvent {
    Progress(ProgressEvent),
    Finished(DownloadOutcome),
}

/// Wire shape of an in-progress frame.
#[derive(Debug, Serialize)]
pub struct ProgressFrame<'a> {
    pub progress: Option<&'a str>,
    pub line: &'a str,
    pub complete: bool,
}

/// Wire shape of the terminal frame on success.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessFrame<'a> {
    pub success: bool,
    pub message: &'a str,
    pub download_url: &'a str,
    pub filename: &'a str,
    pub progress: &'a str,
    pub complete: bool,
}

/// Wire shape of the terminal frame on failure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureFrame<'a> {
    pub success: bool,
    pub error: &'a str,
    pub reason: &'a str,
    pub details: String,
    pub exit_code: Option<i32>,
    pub complete: bool,
}

/// One row of `GET /api/downloads`.
#[derive(Debug, Serialize)]
pub struct DownloadListing {
    pub filename: String,
    pub url: String,
    pub size: u64,
}

impl From<&ArtifactEntry> for DownloadListing {
    fn from(entry: &ArtifactEntry) -> Self {
        Self {
            filename: entry.filename.clone(),
            url: entry.retrieval_url(),
            size: entry.size_bytes,
        }
    }
}
