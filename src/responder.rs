/// Streams a running download onto an HTTP response as newline-delimited JSON.
///
/// The response status and headers go out before yt-dlp has even started,
/// so the status is always 200. Success or failure lives in the final frame
/// of the body (`complete: true`). Clients must read that frame; they must
/// not infer the outcome from the status code. Changing this changes the
/// client contract.
use std::convert::Infallible;
use std::future::Future;
use std::io;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream;
use log::{error, warn};
use tokio::sync::mpsc;

use crate::error::DownloadError;
use crate::models::{
    DownloadEvent, DownloadOutcome, FailureFrame, ProgressEvent, ProgressFrame, SuccessFrame,
};

/// Where frames go. Split out so tests can spy on writes and ends.
pub trait FrameSink {
    /// Queue one frame. Returns false once the reader is gone.
    fn write(&mut self, frame: Bytes) -> bool;
    /// Close the body.
    fn end(&mut self);
    /// Resolves once the reader has gone away.
    fn closed(&self) -> impl Future<Output = ()> + Send + '_;
}

/// Sink feeding a streaming `axum` body.
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Result<Bytes, Infallible>>>,
}

impl FrameSink for ChannelSink {
    fn write(&mut self, frame: Bytes) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    fn end(&mut self) {
        // Dropping the sender finishes the body stream.
        self.tx = None;
    }

    fn closed(&self) -> impl Future<Output = ()> + Send + '_ {
        async move {
            if let Some(tx) = &self.tx {
                tx.closed().await;
            }
        }
    }
}

/// A sink plus the 200 response whose body it feeds.
pub fn channel_response() -> (ChannelSink, Response) {
    let (tx, rx) = mpsc::unbounded_channel();
    let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    }));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    (ChannelSink { tx: Some(tx) }, response)
}

pub struct StreamingResponder<S: FrameSink> {
    sink: S,
    ended: bool,
}

impl<S: FrameSink> StreamingResponder<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, ended: false }
    }

    /// Write one progress frame. No-op after the body has ended.
    pub fn progress(&mut self, event: &ProgressEvent) -> bool {
        if self.ended {
            return false;
        }
        let frame = ProgressFrame {
            progress: event.percentage.as_deref(),
            line: &event.raw_line,
            complete: false,
        };
        match encode(&frame) {
            Some(bytes) => self.sink.write(bytes),
            None => true,
        }
    }

    /// Write the terminal frame and close. Only the first call does anything.
    pub fn finish(&mut self, outcome: &DownloadOutcome) {
        if self.ended {
            return;
        }
        if let Some(bytes) = terminal_frame(outcome) {
            self.sink.write(bytes);
        }
        self.end();
    }

    /// Close the body. Idempotent.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.sink.end();
    }

    /// Forward coordinator events until the outcome arrives or the client
    /// leaves. Returning drops `events`, which stops the download. The reader
    /// is watched between events too, so a silent download still notices.
    pub async fn pump(mut self, mut events: mpsc::Receiver<DownloadEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                event = events.recv() => event,
                () = self.sink.closed() => {
                    warn!("Client disconnected while waiting for yt-dlp");
                    self.end();
                    return;
                }
            };
            let Some(event) = event else { break };
            match event {
                DownloadEvent::Progress(progress) => {
                    if !self.progress(&progress) {
                        warn!("Client disconnected during download");
                        self.end();
                        return;
                    }
                }
                DownloadEvent::Finished(outcome) => {
                    self.finish(&outcome);
                    return;
                }
            }
        }

        error!("Download task ended without an outcome");
        let lost = io::Error::other("download task ended without an outcome");
        self.finish(&DownloadOutcome::Failure(DownloadError::Io(lost)));
    }
}

fn terminal_frame(outcome: &DownloadOutcome) -> Option<Bytes> {
    match outcome {
        DownloadOutcome::Success {
            filename,
            retrieval_url,
            ..
        } => encode(&SuccessFrame {
            success: true,
            message: "Download completed",
            download_url: retrieval_url,
            filename,
            progress: "100%",
            complete: true,
        }),
        DownloadOutcome::Failure(e) => encode(&FailureFrame {
            success: false,
            error: "Video download failed",
            reason: e.reason(),
            details: e.to_string(),
            exit_code: e.exit_code(),
            complete: true,
        }),
    }
}

/// One JSON object plus the newline that delimits it.
fn encode<T: serde::Serialize>(frame: &T) -> Option<Bytes> {
    match serde_json::to_vec(frame) {
        Ok(mut bytes) => {
            bytes.push(b'\n');
            Some(Bytes::from(bytes))
        }
        Err(e) => {
            error!("Failed to serialize frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::path::PathBuf;

    #[derive(Debug, PartialEq)]
    enum Call {
        Write(Value),
        End,
    }

    /// Records every sink call; can simulate a vanished reader.
    #[derive(Default)]
    struct SpySink {
        calls: Vec<Call>,
        reader_gone: bool,
    }

    impl FrameSink for &mut SpySink {
        fn write(&mut self, frame: Bytes) -> bool {
            assert_eq!(frame.last(), Some(&b'\n'));
            self.calls.push(Call::Write(serde_json::from_slice(&frame).unwrap()));
            !self.reader_gone
        }

        fn end(&mut self) {
            self.calls.push(Call::End);
        }

        // Only writes report the reader as gone; the stream-level signal
        // is covered through `ChannelSink`.
        fn closed(&self) -> impl Future<Output = ()> + Send + '_ {
            std::future::pending()
        }
    }

    fn progress(pct: &str) -> ProgressEvent {
        ProgressEvent {
            percentage: Some(pct.into()),
            raw_line: format!("[download] {pct}"),
        }
    }

    fn success() -> DownloadOutcome {
        DownloadOutcome::Success {
            filename: "abc12345678.mp4".into(),
            file_path: PathBuf::from("/tmp/abc12345678.mp4"),
            retrieval_url: "/downloads/abc12345678.mp4".into(),
        }
    }

    #[test]
    fn test_nothing_written_after_finish() {
        let mut spy = SpySink::default();
        let mut responder = StreamingResponder::new(&mut spy);

        assert!(responder.progress(&progress("42%")));
        responder.finish(&success());
        responder.finish(&success());
        responder.end();
        assert!(!responder.progress(&progress("99%")));
        assert!(responder.ended);

        assert_eq!(spy.calls.len(), 3);
        assert_eq!(spy.calls[2], Call::End);
        match &spy.calls[1] {
            Call::Write(frame) => {
                assert_eq!(frame["success"], true);
                assert_eq!(frame["complete"], true);
                assert_eq!(frame["downloadUrl"], "/downloads/abc12345678.mp4");
                assert_eq!(frame["filename"], "abc12345678.mp4");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failure_frame() {
        let mut spy = SpySink::default();
        let mut responder = StreamingResponder::new(&mut spy);
        responder.finish(&DownloadOutcome::Failure(DownloadError::ExitedNonZero {
            exit_code: Some(1),
            stderr: "network error".into(),
        }));

        let Call::Write(frame) = &spy.calls[0] else {
            panic!("expected a frame");
        };
        assert_eq!(frame["success"], false);
        assert_eq!(frame["complete"], true);
        assert_eq!(frame["reason"], "process_exited_non_zero");
        assert_eq!(frame["exitCode"], 1);
        assert!(frame["details"].as_str().unwrap().ends_with("network error"));
        assert!(frame["error"].is_string());
        assert_eq!(spy.calls[1], Call::End);
    }

    #[tokio::test]
    async fn test_pump_forwards_in_order_then_closes() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(DownloadEvent::Progress(progress("10%"))).await.unwrap();
        tx.send(DownloadEvent::Progress(progress("42%"))).await.unwrap();
        tx.send(DownloadEvent::Finished(success())).await.unwrap();
        drop(tx);

        let mut spy = SpySink::default();
        StreamingResponder::new(&mut spy).pump(rx).await;

        assert_eq!(spy.calls.len(), 4);
        let Call::Write(first) = &spy.calls[0] else { panic!() };
        let Call::Write(second) = &spy.calls[1] else { panic!() };
        assert_eq!(first["progress"], "10%");
        assert_eq!(first["complete"], false);
        assert_eq!(second["progress"], "42%");
        assert_eq!(second["line"], "[download] 42%");
        assert_eq!(spy.calls[3], Call::End);
    }

    #[tokio::test]
    async fn test_pump_without_outcome_still_terminates_body() {
        let (tx, rx) = mpsc::channel::<DownloadEvent>(1);
        drop(tx);

        let mut spy = SpySink::default();
        StreamingResponder::new(&mut spy).pump(rx).await;

        let Call::Write(frame) = &spy.calls[0] else { panic!() };
        assert_eq!(frame["complete"], true);
        assert_eq!(frame["reason"], "io_error");
        assert_eq!(spy.calls[1], Call::End);
    }

    #[tokio::test]
    async fn test_pump_stops_when_reader_is_gone() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(DownloadEvent::Progress(progress("1%"))).await.unwrap();
        tx.send(DownloadEvent::Progress(progress("2%"))).await.unwrap();

        let mut spy = SpySink {
            reader_gone: true,
            ..Default::default()
        };
        StreamingResponder::new(&mut spy).pump(rx).await;

        assert_eq!(spy.calls.len(), 2);
        assert_eq!(spy.calls[1], Call::End);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_pump_returns_when_body_dropped_without_events() {
        let (tx, rx) = mpsc::channel::<DownloadEvent>(8);
        let (sink, response) = channel_response();
        let pump = tokio::spawn(StreamingResponder::new(sink).pump(rx));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!tx.is_closed());
        drop(response);

        tokio::time::timeout(std::time::Duration::from_secs(5), pump)
            .await
            .expect("pump kept waiting after the body was dropped")
            .unwrap();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_channel_response_body() {
        let (sink, response) = channel_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());

        let mut responder = StreamingResponder::new(sink);
        responder.progress(&progress("42%"));
        responder.finish(&success());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let lines: Vec<Value> = body
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_slice(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["progress"], "42%");
        assert_eq!(lines[1]["complete"], true);
    }
}
