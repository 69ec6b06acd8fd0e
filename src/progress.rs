/// Incremental parser for yt-dlp's human-readable output.
///
/// yt-dlp has no structured progress stream in the mode we run it, so this
/// is best-effort scraping: it never fails, it only recognizes what it can.
///
/// LEARNING: Output arrives in arbitrary chunks. A line (or even a single
/// multi-byte UTF-8 character) may be split across two reads, so we keep
/// raw bytes until we see a line terminator and only then decode.
use std::collections::VecDeque;

use crate::models::ProgressEvent;

/// Tag yt-dlp puts in front of download progress lines.
const PROGRESS_MARKER: &str = "[download]";

/// How many non-progress lines are kept for diagnostics.
const DIAGNOSTIC_TAIL: usize = 64;

/// Longest unterminated run we buffer before treating it as a line.
const MAX_PENDING: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: Vec<u8>,
    current: Option<ProgressEvent>,
    diagnostics: VecDeque<String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the progress events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if let Some(event) = self.consume_line(&line[..end]) {
                events.push(event);
            }
        }
        if self.pending.len() > MAX_PENDING {
            let rest = std::mem::take(&mut self.pending);
            events.extend(self.consume_line(&rest));
        }
        events
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<ProgressEvent> {
        let rest = std::mem::take(&mut self.pending);
        self.consume_line(&rest).into_iter().collect()
    }

    /// Most recent progress line. Earlier ones are superseded.
    pub fn current(&self) -> Option<&ProgressEvent> {
        self.current.as_ref()
    }

    /// Recent lines that were not progress updates.
    pub fn diagnostics(&self) -> impl Iterator<Item = &str> {
        self.diagnostics.iter().map(String::as_str)
    }

    fn consume_line(&mut self, bytes: &[u8]) -> Option<ProgressEvent> {
        let text = String::from_utf8_lossy(bytes);
        let line = text.trim();
        if line.is_empty() {
            return None;
        }

        match parse_progress_line(line) {
            Some(event) => {
                self.current = Some(event.clone());
                Some(event)
            }
            None => {
                if self.diagnostics.len() == DIAGNOSTIC_TAIL {
                    self.diagnostics.pop_front();
                }
                self.diagnostics.push_back(line.to_string());
                None
            }
        }
    }
}

/// Recognize a single complete line.
///
/// Example: "[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10"
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    if !line.contains(PROGRESS_MARKER) {
        return None;
    }

    let percentage = line
        .split_whitespace()
        .find(|token| {
            token
                .strip_suffix('%')
                .is_some_and(|number| number.parse::<f64>().is_ok_and(f64::is_finite))
        })
        .map(str::to_string);

    Some(ProgressEvent {
        percentage,
        raw_line: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        let event = parse_progress_line("[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10")
            .unwrap();
        assert_eq!(event.percentage.as_deref(), Some("45.2%"));

        let event = parse_progress_line("[download] 42%").unwrap();
        assert_eq!(event.percentage.as_deref(), Some("42%"));
    }

    #[test]
    fn test_marker_without_percentage() {
        let event = parse_progress_line("[download] Destination: abc.mp4").unwrap();
        assert!(event.percentage.is_none());
    }

    #[test]
    fn test_non_marker_lines_are_diagnostics() {
        let mut parser = ProgressParser::new();
        let events = parser.feed(b"[youtube] abc: Downloading webpage\nWARNING: 50% sure\n");
        assert!(events.is_empty());
        assert!(parser.current().is_none());
        let diag: Vec<_> = parser.diagnostics().collect();
        assert_eq!(diag, vec!["[youtube] abc: Downloading webpage", "WARNING: 50% sure"]);
    }

    #[test]
    fn test_split_line_matches_whole_line() {
        let whole = b"[download]  42.0% of 3.00MiB at 1.00MiB/s ETA 00:02\n";

        let mut one_shot = ProgressParser::new();
        let expected = one_shot.feed(whole);

        for split in 1..whole.len() {
            let mut parser = ProgressParser::new();
            let mut events = parser.feed(&whole[..split]);
            events.extend(parser.feed(&whole[split..]));
            assert_eq!(events, expected, "split at {split}");
        }
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let line = "[download] 10% of vidéo\n".as_bytes();
        let cut = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut parser = ProgressParser::new();
        assert!(parser.feed(&line[..cut]).is_empty());
        let events = parser.feed(&line[cut..]);
        assert_eq!(events[0].raw_line, "[download] 10% of vidéo");
    }

    #[test]
    fn test_carriage_return_redraws() {
        let mut parser = ProgressParser::new();
        let events = parser.feed(b"[download]   1.0%\r[download]  50.0%\r[download] 100%\n");
        assert_eq!(events.len(), 3);
        assert_eq!(parser.current().unwrap().percentage.as_deref(), Some("100%"));
    }

    #[test]
    fn test_latest_progress_supersedes() {
        let mut parser = ProgressParser::new();
        parser.feed(b"[download] 10%\n");
        parser.feed(b"[download] 20%\n");
        assert_eq!(parser.current().unwrap().percentage.as_deref(), Some("20%"));
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed(b"[download] 99%").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_garbage_never_panics() {
        // Deterministic pseudo-random bytes, including invalid UTF-8.
        let mut state: u32 = 0x1234_5678;
        let mut parser = ProgressParser::new();
        for _ in 0..200 {
            let chunk: Vec<u8> = (0..97)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    (state & 0xff) as u8
                })
                .collect();
            let _ = parser.feed(&chunk);
        }
        let _ = parser.feed(&[0xff, 0xfe, b'%', b'\n', b'[', 0x80]);
        let _ = parser.finish();
        assert!(parser.diagnostics().count() <= DIAGNOSTIC_TAIL);
    }

    #[test]
    fn test_unterminated_flood_is_bounded() {
        let mut parser = ProgressParser::new();
        let chunk = vec![b'x'; 8192];
        for _ in 0..32 {
            assert!(parser.feed(&chunk).is_empty());
            assert!(parser.pending.len() <= MAX_PENDING);
        }
        assert!(parser.diagnostics().count() >= 1);

        let events = parser.feed(b"\n[download] 5%\n");
        assert_eq!(events.last().unwrap().percentage.as_deref(), Some("5%"));
    }

    #[test]
    fn test_nan_is_not_a_percentage() {
        let event = parse_progress_line("[download] NaN% inf%").unwrap();
        assert!(event.percentage.is_none());
    }
}
