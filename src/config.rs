/// Configuration loaded from environment variables.
///
/// LEARNING: In Rust, a struct is like a class without methods (data only).
/// Methods are added separately in `impl` blocks. This separation is a key
/// Rust design pattern.
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default retention window for downloaded artifacts.
pub const DEFAULT_RETENTION_HOURS: u64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub download_dir: PathBuf,
    pub ytdlp_path: String,
    pub cookies_path: Option<PathBuf>,
    /// `None` means a download may run indefinitely.
    pub download_timeout: Option<Duration>,
    pub retention: Duration,
    /// `None` disables the background purge.
    pub cleanup_interval: Option<Duration>,
}

impl Config {
    /// LEARNING: `Self` refers to the type being implemented (Config).
    /// This is a constructor pattern: Rust has no `new` keyword,
    /// just functions that return Self.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same parsing as `from_env`, but over any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| {
            non_empty(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let seconds = |key: &str| match number(key, 0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            host: non_empty("BIND_HOST")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(IpAddr::from([0, 0, 0, 0])),
            port: non_empty("PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5000),
            download_dir: non_empty("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            ytdlp_path: non_empty("YTDLP_PATH").unwrap_or_else(|| "yt-dlp".into()),
            cookies_path: non_empty("COOKIES_PATH").map(PathBuf::from),
            download_timeout: seconds("DOWNLOAD_TIMEOUT_SECS"),
            retention: Duration::from_secs(
                number("RETENTION_HOURS", DEFAULT_RETENTION_HOURS).saturating_mul(60 * 60),
            ),
            cleanup_interval: seconds("CLEANUP_INTERVAL_SECS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.port, 5000);
        assert_eq!(config.download_dir, PathBuf::from("./downloads"));
        assert_eq!(config.ytdlp_path, "yt-dlp");
        assert!(config.cookies_path.is_none());
        assert!(config.download_timeout.is_none());
        assert!(config.cleanup_interval.is_none());
        assert_eq!(config.retention, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("BIND_HOST", "127.0.0.1"),
            ("DOWNLOAD_DIR", "/srv/clips"),
            ("YTDLP_PATH", "/usr/local/bin/yt-dlp"),
            ("DOWNLOAD_TIMEOUT_SECS", "90"),
            ("RETENTION_HOURS", "2"),
            ("CLEANUP_INTERVAL_SECS", "600"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.download_dir, PathBuf::from("/srv/clips"));
        assert_eq!(config.ytdlp_path, "/usr/local/bin/yt-dlp");
        assert_eq!(config.download_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.retention, Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.cleanup_interval, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("DOWNLOAD_TIMEOUT_SECS", "soon"),
            ("RETENTION_HOURS", "-1"),
            ("YTDLP_PATH", "   "),
        ]);
        assert_eq!(config.port, 5000);
        assert!(config.download_timeout.is_none());
        assert_eq!(config.retention, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.ytdlp_path, "yt-dlp");
    }

    #[test]
    fn test_huge_retention_saturates() {
        let config = config_from(&[("RETENTION_HOURS", &u64::MAX.to_string())]);
        assert_eq!(config.retention, Duration::from_secs(u64::MAX));
    }
}
