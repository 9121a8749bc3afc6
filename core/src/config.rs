/// Configuration management
use crate::error::{RinkError, Result};
use crate::sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = ".rinklink";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the local record store (defaults to `.rinklink`)
    pub data_dir: Option<PathBuf>,

    /// Profile / current-user refresh period
    pub profile_poll_interval: Duration,

    /// Unread badge refresh period
    pub unread_poll_interval: Duration,

    /// Open conversation refresh period
    pub conversation_poll_interval: Duration,

    /// Friend requests / friend list refresh period
    pub social_poll_interval: Duration,

    /// Bound on a single store fetch made by the scheduler
    pub fetch_timeout: Duration,

    /// How long fetches may keep failing before views are flagged stale
    pub staleness_threshold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            data_dir: None,
            profile_poll_interval: sync.profile_interval,
            unread_poll_interval: sync.unread_interval,
            conversation_poll_interval: sync.conversation_interval,
            social_poll_interval: sync.social_interval,
            fetch_timeout: sync.fetch_timeout,
            staleness_threshold: sync.staleness_threshold,
        }
    }
}

fn parse_ms(flag: &str, value: Option<&String>) -> Result<Duration> {
    let raw = value.ok_or_else(|| {
        RinkError::Config(format!("{} requires a value in milliseconds", flag))
    })?;
    let ms = raw.parse::<u64>().map_err(|_| {
        RinkError::Config(format!("{} must be a whole number of milliseconds", flag))
    })?;
    if ms == 0 {
        return Err(RinkError::Config(format!("{} must be greater than zero", flag)));
    }
    Ok(Duration::from_millis(ms))
}

impl Config {
    /// Parse leading flags from command line arguments.
    /// Returns the config and the remaining (positional) arguments.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Self::default();
        let mut rest = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        RinkError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--poll-ms" => {
                    config.set_poll_interval(parse_ms("--poll-ms", args.get(i + 1))?);
                    i += 2;
                }
                "--timeout-ms" => {
                    config.fetch_timeout = parse_ms("--timeout-ms", args.get(i + 1))?;
                    i += 2;
                }
                "--stale-ms" => {
                    config.staleness_threshold = parse_ms("--stale-ms", args.get(i + 1))?;
                    i += 2;
                }
                other => {
                    rest.push(other.to_string());
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(dir) = std::env::var("RINKLINK_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = std::env::var("RINKLINK_POLL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            config.set_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = std::env::var("RINKLINK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            config.fetch_timeout = Duration::from_millis(ms);
        }

        Ok((config, rest))
    }

    /// `pollIntervalMs`: one period for every view
    pub fn set_poll_interval(&mut self, every: Duration) {
        self.profile_poll_interval = every;
        self.unread_poll_interval = every;
        self.conversation_poll_interval = every;
        self.social_poll_interval = every;
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Scheduler settings derived from this config
    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            profile_interval: self.profile_poll_interval,
            unread_interval: self.unread_poll_interval,
            conversation_interval: self.conversation_poll_interval,
            social_interval: self.social_poll_interval,
            fetch_timeout: self.fetch_timeout,
            staleness_threshold: self.staleness_threshold,
            ..SyncConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("rinklink")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults_match_scheduler() {
        let config = Config::default();
        assert_eq!(config.fetch_timeout, Duration::from_millis(500));
        assert_eq!(config.sync().unread_interval, Duration::from_secs(3));
        assert_eq!(config.sync().profile_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_flags_and_positionals() {
        let argv = args(&["--poll-ms", "1500", "send", "a", "b", "--timeout-ms", "200", "hi"]);
        let (config, rest) = Config::from_args(&argv).unwrap();
        assert_eq!(config.conversation_poll_interval, Duration::from_millis(1500));
        assert_eq!(config.social_poll_interval, Duration::from_millis(1500));
        assert_eq!(config.fetch_timeout, Duration::from_millis(200));
        assert_eq!(rest, vec!["send", "a", "b", "hi"]);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(Config::from_args(&args(&["--poll-ms"])).is_err());
        assert!(Config::from_args(&args(&["--poll-ms", "fast"])).is_err());
        assert!(Config::from_args(&args(&["--timeout-ms", "0"])).is_err());
    }
}
