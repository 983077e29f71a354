//! Configuration settings for dirlease
//!
//! Defines the CLI arguments, subcommands and the runtime lease
//! configuration derived from them.

use crate::error::{DirLeaseError, Result};
use crate::lock::{LockOptions, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// dirlease - Advisory leases over shared filesystems
#[derive(Parser, Debug, Clone)]
#[command(name = "dirlease")]
#[command(author = "dirlease Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-host advisory leases built on directory creation")]
#[command(long_about = r#"
dirlease serializes work between processes and hosts that share nothing but
a filesystem. A lock named NAME is held by creating NAME_lock/ and
NAME_lock2/; a holder that stops renewing is reclaimed once its markers are
older than the wait window.

Examples:
  dirlease run /shared/locks/jobA -- ./train.sh      # Run under a lease
  dirlease --wait 1m run /shared/locks/jobA -- make  # Give up after a minute
  dirlease status /shared/locks/jobA                 # Inspect markers
  dirlease new /shared/stores sweep                  # Create a store path
  dirlease set /shared/stores/sweep_....store ints '[1,2,3]'
"#)]
pub struct CliArgs {
    /// How long to wait for a lease; also the staleness threshold (e.g. 30s, 5m)
    #[arg(short = 'w', long, global = true, env = "DIRLEASE_WAIT", default_value = "5m", value_name = "DURATION")]
    pub wait: String,

    /// Delay between acquisition attempts
    #[arg(long, global = true, env = "DIRLEASE_POLL", default_value = "1s", value_name = "DURATION")]
    pub poll: String,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a command while holding a lease
    #[command(name = "run")]
    Run {
        /// Lock name (path prefix of the marker directories)
        name: String,
        /// Command and arguments, after `--`
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Show the marker state of a lock
    #[command(name = "status")]
    Status {
        /// Lock name
        name: String,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate a new store path and print it
    #[command(name = "new")]
    New {
        /// Directory to place the store in
        dir: PathBuf,
        /// Identity used as the file name prefix
        identity: String,
    },

    /// Bind a key to a JSON value (bare words are stored as strings)
    #[command(name = "set")]
    Set {
        /// Store path
        store: PathBuf,
        /// Key
        key: String,
        /// Value
        value: String,
    },

    /// Print the value bound to a key
    #[command(name = "get")]
    Get {
        /// Store path
        store: PathBuf,
        /// Key
        key: String,
    },

    /// List the keys of a store
    #[command(name = "keys")]
    Keys {
        /// Store path
        store: PathBuf,
    },

    /// Delete a store
    #[command(name = "close")]
    Close {
        /// Store path
        store: PathBuf,
    },
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Runtime lease configuration derived from CLI args
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Acquisition window and staleness threshold
    #[serde(with = "duration_text")]
    pub wait: Duration,
    /// Delay between attempts
    #[serde(with = "duration_text")]
    pub poll_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            wait: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl LeaseConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let wait = parse_duration(&args.wait)
            .map_err(|e| DirLeaseError::config(format!("Invalid wait: {}", e)))?;
        let poll_interval = parse_duration(&args.poll)
            .map_err(|e| DirLeaseError::config(format!("Invalid poll interval: {}", e)))?;

        let config = Self {
            wait,
            poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the lock cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(DirLeaseError::config("Poll interval must be greater than zero"));
        }
        if self.poll_interval > self.wait {
            return Err(DirLeaseError::config(format!(
                "Poll interval ({}) exceeds wait ({})",
                humantime::format_duration(self.poll_interval),
                humantime::format_duration(self.wait)
            )));
        }
        Ok(())
    }

    /// Lock options for this configuration
    pub fn lock_options(&self) -> LockOptions {
        LockOptions::default()
            .with_timeout(self.wait)
            .with_poll_interval(self.poll_interval)
    }
}

/// Parse a human-readable duration ("90s", "5m", "1h 30m"); bare numbers are minutes
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Empty duration string".to_string());
    }

    if let Ok(minutes) = input.parse::<f64>() {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(format!("Invalid number of minutes: {}", input));
        }
        return Duration::try_from_secs_f64(minutes * 60.0)
            .map_err(|_| format!("Invalid number of minutes: {}", input));
    }

    humantime::parse_duration(input).map_err(|e| format!("{}: {}", input, e))
}

/// Serialize durations as humantime strings ("5m") in config files
mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("0.5").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert!(parse_duration("1e18").is_err());
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("NaN").is_err());

        let args = CliArgs::try_parse_from(["dirlease", "--wait", "1e18", "status", "/shared/jobA"])
            .unwrap();
        assert!(matches!(
            LeaseConfig::from_cli(&args),
            Err(DirLeaseError::ConfigError(_))
        ));
    }

    #[test]
    fn test_from_cli() {
        let args = CliArgs::try_parse_from([
            "dirlease", "--wait", "1m", "--poll", "250ms", "status", "/shared/jobA",
        ])
        .unwrap();
        let config = LeaseConfig::from_cli(&args).unwrap();
        assert_eq!(config.wait, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(250));

        let options = config.lock_options();
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(options.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_defaults() {
        let config = LeaseConfig::default();
        assert_eq!(config.wait, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_rejected() {
        let config = LeaseConfig {
            wait: Duration::from_secs(60),
            poll_interval: Duration::ZERO,
        };
        assert!(matches!(config.validate(), Err(DirLeaseError::ConfigError(_))));
    }

    #[test]
    fn test_run_requires_command() {
        assert!(CliArgs::try_parse_from(["dirlease", "run", "/shared/jobA"]).is_err());

        let args = CliArgs::try_parse_from([
            "dirlease", "run", "/shared/jobA", "--", "echo", "-n", "hi",
        ])
        .unwrap();
        match args.command {
            Commands::Run { name, command } => {
                assert_eq!(name, "/shared/jobA");
                assert_eq!(command, vec!["echo", "-n", "hi"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_config_serde() {
        let config = LeaseConfig {
            wait: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"2m\""));
        let back: LeaseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
