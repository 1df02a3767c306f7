// ==============================================================================
// config.rs - Resolved Pipeline Configuration
// ==============================================================================
// Description: Value objects handed to every pipeline component
// Author: Matt Barham
// Created: 2026-02-04
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 1239;
pub const DEFAULT_WINDOW_SIZE: u64 = 1_000_000_000;
pub const DEFAULT_PRUNE_EVERY: u32 = 10;
pub const LOAD_CHUNK_SIZE: u64 = 1_000_000;

/// Where the array store coordinator lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// None means the local coordinator
    pub host: Option<String>,
    pub port: u16,
}

impl Endpoint {
    /// `"local"` (any case) or an empty host selects the local coordinator
    pub fn parse(host: &str, port: u16) -> Self {
        let host = host.trim();
        let host = if host.is_empty() || host.eq_ignore_ascii_case("local") {
            None
        } else {
            Some(host.to_string())
        };
        Self { host, port }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}:{}", host, self.port),
            None => write!(f, "local:{}", self.port),
        }
    }
}

/// Log verbosity accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Filter directive for tracing-subscriber
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            // tracing has no level above error
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Window and pruning policy for the chunked merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSettings {
    /// Rows per window; also the threshold below which the buffer is merged at once
    pub window_size: u64,
    /// Explicit resume row; overrides any stored checkpoint
    pub begin: Option<u64>,
    /// Prune target versions after every N windows (0 disables)
    pub prune_every: u32,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            begin: None,
            prune_every: DEFAULT_PRUNE_EVERY,
        }
    }
}

impl MergeSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            anyhow::bail!("Window size must be positive");
        }
        Ok(())
    }
}

/// Settings shared by every workflow of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub endpoint: Endpoint,
    pub iquery_bin: PathBuf,
    /// SQLite file holding merge checkpoints and the run journal
    pub state_db: PathBuf,
    pub log_level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(Endpoint::parse("local", DEFAULT_PORT).host, None);
        assert_eq!(Endpoint::parse("LOCAL", DEFAULT_PORT).host, None);
        assert_eq!(Endpoint::parse("", DEFAULT_PORT).to_string(), "local:1239");

        let remote = Endpoint::parse("scidb10", 1240);
        assert_eq!(remote.host.as_deref(), Some("scidb10"));
        assert_eq!(remote.to_string(), "scidb10:1240");
    }

    #[test]
    fn test_log_level_directive() {
        assert_eq!(LogLevel::Warning.directive(), "warn");
        assert_eq!(LogLevel::Critical.directive(), "error");
    }

    #[test]
    fn test_merge_settings_validate() {
        assert!(MergeSettings::default().validate().is_ok());
        let bad = MergeSettings {
            window_size: 0,
            ..MergeSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
