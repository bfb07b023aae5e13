// Runtime configuration read from the environment (a `.env` file is loaded
// by the binary before this runs).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, UploadError};
use crate::hasher::FingerprintStrategy;
use crate::retry::RetryPolicy;

pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0/me/drive";
pub const DEFAULT_CHUNK_SIZE_MB: u64 = 10;
/// Chunk sizes must be a multiple of this many MiB to stay aligned to the
/// 10 KiB unit the upload protocol requires.
pub const CHUNK_SIZE_STEP_MB: u64 = 5;
pub const MAX_CHUNK_SIZE_MB: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SCOPES: [&str; 2] = ["User.Read", "Files.ReadWrite.All"];

const APP_DIR: &str = "driveup";
const TOKEN_FILE: &str = "serialized_token.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub graph_url: String,
    pub cache_dir: PathBuf,
    pub token_cache: PathBuf,
    pub chunk_size_mb: u64,
    pub fingerprint: FingerprintStrategy,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub scopes: Vec<String>,
}

impl Config {
    /// Reads `DRIVEUP_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let graph_url = var("DRIVEUP_GRAPH_URL").unwrap_or_else(|| DEFAULT_GRAPH_URL.into());
        let cache_dir = var("DRIVEUP_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);
        let token_cache = var("DRIVEUP_TOKEN_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join(TOKEN_FILE));
        let chunk_size_mb = match var("DRIVEUP_CHUNK_SIZE_MB") {
            Some(v) => normalize_chunk_size(parse_number("DRIVEUP_CHUNK_SIZE_MB", &v)?),
            None => DEFAULT_CHUNK_SIZE_MB,
        };
        let fingerprint = match var("DRIVEUP_FINGERPRINT") {
            Some(v) => v.parse()?,
            None => FingerprintStrategy::default(),
        };
        let max_attempts = var("DRIVEUP_MAX_RETRIES")
            .map(|v| parse_number("DRIVEUP_MAX_RETRIES", &v))
            .transpose()?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        let max_elapsed = var("DRIVEUP_MAX_RETRY_SECS")
            .map(|v| parse_number("DRIVEUP_MAX_RETRY_SECS", &v))
            .transpose()?
            .map(Duration::from_secs);
        let timeout = var("DRIVEUP_TIMEOUT_SECS")
            .map(|v| parse_number("DRIVEUP_TIMEOUT_SECS", &v))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let scopes = var("DRIVEUP_SCOPES")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());

        Ok(Config {
            graph_url,
            cache_dir,
            token_cache,
            chunk_size_mb,
            fingerprint,
            retry: RetryPolicy {
                max_attempts,
                max_elapsed,
                ..RetryPolicy::default()
            },
            timeout,
            scopes,
        })
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb * 1024 * 1024
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".cache"))
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| UploadError::Config(format!("{key} must be a whole number, got '{value}'")))
}

/// Rounds down to a multiple of 5 MiB within 5..=60.
pub fn normalize_chunk_size(mb: u64) -> u64 {
    let adjusted = (mb / CHUNK_SIZE_STEP_MB * CHUNK_SIZE_STEP_MB)
        .clamp(CHUNK_SIZE_STEP_MB, MAX_CHUNK_SIZE_MB);
    if adjusted != mb {
        warn!("chunk size {mb}MB is not a multiple of {CHUNK_SIZE_STEP_MB}MB up to {MAX_CHUNK_SIZE_MB}MB, using {adjusted}MB");
    }
    adjusted
}
