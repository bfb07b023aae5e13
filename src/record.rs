// The record kept for one upload while it runs and, for large files,
// between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::Account;

/// Schema version written into every persisted record.
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Running,
    Stopped,
    Finished,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Running => "running",
            UploadStatus::Stopped => "stopped",
            UploadStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// One upload attempt. Large uploads persist this after every chunk so a
/// later run with the same fingerprint can pick the session back up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub filename: String,
    pub total_size: u64,
    pub local_path: String,
    pub fingerprint: String,
    pub remote_dir: String,
    pub account: Account,
    pub created_at: DateTime<Utc>,
    /// Empty until a session has been created.
    #[serde(default)]
    pub upload_url: String,
    #[serde(default)]
    pub bytes_finished: u64,
    /// Bytes per second measured over the last chunk.
    #[serde(default)]
    pub speed: u64,
    /// Seconds spent transferring, summed over every run.
    #[serde(default)]
    pub spend_time: f64,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: UploadStatus,
    #[serde(default)]
    pub last_error: String,
}

fn default_version() -> u32 {
    RECORD_VERSION
}

impl UploadRecord {
    pub fn new(
        filename: String,
        total_size: u64,
        local_path: String,
        fingerprint: String,
        remote_dir: String,
        account: Account,
    ) -> Self {
        UploadRecord {
            version: RECORD_VERSION,
            filename,
            total_size,
            local_path,
            fingerprint,
            remote_dir,
            account,
            created_at: Utc::now(),
            upload_url: String::new(),
            bytes_finished: 0,
            speed: 0,
            spend_time: 0.0,
            finished_at: None,
            status: UploadStatus::Pending,
            last_error: String::new(),
        }
    }

    /// Remote path of the uploaded item, `remote_dir` always ends in `/`.
    pub fn item_path(&self) -> String {
        format!("{}{}", self.remote_dir, self.filename)
    }

    pub fn mark_finished(&mut self) {
        self.bytes_finished = self.total_size;
        self.status = UploadStatus::Finished;
        self.finished_at = Some(Utc::now());
        self.last_error.clear();
    }

    pub fn mark_stopped(&mut self) {
        self.status = UploadStatus::Stopped;
        self.speed = 0;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_account() -> Account {
        Account {
            username: "alice@example.com".to_string(),
            home_account_id: "oid-1.tid-1".to_string(),
            local_account_id: "oid-1".to_string(),
            environment: "login.microsoftonline.com".to_string(),
            realm: "tid-1".to_string(),
            authority_type: "MSSTS".to_string(),
        }
    }

    pub(crate) fn sample_record() -> UploadRecord {
        UploadRecord::new(
            "video.mkv".to_string(),
            26_214_400,
            "/home/alice/video.mkv".to_string(),
            "ab".repeat(32),
            "/backups/".to_string(),
            sample_account(),
        )
    }

    #[test]
    fn new_record_is_pending_and_empty() {
        let r = sample_record();
        assert_eq!(r.version, RECORD_VERSION);
        assert_eq!(r.status, UploadStatus::Pending);
        assert!(r.upload_url.is_empty());
        assert_eq!(r.bytes_finished, 0);
        assert!(r.finished_at.is_none());
        assert_eq!(r.item_path(), "/backups/video.mkv");
    }

    #[test]
    fn finishing_fills_bytes_and_timestamp() {
        let mut r = sample_record();
        r.bytes_finished = 1024;
        r.last_error = "timeout".to_string();
        r.mark_finished();
        assert_eq!(r.bytes_finished, r.total_size);
        assert_eq!(r.status, UploadStatus::Finished);
        assert!(r.finished_at.is_some());
        assert!(r.last_error.is_empty());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(UploadStatus::Stopped).unwrap();
        assert_eq!(json, serde_json::json!("stopped"));
        assert_eq!(UploadStatus::Running.to_string(), "running");
    }

    #[test]
    fn missing_version_defaults_to_current() {
        let mut value = serde_json::to_value(sample_record()).unwrap();
        value.as_object_mut().unwrap().remove("version");
        let r: UploadRecord = serde_json::from_value(value).unwrap();
        assert_eq!(r.version, RECORD_VERSION);
    }
}
