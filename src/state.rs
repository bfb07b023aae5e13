// Durable per-fingerprint upload state. Each record lives in its own JSON
// file inside the cache directory and is replaced wholesale on every save.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, UploadError};
use crate::record::{UploadRecord, RECORD_VERSION};

const FILE_PREFIX: &str = "upload-info-";
const FILE_SUFFIX: &str = ".json";

/// Keyed store of in-flight upload records.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(UploadError::Config(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir)?;
        Ok(StateStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{fingerprint}{FILE_SUFFIX}"))
    }

    /// Reads the record for `fingerprint`. A file that exists but does not
    /// decode is reported as `StateDecode`.
    pub fn load(&self, fingerprint: &str) -> Result<Option<UploadRecord>> {
        let path = self.path_for(fingerprint);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode(&text)
            .map(Some)
            .map_err(|e| UploadError::StateDecode(format!("{}: {e}", path.display())))
    }

    /// Overwrites the record for `record.fingerprint` through a temp file in
    /// the same directory, so readers see either the old or the new state.
    pub fn save(&self, record: &UploadRecord) -> Result<()> {
        let path = self.path_for(&record.fingerprint);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| UploadError::StateWrite(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| UploadError::StateWrite(format!("{}: {e}", self.dir.display())))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| UploadError::StateWrite(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| UploadError::StateWrite(format!("{}: {}", path.display(), e.error)))?;

        debug!(fingerprint = %record.fingerprint, bytes_finished = record.bytes_finished, "saved upload state");
        Ok(())
    }

    /// Removes the record for `fingerprint`. Missing entries are fine.
    pub fn delete(&self, fingerprint: &str) -> Result<()> {
        match fs::remove_file(self.path_for(fingerprint)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable records, oldest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<UploadRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !(name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)) {
                continue;
            }
            match fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|t| decode(&t)) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable upload state {}: {e}", path.display()),
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

fn decode(text: &str) -> std::result::Result<UploadRecord, String> {
    let record: UploadRecord = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if record.version > RECORD_VERSION {
        return Err(format!(
            "record version {} is newer than supported version {RECORD_VERSION}",
            record.version
        ));
    }
    if record.bytes_finished > record.total_size {
        return Err(format!(
            "bytes_finished {} exceeds total_size {}",
            record.bytes_finished, record.total_size
        ));
    }
    Ok(record)
}
