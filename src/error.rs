// Error type shared by the library modules. The binary wraps these in
// `anyhow` so each command can add its own context.

use std::path::PathBuf;

/// Errors produced while preparing or driving an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{} is not a file", .0.display())]
    NotAFile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is an invalid account")]
    InvalidAccount(String),

    #[error("access token unavailable: {0}")]
    Token(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("failed to create upload session: {0}")]
    SessionCreate(String),

    #[error("upload session expired or invalid, it will be recreated on the next run: {0}")]
    SessionExpired(String),

    #[error("cached upload state is unreadable: {0}")]
    StateDecode(String),

    #[error("failed to write upload state: {0}")]
    StateWrite(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("upload cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl UploadError {
    /// Whether the error proves the remote session can no longer be used, so
    /// the cached record has nothing left worth resuming.
    pub fn discards_session(&self) -> bool {
        matches!(
            self,
            UploadError::Remote(_) | UploadError::SessionCreate(_) | UploadError::SessionExpired(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_discard_the_record() {
        assert!(UploadError::Remote("itemNotFound".into()).discards_session());
        assert!(UploadError::SessionCreate("denied".into()).discards_session());
        assert!(UploadError::SessionExpired("gone".into()).discards_session());
    }

    #[test]
    fn local_and_transient_errors_keep_the_record() {
        let exhausted = UploadError::RetriesExhausted {
            attempts: 3,
            last: "connection reset".into(),
        };
        assert!(!exhausted.discards_session());
        assert!(!UploadError::Cancelled.discards_session());
        let io = UploadError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.discards_session());
    }

    #[test]
    fn not_a_file_message_names_the_path() {
        let err = UploadError::NotAFile(PathBuf::from("/tmp/missing.bin"));
        assert_eq!(err.to_string(), "/tmp/missing.bin is not a file");
    }
}
