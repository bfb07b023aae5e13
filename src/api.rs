// API client module: a small blocking HTTP client for the drive endpoints
// the uploader needs. Every call returns the raw status and JSON body so the
// caller decides what counts as success; only transport failures are errors.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_RANGE;
use serde_json::{json, Value};

use crate::error::{Result, UploadError};

/// Characters escaped inside a drive item path. `/` is kept so the path
/// still addresses nested folders.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b':');

/// Status and decoded body of an HTTP response. Bodies that are not JSON
/// are kept as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn new(status: u16, body: Value) -> Self {
        Reply { status, body }
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Present once the drive has created the item.
    pub fn item_id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    pub fn upload_url(&self) -> Option<&str> {
        self.body.get("uploadUrl").and_then(Value::as_str)
    }

    /// Lower bound of the first range the server still expects. `None`
    /// when the field is missing, empty or unparsable.
    pub fn next_expected_offset(&self) -> Option<u64> {
        let first = self
            .body
            .get("nextExpectedRanges")?
            .as_array()?
            .first()?
            .as_str()?;
        first.split('-').next()?.trim().parse().ok()
    }

    /// The `error` payload if the body has one, otherwise the whole body.
    pub fn error_payload(&self) -> String {
        match self.body.get("error") {
            Some(err) => err.to_string(),
            None => format!("status {}: {}", self.status, self.body),
        }
    }
}

/// Failure to get any response at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// Worth retrying: connection refused, reset, timeout, or a server error
    /// the caller chose to treat the same way.
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help, e.g. the request could not be built.
    #[error("{0}")]
    Fatal(String),
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            RequestError::Fatal(e.to_string())
        } else {
            RequestError::Transient(e.to_string())
        }
    }
}

/// Inclusive byte range of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: u64,
    pub end: u64,
}

impl ChunkSpan {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// The drive operations the upload engine relies on.
pub trait DriveApi {
    /// Uploads a whole small file to `item_path` in one request.
    fn put_content(
        &self,
        token: &str,
        item_path: &str,
        data: Vec<u8>,
    ) -> std::result::Result<Reply, RequestError>;

    /// Opens a resumable session for `item_path`, renaming on conflict.
    fn create_upload_session(
        &self,
        token: &str,
        filename: &str,
        item_path: &str,
    ) -> std::result::Result<Reply, RequestError>;

    /// Asks an existing session which ranges it still expects.
    fn query_session(&self, upload_url: &str) -> std::result::Result<Reply, RequestError>;

    /// Sends one chunk of a resumable session.
    fn put_chunk(
        &self,
        upload_url: &str,
        span: ChunkSpan,
        total: u64,
        data: &[u8],
    ) -> std::result::Result<Reply, RequestError>;
}

/// Blocking client for the Microsoft Graph drive API.
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(GraphClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/root:{path}:/{action}` with the path escaped.
    fn item_url(&self, item_path: &str, action: &str) -> String {
        format!(
            "{}/root:{}:/{}",
            self.base_url,
            utf8_percent_encode(item_path, PATH_SEGMENT),
            action
        )
    }
}

impl DriveApi for GraphClient {
    fn put_content(
        &self,
        token: &str,
        item_path: &str,
        data: Vec<u8>,
    ) -> std::result::Result<Reply, RequestError> {
        let res = self
            .client
            .put(self.item_url(item_path, "content"))
            .bearer_auth(token)
            .body(data)
            .send()?;
        into_reply(res)
    }

    fn create_upload_session(
        &self,
        token: &str,
        filename: &str,
        item_path: &str,
    ) -> std::result::Result<Reply, RequestError> {
        let body = json!({
            "item": {
                "@microsoft.graph.conflictBehavior": "rename",
                "name": filename,
            }
        });
        let res = self
            .client
            .post(self.item_url(item_path, "createUploadSession"))
            .bearer_auth(token)
            .json(&body)
            .send()?;
        into_reply(res)
    }

    fn query_session(&self, upload_url: &str) -> std::result::Result<Reply, RequestError> {
        into_reply(self.client.get(upload_url).send()?)
    }

    fn put_chunk(
        &self,
        upload_url: &str,
        span: ChunkSpan,
        total: u64,
        data: &[u8],
    ) -> std::result::Result<Reply, RequestError> {
        // The session URL is pre-authenticated, sending a bearer token to it
        // is rejected.
        let res = self
            .client
            .put(upload_url)
            .header(CONTENT_RANGE, span.content_range(total))
            .body(data.to_vec())
            .send()?;
        into_reply(res)
    }
}

fn into_reply(res: Response) -> std::result::Result<Reply, RequestError> {
    let status = res.status().as_u16();
    let text = res.text()?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok(Reply { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_url_escapes_path_but_keeps_slashes() {
        let client = GraphClient::new(
            "https://graph.microsoft.com/v1.0/me/drive/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.item_url("/my docs/a#1.txt", "content"),
            "https://graph.microsoft.com/v1.0/me/drive/root:/my%20docs/a%231.txt:/content"
        );
    }

    #[test]
    fn content_range_is_inclusive() {
        let span = ChunkSpan {
            start: 10_485_760,
            end: 20_971_519,
        };
        assert_eq!(span.len(), 10_485_760);
        assert_eq!(span.content_range(26_214_400), "bytes 10485760-20971519/26214400");
    }

    #[test]
    fn next_expected_offset_reads_first_range() {
        let reply = Reply::new(
            200,
            json!({ "nextExpectedRanges": ["20971520-", "30000000-30000100"] }),
        );
        assert_eq!(reply.next_expected_offset(), Some(20_971_520));

        let bounded = Reply::new(200, json!({ "nextExpectedRanges": ["0-1023"] }));
        assert_eq!(bounded.next_expected_offset(), Some(0));
    }

    #[test]
    fn next_expected_offset_missing_or_empty() {
        assert_eq!(Reply::new(404, json!({ "error": {} })).next_expected_offset(), None);
        let empty = Reply::new(200, json!({ "nextExpectedRanges": [] }));
        assert_eq!(empty.next_expected_offset(), None);
    }

    #[test]
    fn error_payload_prefers_error_field() {
        let reply = Reply::new(
            404,
            json!({ "error": { "code": "itemNotFound", "message": "gone" } }),
        );
        assert_eq!(
            reply.error_payload(),
            r#"{"code":"itemNotFound","message":"gone"}"#
        );
        let plain = Reply::new(502, Value::String("Bad Gateway".into()));
        assert_eq!(plain.error_payload(), r#"status 502: "Bad Gateway""#);
    }

    #[test]
    fn item_and_session_fields() {
        let done = Reply::new(201, json!({ "id": "01ABC", "name": "video.mkv" }));
        assert_eq!(done.item_id(), Some("01ABC"));
        let session = Reply::new(200, json!({ "uploadUrl": "https://up.example/s1" }));
        assert_eq!(session.upload_url(), Some("https://up.example/s1"));
        assert_eq!(session.item_id(), None);
        assert!(Reply::new(503, Value::Null).is_server_error());
        assert!(!Reply::new(404, Value::Null).is_server_error());
    }
}
