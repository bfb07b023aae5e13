// Upload engine: drives one file to the drive, either in a single request
// or through a resumable session sent chunk by chunk.
//
// Large uploads persist their record after every chunk. The server's
// `nextExpectedRanges` decides where a resumed upload continues, the local
// record only says which session to ask.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::account::{AccountResolver, TokenProvider};
use crate::api::{ChunkSpan, DriveApi, Reply, RequestError};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Result, UploadError};
use crate::hasher::{self, FingerprintStrategy};
use crate::record::{UploadRecord, UploadStatus};
use crate::retry::{Retrier, RetryNotice};
use crate::state::StateStore;

/// Files up to this size go up in one request and leave no state behind.
pub const SMALL_FILE_LIMIT: u64 = 4 * 1024 * 1024;
/// Every chunk length is a multiple of this.
pub const CHUNK_ALIGNMENT: u64 = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Warning,
}

/// Receives progress from the engine. Every method defaults to a no-op.
pub trait ProgressObserver {
    fn on_start(&mut self, _record: &UploadRecord) {}
    fn on_progress(&mut self, _record: &UploadRecord) {}
    fn on_retry(&mut self, _notice: &RetryNotice) {}
    fn on_message(&mut self, _kind: MessageKind, _text: &str) {}
}

pub struct NoProgress;

impl ProgressObserver for NoProgress {}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Finished(UploadRecord),
    /// Cancelled between chunks, the record stays cached for a later run.
    Stopped(UploadRecord),
    /// The file was empty, nothing was sent.
    Empty,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: u64,
    pub fingerprint: FingerprintStrategy,
    pub scopes: Vec<String>,
}

impl From<&Config> for UploadOptions {
    fn from(config: &Config) -> Self {
        UploadOptions {
            chunk_size: config.chunk_size_bytes(),
            fingerprint: config.fingerprint,
            scopes: config.scopes.clone(),
        }
    }
}

pub struct Uploader<'a> {
    api: &'a dyn DriveApi,
    accounts: &'a dyn AccountResolver,
    tokens: &'a dyn TokenProvider,
    store: StateStore,
    retrier: Retrier,
    options: UploadOptions,
    cancel: CancellationToken,
    observer: Box<dyn ProgressObserver + 'a>,
}

impl<'a> Uploader<'a> {
    pub fn new(
        api: &'a dyn DriveApi,
        accounts: &'a dyn AccountResolver,
        tokens: &'a dyn TokenProvider,
        store: StateStore,
        retrier: Retrier,
        options: UploadOptions,
        cancel: CancellationToken,
    ) -> Self {
        Uploader {
            api,
            accounts,
            tokens,
            store,
            retrier,
            options,
            cancel,
            observer: Box::new(NoProgress),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver + 'a>) -> Self {
        self.observer = observer;
        self
    }

    /// Uploads `local_path` into `remote_dir` for the account picked by
    /// `selector` (the first cached account when `None`).
    pub fn upload(
        &mut self,
        local_path: &Path,
        remote_dir: &str,
        selector: Option<&str>,
    ) -> Result<UploadOutcome> {
        let not_a_file = || UploadError::NotAFile(local_path.to_path_buf());
        let meta = fs::metadata(local_path).map_err(|_| not_a_file())?;
        if !meta.is_file() {
            return Err(not_a_file());
        }
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(not_a_file)?
            .to_string();

        let size = meta.len();
        if size == 0 {
            warn!("{} is empty, nothing to upload", local_path.display());
            self.observer
                .on_message(MessageKind::Warning, "File size is 0, nothing to be uploaded.");
            return Ok(UploadOutcome::Empty);
        }

        let remote_dir = normalize_remote_dir(remote_dir);
        let account = self
            .accounts
            .accounts(selector)
            .into_iter()
            .next()
            .ok_or_else(|| UploadError::InvalidAccount(selector.unwrap_or("<default>").to_string()))?;

        let record = UploadRecord::new(
            filename,
            size,
            local_path.to_string_lossy().into_owned(),
            hasher::fingerprint(local_path, self.options.fingerprint)?,
            remote_dir,
            account,
        );
        let token = self
            .tokens
            .acquire_token_silent(&self.options.scopes, &record.account)?;

        if size <= SMALL_FILE_LIMIT {
            self.upload_small(record, &token.access_token)
        } else {
            self.upload_large(record, &token.access_token)
        }
    }

    fn upload_small(&mut self, mut record: UploadRecord, token: &str) -> Result<UploadOutcome> {
        let data = fs::read(&record.local_path)?;
        let item_path = record.item_path();
        self.observer.on_start(&record);
        self.observer.on_message(
            MessageKind::Info,
            "Uploading small file, do not interrupt.",
        );

        let api = self.api;
        let started = Instant::now();
        let reply = self.send(|| api.put_content(token, &item_path, data.clone()))?;
        if reply.item_id().is_none() {
            return Err(UploadError::Remote(reply.error_payload()));
        }

        let elapsed = started.elapsed().as_secs_f64();
        record.spend_time = elapsed;
        record.speed = bytes_per_sec(record.total_size, elapsed);
        record.mark_finished();
        info!(file = %record.filename, size = record.total_size, "uploaded small file");
        self.observer.on_progress(&record);
        self.observer.on_message(
            MessageKind::Success,
            &format!("Upload succeeded. File: {}", record.filename),
        );
        Ok(UploadOutcome::Finished(record))
    }

    fn upload_large(&mut self, fresh: UploadRecord, token: &str) -> Result<UploadOutcome> {
        let mut record = self.resume_or_persist(fresh)?;
        self.observer.on_start(&record);
        self.observer.on_message(
            MessageKind::Info,
            "Uploading large file, press Ctrl-C to stop.",
        );

        match self.drive_session(&mut record, token) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.record_failure(&mut record, &err);
                Err(err)
            }
        }
    }

    /// Adopts the cached record for this fingerprint if there is a usable
    /// one, otherwise saves `fresh` so even a crash before the first chunk
    /// leaves something to resume.
    fn resume_or_persist(&mut self, fresh: UploadRecord) -> Result<UploadRecord> {
        match self.store.load(&fresh.fingerprint) {
            Ok(Some(mut cached)) if cached.total_size == fresh.total_size => {
                info!(file = %cached.filename, bytes_finished = cached.bytes_finished, "resuming cached upload");
                if cached.remote_dir != fresh.remote_dir {
                    warn!(
                        "resuming into {} where the upload was started, not {}",
                        cached.remote_dir, fresh.remote_dir
                    );
                }
                cached.local_path = fresh.local_path;
                return Ok(cached);
            }
            Ok(Some(cached)) => warn!(
                "cached upload of {} has size {}, file now has {}, starting over",
                cached.filename, cached.total_size, fresh.total_size
            ),
            Ok(None) => {}
            Err(UploadError::StateDecode(e)) => warn!("ignoring cached upload state: {e}"),
            Err(e) => return Err(e),
        }
        self.store.save(&fresh)?;
        Ok(fresh)
    }

    fn drive_session(&mut self, record: &mut UploadRecord, token: &str) -> Result<UploadOutcome> {
        let api = self.api;

        let start = if record.upload_url.is_empty() {
            let filename = record.filename.clone();
            let item_path = record.item_path();
            let reply = self.send(|| api.create_upload_session(token, &filename, &item_path))?;
            let url = reply
                .upload_url()
                .ok_or_else(|| UploadError::SessionCreate(reply.error_payload()))?;
            record.upload_url = url.to_string();
            self.store.save(record)?;
            info!(file = %record.filename, "created upload session");
            reply.next_expected_offset().unwrap_or(0)
        } else {
            let url = record.upload_url.clone();
            let reply = self.send(|| server_errors_as_transient(api.query_session(&url)))?;
            reply
                .next_expected_offset()
                .ok_or_else(|| UploadError::SessionExpired(reply.error_payload()))?
        };
        if start >= record.total_size {
            return Err(UploadError::SessionExpired(format!(
                "server expects offset {start} of a {} byte file",
                record.total_size
            )));
        }

        record.status = UploadStatus::Running;
        record.bytes_finished = start;
        self.store.save(record)?;
        self.observer.on_progress(record);

        let chunk_size = effective_chunk_size(self.options.chunk_size, record.total_size);
        let mut file = File::open(&record.local_path)?;
        let mut buf = vec![0u8; chunk_size as usize];
        let total = record.total_size;

        loop {
            if self.cancel.is_requested() {
                record.mark_stopped();
                self.store.save(record)?;
                info!(file = %record.filename, bytes_finished = record.bytes_finished, "upload stopped");
                self.observer.on_progress(record);
                self.observer.on_message(
                    MessageKind::Warning,
                    &format!("Upload stopped. File: {}", record.filename),
                );
                return Ok(UploadOutcome::Stopped(record.clone()));
            }
            if record.bytes_finished >= total {
                return Err(UploadError::Remote(
                    "every byte was acknowledged but the item was never returned".into(),
                ));
            }

            let span = chunk_span(record.bytes_finished, chunk_size, total);
            let data = &mut buf[..span.len() as usize];
            file.seek(SeekFrom::Start(span.start))?;
            file.read_exact(data)?;
            let data: &[u8] = data;

            let url = record.upload_url.as_str();
            let started = Instant::now();
            let reply =
                self.send(|| server_errors_as_transient(api.put_chunk(url, span, total, data)))?;
            if !(200..300).contains(&reply.status) {
                return Err(UploadError::Remote(reply.error_payload()));
            }

            let elapsed = started.elapsed().as_secs_f64();
            record.bytes_finished = span.end + 1;
            record.speed = bytes_per_sec(span.len(), elapsed);
            record.spend_time += elapsed;
            debug!(range = %span.content_range(total), status = reply.status, "sent chunk");

            if reply.item_id().is_some() {
                record.mark_finished();
                self.store.delete(&record.fingerprint)?;
                info!(file = %record.filename, size = total, "upload finished");
                self.observer.on_progress(record);
                self.observer.on_message(
                    MessageKind::Success,
                    &format!("Upload succeeded. File: {}", record.filename),
                );
                return Ok(UploadOutcome::Finished(record.clone()));
            }

            self.store.save(record)?;
            self.observer.on_progress(record);
        }
    }

    /// Session-level failures drop the record so the next run starts a new
    /// session; anything else keeps it resumable with the error noted.
    fn record_failure(&mut self, record: &mut UploadRecord, err: &UploadError) {
        if err.discards_session() {
            if let Err(e) = self.store.delete(&record.fingerprint) {
                warn!("could not remove upload state for {}: {e}", record.filename);
            }
            return;
        }
        record.last_error = err.to_string();
        record.mark_stopped();
        if let Err(e) = self.store.save(record) {
            warn!("could not save upload state for {}: {e}", record.filename);
        }
    }

    fn send<T>(
        &mut self,
        op: impl FnMut() -> std::result::Result<T, RequestError>,
    ) -> Result<T> {
        let observer = &mut self.observer;
        self.retrier
            .run(&self.cancel, &mut |notice| observer.on_retry(notice), op)
    }
}

/// Trims, turns `\` into `/` and makes sure the path starts and ends with `/`.
pub fn normalize_remote_dir(raw: &str) -> String {
    let mut dir = raw.trim().replace('\\', "/");
    if !dir.starts_with('/') {
        dir.insert(0, '/');
    }
    if !dir.ends_with('/') {
        dir.push('/');
    }
    dir
}

/// A 5xx reply is retried like a dropped connection.
fn server_errors_as_transient(
    result: std::result::Result<Reply, RequestError>,
) -> std::result::Result<Reply, RequestError> {
    match result {
        Ok(reply) if reply.is_server_error() => Err(RequestError::Transient(reply.error_payload())),
        other => other,
    }
}

/// Rounds down to a multiple of `CHUNK_ALIGNMENT`, never below one unit.
fn align_down(n: u64) -> u64 {
    (n / CHUNK_ALIGNMENT * CHUNK_ALIGNMENT).max(CHUNK_ALIGNMENT)
}

/// The configured chunk size aligned down, and shrunk below `total` for
/// files smaller than one chunk.
pub fn effective_chunk_size(configured: u64, total: u64) -> u64 {
    let configured = align_down(configured);
    if total < configured {
        align_down(total)
    } else {
        configured
    }
}

/// The next span starting at `offset`. A span that would run past the end
/// is replaced by the shortest aligned span ending on the last byte.
pub fn chunk_span(offset: u64, chunk_size: u64, total: u64) -> ChunkSpan {
    let end = offset + align_down(chunk_size) - 1;
    if end < total {
        return ChunkSpan { start: offset, end };
    }
    let left = total - offset;
    let len = (left.div_ceil(CHUNK_ALIGNMENT) * CHUNK_ALIGNMENT).min(total);
    ChunkSpan {
        start: total - len,
        end: total - 1,
    }
}

fn bytes_per_sec(bytes: u64, secs: f64) -> u64 {
    if secs <= 0.0 {
        return bytes;
    }
    (bytes as f64 / secs) as u64
}
