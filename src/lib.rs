// Library root
// -----------
// Resumable file uploads to a OneDrive drive through Microsoft Graph. The
// binary (`main.rs`) wires these modules into the `driveup` CLI.
//
// Module responsibilities:
// - `engine`: Drives one upload, in a single request for small files or a
//   chunked resumable session for large ones.
// - `api`: Blocking HTTP client for the drive endpoints, behind the
//   `DriveApi` trait so the engine can be tested without a network.
// - `retry`: Exponential backoff around transport failures.
// - `state` / `record`: The per-file upload record and its on-disk cache.
// - `hasher`: Content fingerprints used as the resume key.
// - `account`: Cached accounts and access tokens.
// - `cancel`: Two-level Ctrl-C handling.
// - `config`, `error`, `format`: Environment settings, the error type and
//   terminal formatting helpers.
// - `ui`: Progress rendering and the interactive account prompts.
pub mod account;
pub mod api;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod hasher;
pub mod record;
pub mod retry;
pub mod state;
pub mod ui;
