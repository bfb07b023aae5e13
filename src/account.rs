// Account identities and the access tokens cached for them. The upload
// engine only sees the `AccountResolver` and `TokenProvider` traits; the
// `TokenCache` below is the file-backed implementation the CLI uses.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, UploadError};

const DEFAULT_ENVIRONMENT: &str = "login.microsoftonline.com";
const DEFAULT_AUTHORITY_TYPE: &str = "MSSTS";

/// Identity of a signed-in drive account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub home_account_id: String,
    pub local_account_id: String,
    pub environment: String,
    pub realm: String,
    pub authority_type: String,
}

/// A bearer token ready to be sent to the drive API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Looks up cached accounts. With a selector only matching accounts are
/// returned; without one every account is returned in cache order.
pub trait AccountResolver {
    fn accounts(&self, selector: Option<&str>) -> Vec<Account>;
}

/// Hands out an access token for an account without user interaction.
pub trait TokenProvider {
    fn acquire_token_silent(&self, scopes: &[String], account: &Account) -> Result<AccessToken>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub account: Account,
    pub access_token: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: Vec<CachedToken>,
}

/// Accounts and tokens persisted as one JSON document.
#[derive(Debug)]
pub struct TokenCache {
    path: Option<PathBuf>,
    tokens: Vec<CachedToken>,
    changed: bool,
}

impl TokenCache {
    /// Loads the cache at `path`. A missing file is an empty cache, an
    /// unreadable one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tokens = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<TokenFile>(&text) {
                Ok(file) => file.tokens,
                Err(e) => {
                    warn!("ignoring unreadable token cache {}: {e}", path.display());
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("could not read token cache {}: {e}", path.display());
                Vec::new()
            }
        };
        TokenCache {
            path: Some(path),
            tokens,
            changed: false,
        }
    }

    /// A cache that is never written to disk.
    pub fn in_memory(tokens: Vec<CachedToken>) -> Self {
        TokenCache {
            path: None,
            tokens,
            changed: false,
        }
    }

    pub fn all(&self) -> &[CachedToken] {
        &self.tokens
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    /// Adds `token`, replacing any entry for the same home account.
    pub fn insert(&mut self, token: CachedToken) {
        let id = token.account.home_account_id.clone();
        match self.tokens.iter_mut().find(|t| t.account.home_account_id == id) {
            Some(existing) => *existing = token,
            None => self.tokens.push(token),
        }
        self.changed = true;
    }

    pub fn remove(&mut self, account: &Account) -> bool {
        let before = self.tokens.len();
        self.tokens
            .retain(|t| t.account.home_account_id != account.home_account_id);
        let removed = self.tokens.len() != before;
        self.changed |= removed;
        removed
    }

    /// Writes the cache if it changed. Failures are logged, never returned:
    /// losing a token only means the account has to be added again.
    pub fn save(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        if !self.changed {
            return;
        }
        let file = TokenFile {
            tokens: self.tokens.clone(),
        };
        let result = serde_json::to_string_pretty(&file)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(path, json).map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => {
                debug!("saved token cache to {}", path.display());
                self.changed = false;
            }
            Err(e) => warn!("could not save token cache {}: {e}", path.display()),
        }
    }
}

impl AccountResolver for TokenCache {
    fn accounts(&self, selector: Option<&str>) -> Vec<Account> {
        self.tokens
            .iter()
            .map(|t| &t.account)
            .filter(|a| match selector {
                Some(name) => a.username.eq_ignore_ascii_case(name.trim()),
                None => true,
            })
            .cloned()
            .collect()
    }
}

impl TokenProvider for TokenCache {
    fn acquire_token_silent(&self, scopes: &[String], account: &Account) -> Result<AccessToken> {
        let cached = self
            .tokens
            .iter()
            .find(|t| t.account.home_account_id == account.home_account_id)
            .ok_or_else(|| UploadError::Token(format!("no token cached for {}", account.username)))?;

        // Scope names are case sensitive.
        if let Some(missing) = scopes.iter().find(|s| !cached.scopes.contains(s)) {
            return Err(UploadError::Token(format!(
                "token for {} does not grant scope {missing}, add the account again",
                account.username
            )));
        }
        if let Some(expires_at) = cached.expires_at {
            if expires_at <= Utc::now() {
                return Err(UploadError::Token(format!(
                    "token for {} expired at {expires_at}, add the account again",
                    account.username
                )));
            }
        }
        Ok(AccessToken {
            access_token: cached.access_token.clone(),
            expires_at: cached.expires_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct Claims {
    preferred_username: Option<String>,
    upn: Option<String>,
    unique_name: Option<String>,
    oid: Option<String>,
    tid: Option<String>,
    exp: Option<i64>,
    scp: Option<String>,
}

/// Builds a cache entry from a raw JWT access token by reading its claims.
/// The signature is not checked, the drive API does that.
pub fn token_from_jwt(raw: &str) -> Result<CachedToken> {
    let raw = raw.trim();
    let mut parts = raw.split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(UploadError::Token("access token is not a JWT".into())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| UploadError::Token(format!("malformed token payload: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| UploadError::Token(format!("malformed token claims: {e}")))?;

    let username = claims
        .preferred_username
        .or(claims.upn)
        .or(claims.unique_name)
        .ok_or_else(|| UploadError::Token("token carries no username claim".into()))?;
    let oid = claims.oid.unwrap_or_else(|| username.clone());
    let tid = claims.tid.unwrap_or_default();

    Ok(CachedToken {
        account: Account {
            username,
            home_account_id: format!("{oid}.{tid}"),
            local_account_id: oid,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            realm: tid,
            authority_type: DEFAULT_AUTHORITY_TYPE.to_string(),
        },
        access_token: raw.to_string(),
        scopes: claims
            .scp
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        expires_at: claims.exp.and_then(|e| Utc.timestamp_opt(e, 0).single()),
    })
}
