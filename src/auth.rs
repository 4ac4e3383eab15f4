//! Auth module: signed bearer tokens and per-owner rate limiting.
//!
//! Tokens are `base64url(claims).hex(hmac)`:
//!
//!   claims  = {"sub": "<owner id>", "exp": <unix seconds>}
//!   hmac    = HMAC-SHA256(signing secret, base64url(claims))
//!
//! The signing secret is resolved once at boot:
//!
//!   CREDVAULT_TOKEN_SECRET (env, authoritative)
//!        ↓ else
//!   <data_dir>/token.secret (0600)
//!        ↓ else
//!   freshly generated 256-bit secret, written atomically
//!
//! The master key passphrase follows the same path via `master.key`.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;
use zeroize::{Zeroize, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

const SECRET_LEN: usize = 32; // 256 bits

/// Matches the lifetime of tokens handed out by the account service.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 7 * 24;

pub fn default_token_ttl() -> Duration {
    Duration::hours(DEFAULT_TOKEN_TTL_HOURS)
}

pub type OwnerId = String;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing auth token")]
    Missing,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,
}

/// Resolves a bearer token to the owner it was issued for.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: Option<&str>) -> Result<OwnerId, AuthError>;
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Issues and verifies HMAC-signed owner tokens.
pub struct TokenAuthority {
    secret: Zeroizing<Vec<u8>>,
}

impl TokenAuthority {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Load the signing secret from `override_secret` or `<data_dir>/token.secret`,
    /// generating the file on first boot.
    pub fn bootstrap(data_dir: &Path, override_secret: Option<&str>) -> Result<Self> {
        let secret = resolve_secret(override_secret, &data_dir.join("token.secret"), "Token signing secret")?;
        Ok(Self::new(secret.as_bytes()))
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::Invalid)
    }

    pub fn issue(&self, owner: &str, ttl: Duration) -> Result<String> {
        let owner = owner.trim();
        if owner.is_empty() {
            anyhow::bail!("Owner id must not be empty");
        }
        let claims = Claims {
            sub: owner.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }
}

impl IdentityVerifier for TokenAuthority {
    fn verify(&self, token: Option<&str>) -> Result<OwnerId, AuthError> {
        let token = token.map(str::trim).unwrap_or_default();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let (payload, signature) = token.split_once('.').ok_or(AuthError::Invalid)?;
        let signature = hex::decode(signature).map_err(|_| AuthError::Invalid)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&signature).map_err(|_| AuthError::Invalid)?;

        let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| AuthError::Invalid)?;
        let claims: Claims = serde_json::from_slice(&raw).map_err(|_| AuthError::Invalid)?;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::Invalid);
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims.sub)
    }
}

// ── Secret Files ────────────────────────────────────────────────────

/// Resolve a boot secret: explicit override, then file, then generate.
///
/// An existing file that does not parse is an error rather than being
/// replaced, since the master key file guards data already on disk.
pub fn resolve_secret(override_secret: Option<&str>, path: &Path, label: &str) -> Result<Zeroizing<String>> {
    if let Some(secret) = override_secret.map(str::trim).filter(|s| !s.is_empty()) {
        info!("{} taken from environment", label);
        return Ok(Zeroizing::new(secret.to_string()));
    }

    if path.exists() {
        let secret = load_secret_file(path)
            .with_context(|| format!("{} file {} is unusable", label, path.display()))?;
        info!(path = %path.display(), "{} loaded from file", label);
        return Ok(secret);
    }

    info!("🔐 No {} found, generating new 256-bit secret", label.to_lowercase());
    let secret = generate_secret();
    atomic_write_secret_file(path, &secret)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "{} written (0600)", label);
    Ok(secret)
}

/// Cryptographically random 256-bit secret, hex-encoded.
fn generate_secret() -> Zeroizing<String> {
    let mut bytes = [0u8; SECRET_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let hex = Zeroizing::new(hex::encode(bytes));
    bytes.zeroize();
    hex
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
///
/// A crash before the rename leaves the previous file intact.
fn atomic_write_secret_file(path: &Path, secret: &str) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .context("Failed to create temp secret file")?;

        // Permissions before content.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(secret.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path).context("Atomic rename failed")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

fn load_secret_file(path: &Path) -> Result<Zeroizing<String>> {
    let content = Zeroizing::new(fs::read_to_string(path).context("Failed to read secret file")?);
    let trimmed = content.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Secret file is empty");
    }
    if trimmed.len() != SECRET_LEN * 2 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("Secret file contains invalid data (expected 64 hex chars)");
    }
    Ok(Zeroizing::new(trimmed.to_string()))
}

// ── Per-Owner Rate Limiting ─────────────────────────────────────────

/// Sliding-window rate limiter keyed by owner id.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
    max_requests: usize,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window_secs,
        }
    }

    /// Ok(()) if allowed, Err with seconds until a slot frees up otherwise.
    pub fn check(&self, caller: &str) -> Result<(), u64> {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(self.window_secs);

        // Drop expired timestamps for every caller, and callers left idle.
        windows.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < window);
            !timestamps.is_empty()
        });

        let timestamps = windows.entry(caller.to_string()).or_default();

        if timestamps.len() >= self.max_requests {
            let waited = timestamps
                .first()
                .map(|oldest| now.duration_since(*oldest).as_secs())
                .unwrap_or(0);
            return Err(window.as_secs().saturating_sub(waited).max(1));
        }

        timestamps.push(now);
        Ok(())
    }

    #[cfg(test)]
    fn tracked_callers(&self) -> usize {
        self.windows.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
