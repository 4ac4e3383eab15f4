//! Credential store: owner-scoped encrypted CRUD for third-party API
//! keys, backed by SQLite.
//!
//! Secrets are sealed before hitting disk and only opened in memory.
//! Every query is scoped to the owner resolved from the bearer token;
//! a record owned by someone else is indistinguishable from a missing one.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{generate_salt, CipherError, MasterKey};

/// Default per-key rate limit when the caller does not supply one.
pub const DEFAULT_RATE_LIMIT: i64 = 1000;

/// Sentinel sealed into `vault_meta` so a wrong master key fails at open
/// time instead of on the first read.
const CHECK_PLAINTEXT: &[u8] = b"credvault-master-key-check";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Vault cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid master key: database was created with a different key")]
    InvalidMasterKey,

    #[error("Invalid credential: {0}")]
    Invalid(String),

    #[error("This API key is already stored")]
    Duplicate,

    #[error("Credential store lock poisoned")]
    Poisoned,
}

// ── Records ─────────────────────────────────────────────────────────

/// A stored credential with its secret opened in memory.
#[derive(Clone)]
pub struct CredentialRecord {
    pub id: i64,
    pub owner_id: String,
    pub key_name: String,
    pub service: String,
    pub secret_value: Zeroizing<String>,
    pub rate_limit: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_allowlist: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("key_name", &self.key_name)
            .field("service", &self.service)
            .field("secret_value", &"<redacted>")
            .field("rate_limit", &self.rate_limit)
            .field("expires_at", &self.expires_at)
            .field("ip_allowlist", &self.ip_allowlist)
            .finish()
    }
}

/// Input for `CredentialStore::create`. The secret is wiped on drop.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct NewCredential {
    #[zeroize(skip)]
    pub key_name: String,
    #[zeroize(skip)]
    pub service: String,
    #[serde(alias = "apiKey")]
    pub secret_value: String,
    #[zeroize(skip)]
    #[serde(default)]
    pub rate_limit: Option<i64>,
    #[zeroize(skip)]
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[zeroize(skip)]
    #[serde(default, alias = "ipWhitelist")]
    pub ip_allowlist: Option<Vec<String>>,
}

impl NewCredential {
    /// Check the record invariants before anything touches the database.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.key_name.trim().is_empty() {
            return Err(StoreError::Invalid("keyName must not be empty".into()));
        }
        if self.service.trim().is_empty() {
            return Err(StoreError::Invalid("service must not be empty".into()));
        }
        if self.secret_value.trim().is_empty() {
            return Err(StoreError::Invalid("secretValue must not be empty".into()));
        }
        if let Some(limit) = self.rate_limit {
            if limit <= 0 {
                return Err(StoreError::Invalid("rateLimit must be positive".into()));
            }
        }
        for entry in self.ip_allowlist.iter().flatten() {
            if !is_valid_allowlist_entry(entry) {
                return Err(StoreError::Invalid(format!(
                    "ipAllowlist entry '{}' is not an IP address or CIDR range",
                    entry
                )));
            }
        }
        Ok(())
    }
}

/// Accepts `10.0.0.1`, `::1`, `10.0.0.0/8`, `2001:db8::/32`.
fn is_valid_allowlist_entry(entry: &str) -> bool {
    let (addr, prefix) = match entry.trim().split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (entry.trim(), None),
    };
    let Ok(ip) = addr.parse::<IpAddr>() else {
        return false;
    };
    match prefix {
        None => true,
        Some(p) => {
            let max = if ip.is_ipv4() { 32 } else { 128 };
            p.parse::<u8>().map(|bits| bits <= max).unwrap_or(false)
        }
    }
}

// ── Trait ───────────────────────────────────────────────────────────

/// Owner-scoped persistence for credential records.
pub trait CredentialStore: Send + Sync {
    /// Store a new credential and return it with its assigned id.
    fn create(&self, owner_id: &str, new: &NewCredential) -> Result<CredentialRecord, StoreError>;

    /// All of an owner's credentials, newest first.
    fn list(&self, owner_id: &str) -> Result<Vec<CredentialRecord>, StoreError>;

    /// A single credential, only if the owner holds it.
    fn find(&self, owner_id: &str, id: i64) -> Result<Option<CredentialRecord>, StoreError>;

    /// Delete a credential. Returns true if it existed for this owner.
    fn delete(&self, owner_id: &str, id: i64) -> Result<bool, StoreError>;
}

// ── SQLite Implementation ───────────────────────────────────────────

pub struct KeyStore {
    db: Mutex<Connection>,
    master: MasterKey,
}

impl KeyStore {
    /// Open (or create) the store at the given path.
    pub fn open(db_path: &Path, master_passphrase: &[u8]) -> Result<Self, StoreError> {
        let db = Connection::open(db_path)?;
        // WAL mode for concurrent reads
        db.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(db, master_passphrase)
    }

    /// Ephemeral store, used by tests.
    #[cfg(test)]
    pub fn open_in_memory(master_passphrase: &[u8]) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, master_passphrase)
    }

    fn init(db: Connection, master_passphrase: &[u8]) -> Result<Self, StoreError> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS vault_meta (
                name TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                key_name TEXT NOT NULL,
                service TEXT NOT NULL,
                encrypted_value BLOB NOT NULL,
                secret_fingerprint TEXT NOT NULL,
                rate_limit INTEGER NOT NULL DEFAULT 1000,
                expires_at TEXT,
                ip_allowlist TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (owner_id, secret_fingerprint)
            );

            CREATE INDEX IF NOT EXISTS idx_api_keys_owner ON api_keys(owner_id, created_at);
            ",
        )?;

        let salt: Option<Vec<u8>> = db
            .query_row("SELECT value FROM vault_meta WHERE name = 'salt'", [], |row| row.get(0))
            .optional()?;

        let master = match salt {
            Some(salt) => {
                let master = MasterKey::derive(master_passphrase, &salt)?;
                let check: Vec<u8> = db.query_row(
                    "SELECT value FROM vault_meta WHERE name = 'check'",
                    [],
                    |row| row.get(0),
                )?;
                if master.open(&check).is_err() {
                    return Err(StoreError::InvalidMasterKey);
                }
                master
            }
            None => {
                let salt = generate_salt();
                let master = MasterKey::derive(master_passphrase, &salt)?;
                let check = master.seal(CHECK_PLAINTEXT)?;
                db.execute(
                    "INSERT INTO vault_meta (name, value) VALUES ('salt', ?1), ('check', ?2)",
                    params![salt.to_vec(), check],
                )?;
                tracing::info!("Initialised new credential vault");
                master
            }
        };

        Ok(Self { db: Mutex::new(db), master })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    fn row_to_record(&self, row: &Row<'_>) -> Result<CredentialRecord, StoreError> {
        let encrypted: Vec<u8> = row.get(4)?;
        let opened = self.master.open(&encrypted)?;
        let secret = String::from_utf8(opened.to_vec())
            .map_err(|_| StoreError::Invalid("stored secret is not valid UTF-8".into()))?;

        let allowlist: Option<String> = row.get(7)?;
        let ip_allowlist = match allowlist {
            Some(json) => Some(serde_json::from_str::<Vec<String>>(&json)?),
            None => None,
        };

        Ok(CredentialRecord {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            key_name: row.get(2)?,
            service: row.get(3)?,
            secret_value: Zeroizing::new(secret),
            rate_limit: row.get(5)?,
            expires_at: row
                .get::<_, Option<String>>(6)?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            ip_allowlist,
            created_at: row
                .get::<_, String>(8)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, owner_id, key_name, service, encrypted_value, rate_limit, \
     expires_at, ip_allowlist, created_at FROM api_keys";

impl CredentialStore for KeyStore {
    fn create(&self, owner_id: &str, new: &NewCredential) -> Result<CredentialRecord, StoreError> {
        new.validate()?;

        // Sealed exactly as given; probes that need a trimmed key trim it.
        let secret = new.secret_value.as_str();
        let encrypted = self.master.seal(secret.as_bytes())?;
        let fingerprint = self.master.fingerprint(secret.as_bytes())?;
        let rate_limit = new.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT);
        let allowlist = match &new.ip_allowlist {
            Some(list) => Some(serde_json::to_string(list)?),
            None => None,
        };
        let now = Utc::now();

        let db = self.conn()?;
        let inserted = db.execute(
            "INSERT INTO api_keys (owner_id, key_name, service, encrypted_value, secret_fingerprint,
                                   rate_limit, expires_at, ip_allowlist, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                owner_id,
                new.key_name.trim(),
                new.service.trim(),
                encrypted,
                fingerprint,
                rate_limit,
                new.expires_at.map(|dt| dt.to_rfc3339()),
                allowlist,
                now.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        let id = db.last_insert_rowid();
        tracing::info!(key_id = id, owner = owner_id, service = %new.service, "Credential stored");

        Ok(CredentialRecord {
            id,
            owner_id: owner_id.to_string(),
            key_name: new.key_name.trim().to_string(),
            service: new.service.trim().to_string(),
            secret_value: Zeroizing::new(secret.to_string()),
            rate_limit,
            expires_at: new.expires_at,
            ip_allowlist: new.ip_allowlist.clone(),
            created_at: now,
        })
    }

    fn list(&self, owner_id: &str) -> Result<Vec<CredentialRecord>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "{} WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![owner_id])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            match self.row_to_record(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // One unreadable row must not hide the owner's other keys.
                    let key_id: Option<i64> = row.get(0).ok();
                    tracing::warn!(?key_id, owner = owner_id, error = %e, "Skipping unreadable credential");
                }
            }
        }
        Ok(records)
    }

    fn find(&self, owner_id: &str, id: i64) -> Result<Option<CredentialRecord>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{} WHERE owner_id = ?1 AND id = ?2", SELECT_COLUMNS))?;
        let mut rows = stmt.query(params![owner_id, id])?;
        match rows.next()? {
            Some(row) => Ok(Some(self.row_to_record(row)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, owner_id: &str, id: i64) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let rows = db.execute(
            "DELETE FROM api_keys WHERE owner_id = ?1 AND id = ?2",
            params![owner_id, id],
        )?;
        if rows > 0 {
            tracing::info!(key_id = id, owner = owner_id, "Credential deleted");
        }
        Ok(rows > 0)
    }
}

#[cfg(test)]
pub(crate) fn new_credential(name: &str, service: &str, secret: &str) -> NewCredential {
    NewCredential {
        key_name: name.to_string(),
        service: service.to_string(),
        secret_value: secret.to_string(),
        rate_limit: None,
        expires_at: None,
        ip_allowlist: None,
    }
}
