//! Unix socket JSON-RPC server with bearer token authentication.
//!
//! Listens on `<data_dir>/credvault.sock` for line-delimited JSON-RPC 2.0
//! requests. Local-only, no TCP exposure.
//!
//! Auth policy:
//! - `vault.ping` is open
//! - everything else needs a signed owner token in the `auth` field
//! - rate limiting is enforced per owner

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{error, info, info_span, warn, Instrument};

use crate::auth::{AuthError, IdentityVerifier, RateLimiter};
use crate::health::{BatchReport, HealthOrchestrator};
use crate::vault::store::{CredentialRecord, CredentialStore, NewCredential, StoreError};

/// Bound on the size of one request line.
const MAX_REQUEST_BYTES: u64 = 1_048_576;

mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32000;
    pub const AUTH: i32 = -32001;
    pub const RATE_LIMITED: i32 = -32002;
    pub const NOT_FOUND: i32 = -32004;
    pub const CONFLICT: i32 = -32009;
}

// ── JSON-RPC Types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
    /// Bearer token for authentication
    auth: Option<String>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), result: Some(result), error: None, id }
    }
    fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
            id,
        }
    }
    fn auth_error(id: Option<Value>, err: &AuthError) -> Self {
        let message = match err {
            AuthError::Missing => "Missing auth token",
            AuthError::Expired | AuthError::Invalid => "Invalid or expired token",
        };
        Self::error(id, codes::AUTH, message)
    }
    fn rate_limited(id: Option<Value>, retry_after_secs: u64) -> Self {
        Self::error(id, codes::RATE_LIMITED, format!("Rate limited, retry after {} seconds", retry_after_secs))
    }
    fn not_found(id: Option<Value>) -> Self {
        Self::error(id, codes::NOT_FOUND, "API key not found")
    }
    fn store_error(id: Option<Value>, err: StoreError) -> Self {
        match err {
            StoreError::Invalid(msg) => Self::error(id, codes::INVALID_PARAMS, msg),
            StoreError::Duplicate => Self::error(id, codes::CONFLICT, StoreError::Duplicate.to_string()),
            other => {
                error!(error = %other, "Credential store failure");
                Self::error(id, codes::INTERNAL, other.to_string())
            }
        }
    }
}

// ── Server ──────────────────────────────────────────────────────────

/// Everything a request handler needs.
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub health: Arc<HealthOrchestrator>,
    pub rate_limiter: Arc<RateLimiter>,
}

pub struct Server {
    socket_path: PathBuf,
    state: Arc<AppState>,
}

impl Server {
    pub fn new(socket_path: PathBuf, state: AppState) -> Self {
        Self {
            socket_path,
            state: Arc::new(state),
        }
    }

    pub async fn run(&self) -> Result<()> {
        // Remove stale socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(
            socket = %self.socket_path.display(),
            "🔑 credvault listening (auth enforced)"
        );

        loop {
            let (stream, _) = listener.accept().await?;
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut reader = BufReader::new(reader);
                let mut line = String::new();

                loop {
                    let response = match read_request_line(&mut reader, &mut line, MAX_REQUEST_BYTES).await {
                        Ok(RequestLine::Eof) | Err(_) => break,
                        Ok(RequestLine::TooLarge) => {
                            warn!(limit = MAX_REQUEST_BYTES, "Request line too large, closing connection");
                            JsonRpcResponse::error(None, codes::INVALID_REQUEST, "Request too large")
                        }
                        Ok(RequestLine::Line) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let span = info_span!("rpc", request_id = %uuid::Uuid::new_v4());
                            handle_request(&line, &state).instrument(span).await
                        }
                    };
                    let oversized = response.error.as_ref().is_some_and(|e| e.code == codes::INVALID_REQUEST);
                    let resp_json = serde_json::to_string(&response).unwrap_or_default();
                    if writer.write_all(resp_json.as_bytes()).await.is_err() { break; }
                    if writer.write_all(b"\n").await.is_err() { break; }
                    // The rest of an oversized line cannot be resynchronised.
                    if oversized { break; }
                }
            });
        }
    }
}

enum RequestLine {
    Line,
    TooLarge,
    Eof,
}

/// Read one newline-terminated request of at most `max` bytes into `line`.
async fn read_request_line<R>(reader: &mut R, line: &mut String, max: u64) -> std::io::Result<RequestLine>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = reader.take(max + 1).read_line(line).await?;
    if read == 0 {
        return Ok(RequestLine::Eof);
    }
    if read as u64 > max {
        return Ok(RequestLine::TooLarge);
    }
    Ok(RequestLine::Line)
}

// ── Auth Policy ─────────────────────────────────────────────────────

fn requires_auth(method: &str) -> bool {
    method != "vault.ping"
}

// ── Request Handling ────────────────────────────────────────────────

async fn handle_request(raw: &str, state: &AppState) -> JsonRpcResponse {
    let req: JsonRpcRequest = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => return JsonRpcResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {}", e)),
    };

    if !requires_auth(&req.method) {
        return match req.method.as_str() {
            "vault.ping" => JsonRpcResponse::success(req.id, json!({ "message": "credvault is running" })),
            _ => JsonRpcResponse::error(req.id, codes::METHOD_NOT_FOUND, format!("Unknown method: {}", req.method)),
        };
    }

    // ── Auth check ──
    let owner = match state.verifier.verify(req.auth.as_deref()) {
        Ok(owner) => owner,
        Err(e) => {
            warn!(method = %req.method, reason = %e, "Request rejected");
            return JsonRpcResponse::auth_error(req.id, &e);
        }
    };

    // ── Rate limiting ──
    if let Err(retry_secs) = state.rate_limiter.check(&owner) {
        warn!(owner = %owner, method = %req.method, "Rate limited");
        return JsonRpcResponse::rate_limited(req.id, retry_secs);
    }

    let params = req.params.unwrap_or(Value::Null);

    match req.method.as_str() {
        "vault.keys.list" => handle_list_keys(req.id, &owner, state),
        "vault.keys.create" => handle_create_key(req.id, params, &owner, state),
        "vault.keys.delete" => handle_delete_key(req.id, &params, &owner, state),
        "vault.health.testAll" => handle_test_all(req.id, &owner, state).await,
        "vault.health.testKey" => handle_test_key(req.id, &params, &owner, state).await,
        _ => JsonRpcResponse::error(req.id, codes::METHOD_NOT_FOUND, format!("Unknown method: {}", req.method)),
    }
}

/// Accept a key id as a JSON integer or an integer string.
fn key_id_param(params: &Value, field: &str) -> Option<i64> {
    let raw = params.get(field)?;
    raw.as_i64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
}

/// `abcd...wxyz` preview; short secrets are fully hidden.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".into();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Public view of a record. Never includes the secret.
fn key_view(record: &CredentialRecord) -> Value {
    json!({
        "id": record.id,
        "keyName": record.key_name,
        "service": record.service,
        "keyPreview": mask_secret(&record.secret_value),
        "rateLimit": record.rate_limit,
        "expiresAt": record.expires_at.map(|dt| dt.to_rfc3339()),
        "ipAllowlist": record.ip_allowlist,
        "createdAt": record.created_at.to_rfc3339(),
    })
}

fn handle_list_keys(id: Option<Value>, owner: &str, state: &AppState) -> JsonRpcResponse {
    match state.store.list(owner) {
        Ok(records) => {
            let keys: Vec<Value> = records.iter().map(key_view).collect();
            JsonRpcResponse::success(id, json!({ "keys": keys }))
        }
        Err(e) => JsonRpcResponse::store_error(id, e),
    }
}

fn handle_create_key(id: Option<Value>, params: Value, owner: &str, state: &AppState) -> JsonRpcResponse {
    let new: NewCredential = match serde_json::from_value(params) {
        Ok(n) => n,
        Err(e) => return JsonRpcResponse::error(id, codes::INVALID_PARAMS, format!("Invalid params: {}", e)),
    };

    match state.store.create(owner, &new) {
        Ok(record) => {
            info!(owner = %owner, key_id = record.id, service = %record.service, "🔑 API key stored");
            JsonRpcResponse::success(id, json!({ "key": key_view(&record) }))
        }
        Err(e) => JsonRpcResponse::store_error(id, e),
    }
}

fn handle_delete_key(id: Option<Value>, params: &Value, owner: &str, state: &AppState) -> JsonRpcResponse {
    let Some(key_id) = key_id_param(params, "id") else {
        return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing or invalid param: id");
    };

    match state.store.delete(owner, key_id) {
        Ok(true) => {
            info!(owner = %owner, key_id, "API key deleted");
            JsonRpcResponse::success(id, json!({ "ok": true, "deleted": key_id }))
        }
        Ok(false) => JsonRpcResponse::not_found(id),
        Err(e) => JsonRpcResponse::store_error(id, e),
    }
}

async fn handle_test_all(id: Option<Value>, owner: &str, state: &AppState) -> JsonRpcResponse {
    let records = match state.store.list(owner) {
        Ok(r) => r,
        Err(e) => return JsonRpcResponse::store_error(id, e),
    };

    match state.health.test_all(&records).await {
        BatchReport::NoKeys => JsonRpcResponse::success(id, json!({
            "message": "No API keys found to test",
            "noKeys": true,
            "results": [],
        })),
        BatchReport::Tested { results, summary } => JsonRpcResponse::success(id, json!({
            "results": results,
            "summary": summary,
        })),
    }
}

async fn handle_test_key(id: Option<Value>, params: &Value, owner: &str, state: &AppState) -> JsonRpcResponse {
    let Some(key_id) = key_id_param(params, "keyId") else {
        return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing or invalid param: keyId");
    };

    let record = match state.store.find(owner, key_id) {
        Ok(Some(r)) => r,
        Ok(None) => return JsonRpcResponse::not_found(id),
        Err(e) => return JsonRpcResponse::store_error(id, e),
    };

    let result = state.health.test_one(&record).await;
    JsonRpcResponse::success(id, json!({ "result": result }))
}
