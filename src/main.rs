//! credvault: encrypted API key vault daemon with on-demand health tests.
//!
//! Runs as a local service, listening on a Unix socket for JSON-RPC
//! requests. Stores third-party API keys per owner and checks them
//! against their providers (OpenAI, Groq, Gemini) on request.
//!
//! Security:
//! - Keys encrypted at rest (AES-256-GCM + Argon2id)
//! - Master key from env or a 0600 file under the data dir
//! - Signed owner tokens on every vault method
//! - Per-owner rate limiting
//! - Secrets never cross the socket boundary
//!
//! Usage:
//!   credvault                               run the daemon
//!   credvault issue-token <owner> [hours]   print a bearer token

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

mod auth;
mod config;
mod health;
mod probes;
mod server;
mod vault;

use auth::{RateLimiter, TokenAuthority};
use config::Config;
use health::{HealthOrchestrator, ProbeDispatcher, ProbeSet};
use vault::store::{CredentialStore, KeyStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(config.json_logs);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let authority = TokenAuthority::bootstrap(&config.data_dir, config.token_secret.as_deref())
        .context("Failed to bootstrap token signing")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_daemon(config, authority).await,
        Some("issue-token") => issue_token(&authority, &args[1..]),
        Some(other) => anyhow::bail!("Unknown command '{}'. Usage: credvault [issue-token <owner> [ttl-hours]]", other),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "credvault=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn issue_token(authority: &TokenAuthority, args: &[String]) -> Result<()> {
    let owner = args.first().context("Usage: credvault issue-token <owner> [ttl-hours]")?;
    let ttl = match args.get(1) {
        Some(hours) => {
            let hours: i64 = hours
                .parse()
                .ok()
                .filter(|h| *h > 0)
                .with_context(|| format!("ttl-hours must be a positive integer, got {:?}", hours))?;
            chrono::Duration::hours(hours)
        }
        None => auth::default_token_ttl(),
    };
    println!("{}", authority.issue(owner, ttl)?);
    Ok(())
}

async fn run_daemon(config: Config, authority: TokenAuthority) -> Result<()> {
    info!("🔑 credvault v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // ── Master Key ──────────────────────────────────────────────────
    let master_passphrase = auth::resolve_secret(
        config.master_key.as_deref(),
        &config.data_dir.join("master.key"),
        "Master key",
    )?;

    // ── Key Store ───────────────────────────────────────────────────
    let store = Arc::new(
        KeyStore::open(&config.db_path, master_passphrase.as_bytes())
            .context("Failed to open key store")?,
    );
    info!(db = %config.db_path.display(), "📦 Key store open");

    // ── Probes ──────────────────────────────────────────────────────
    let client = reqwest::Client::builder()
        .user_agent(concat!("credvault/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(config.probe_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let dispatcher = ProbeDispatcher::new(ProbeSet::http(client, &config.endpoints), config.probe_timeout);
    info!(
        timeout_secs = config.probe_timeout.as_secs(),
        openai = %config.endpoints.openai,
        groq = %config.endpoints.groq,
        gemini = %config.endpoints.gemini,
        "🩺 Provider probes ready"
    );

    // ── JSON-RPC Server ─────────────────────────────────────────────
    let state = server::AppState {
        store: store as Arc<dyn CredentialStore>,
        verifier: Arc::new(authority),
        health: Arc::new(HealthOrchestrator::new(Arc::new(dispatcher))),
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute, 60)),
    };
    let srv = server::Server::new(config.socket_path, state);

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("credvault ready");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    srv.run().await?;

    Ok(())
}
