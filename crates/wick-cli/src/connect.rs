//! Connection flags, profile resolution and session establishment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use wick_core::auth::{self, AuthMethod};
use wick_core::config::{self, ConnectConfig, Profile, Serializer, DEFAULT_REALM, DEFAULT_URL};
use wick_core::schedule::{self, ScheduleSpec};
use wick_core::{Connector, Session, WickError};

/// Connection flags shared by every command. Each may also come from a
/// `WICK_*` environment variable or a named profile.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// WAMP URL to connect to [default: ws://localhost:8080/ws]
    #[arg(long, global = true, env = "WICK_URL")]
    pub url: Option<String>,

    /// The WAMP realm to join [default: realm1]
    #[arg(long, global = true, env = "WICK_REALM")]
    pub realm: Option<String>,

    /// Authentication method: anonymous, ticket, wampcra or cryptosign
    #[arg(long, global = true, env = "WICK_AUTHMETHOD")]
    pub authmethod: Option<AuthMethod>,

    /// The authid to use, if authenticating
    #[arg(long, global = true, env = "WICK_AUTHID")]
    pub authid: Option<String>,

    /// The authrole to use, if authenticating
    #[arg(long, global = true, env = "WICK_AUTHROLE")]
    pub authrole: Option<String>,

    /// The secret for challenge-response auth
    #[arg(long, global = true, env = "WICK_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// The ed25519 private key (hex seed) for cryptosign
    #[arg(long, global = true, env = "WICK_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// The ticket for ticket auth
    #[arg(long, global = true, env = "WICK_TICKET", hide_env_values = true)]
    pub ticket: Option<String>,

    /// Serializer: json, msgpack or cbor [default: json]
    #[arg(long, global = true, env = "WICK_SERIALIZER")]
    pub serializer: Option<Serializer>,

    /// Named profile from the config file
    #[arg(long, global = true, env = "WICK_PROFILE")]
    pub profile: Option<String>,

    /// Profile file (default: ~/.wick/config.yaml)
    #[arg(long = "config", global = true, env = "WICK_CONFIG", hide = true)]
    pub config_path: Option<PathBuf>,
}

impl ConnectArgs {
    fn as_profile(&self) -> Profile {
        Profile {
            url: self.url.clone(),
            realm: self.realm.clone(),
            authmethod: self.authmethod,
            authid: self.authid.clone(),
            authrole: self.authrole.clone(),
            secret: self.secret.clone(),
            private_key: self.private_key.clone(),
            ticket: self.ticket.clone(),
            serializer: self.serializer,
        }
    }

    fn load_profile(&self) -> Result<Profile> {
        let Some(name) = self.profile.as_deref().filter(|n| !n.is_empty()) else {
            return Ok(Profile::default());
        };
        let path = match &self.config_path {
            Some(path) => path.clone(),
            None => config::default_profile_path()?,
        };
        config::load_profile(&path, name)
            .with_context(|| format!("failed to load profile from {}", path.display()))
    }

    /// Build the connection configuration. Flags and environment win over
    /// the profile, the profile over built-in defaults. Auth selection
    /// runs here, before any connection attempt.
    pub fn resolve(&self) -> Result<ConnectConfig> {
        let merged = self.as_profile().or(self.load_profile()?);
        let credentials = merged.credentials();
        let auth_method = auth::select_auth_method(merged.authmethod, &credentials)?;

        Ok(ConnectConfig {
            url: merged.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            realm: merged.realm.unwrap_or_else(|| DEFAULT_REALM.to_string()),
            serializer: merged.serializer.unwrap_or(Serializer::Json),
            auth_method,
            authid: merged.authid.filter(|s| !s.is_empty()),
            authrole: merged.authrole.filter(|s| !s.is_empty()),
            credentials,
        })
    }
}

/// Join one session.
pub async fn connect(
    connector: &Arc<dyn Connector>,
    config: &ConnectConfig,
    log_time: bool,
) -> Result<Arc<dyn Session>> {
    let started = Instant::now();
    let session = connector
        .connect(config)
        .await
        .with_context(|| format!("failed to connect to {}", config.url))?;
    if log_time {
        tracing::info!("session joined in {}ms", started.elapsed().as_millis());
    }
    Ok(session)
}

/// Join `count` sessions, at most `concurrency` at a time. If any join
/// fails, the sessions that did join are closed again.
pub async fn connect_many(
    connector: &Arc<dyn Connector>,
    config: &ConnectConfig,
    count: usize,
    concurrency: usize,
    log_time: bool,
) -> Result<Vec<Arc<dyn Session>>> {
    let spec = ScheduleSpec {
        delay: Duration::ZERO,
        repeat: count,
        concurrency,
    };
    let connector = Arc::clone(connector);
    let shared = Arc::new(config.clone());

    let started = Instant::now();
    let outcomes = schedule::run(spec, move |_| {
        let connector = Arc::clone(&connector);
        let config = Arc::clone(&shared);
        async move { connector.connect(&config).await }
    })
    .await;

    let (sessions, errors): (Vec<_>, Vec<WickError>) = outcomes.partition();
    if let Some(err) = errors.into_iter().next() {
        for session in &sessions {
            session.close().await;
        }
        return Err(err).with_context(|| format!("failed to connect to {}", config.url));
    }

    if log_time {
        tracing::info!(
            "{} sessions joined in {}ms",
            sessions.len(),
            started.elapsed().as_millis()
        );
    }
    Ok(sessions)
}
