//! Sessions against a real router over `ws://`, `wss://`, `tcp://` and
//! `tcps://`, backed by the `wamp_async` client.
//!
//! The client owns its own event loop; [`WampConnector::connect`] spawns it
//! together with a pump for inbound invocations, and cancels the session's
//! `done` token once the loop ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use wamp_async::{
    AuthenticationChallengeResponse, AuthenticationMethod, Client, ClientConfig, SerializerType,
    WampDict, WampError, WampId,
};

use crate::auth::AuthMethod;
use crate::config::{ConnectConfig, Serializer};
use crate::error::{Result, WickError};
use crate::session::{
    Args, CallResult, Connector, Event, EventHandler, Invocation, InvocationHandler, Kwargs,
    Options, Session, NO_SUCH_REGISTRATION, NO_SUCH_SUBSCRIPTION,
};

pub const SCHEMES: [&str; 4] = ["ws://", "wss://", "tcp://", "tcps://"];

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Join parameters
// ---------------------------------------------------------------------------

/// How to answer the router's HELLO. Built before any I/O so configuration
/// errors never cost a connection attempt.
#[derive(Debug, Clone, PartialEq)]
enum Join {
    Anonymous { authid: Option<String> },
    Ticket { authid: String, ticket: String },
    WampCra { authid: String, secret: String },
}

impl Join {
    fn from_config(config: &ConnectConfig) -> Result<Self> {
        let authid = config.authid.clone();
        let creds = &config.credentials;
        match config.auth_method {
            AuthMethod::Anonymous => Ok(Join::Anonymous { authid }),
            AuthMethod::Ticket => Ok(Join::Ticket {
                authid: authid.unwrap_or_default(),
                ticket: creds.ticket.clone().unwrap_or_default(),
            }),
            AuthMethod::WampCra => Ok(Join::WampCra {
                authid: authid.unwrap_or_default(),
                secret: creds.secret.clone().unwrap_or_default(),
            }),
            AuthMethod::CryptoSign => Err(connect_error(
                config,
                "cryptosign is only available on local:// sessions",
            )),
        }
    }

    async fn run(
        self,
        client: &mut Client<'static>,
        realm: &str,
    ) -> std::result::Result<(), WampError> {
        match self {
            Join::Anonymous { authid: None } => client.join_realm(realm).await,
            Join::Anonymous {
                authid: Some(authid),
            } => {
                client
                    .join_realm_with_authentication(
                        realm,
                        vec![AuthenticationMethod::Anonymous],
                        authid,
                        |_, _| async {
                            Err::<AuthenticationChallengeResponse, _>(WampError::ProtocolError(
                                "challenge sent for anonymous authentication".into(),
                            ))
                        },
                    )
                    .await
            }
            Join::Ticket { authid, ticket } => {
                client
                    .join_realm_with_authentication(
                        realm,
                        vec![AuthenticationMethod::Ticket],
                        authid,
                        move |_, _| {
                            let ticket = ticket.clone();
                            async move {
                                Ok::<_, WampError>(
                                    AuthenticationChallengeResponse::with_signature(ticket),
                                )
                            }
                        },
                    )
                    .await
            }
            Join::WampCra { authid, secret } => {
                client
                    .join_realm_with_authentication(
                        realm,
                        vec![AuthenticationMethod::WampCra],
                        authid,
                        move |_, extra| {
                            let signed = answer_wampcra(&secret, extra);
                            async move {
                                signed.map(AuthenticationChallengeResponse::with_signature)
                            }
                        },
                    )
                    .await
            }
        }
    }
}

/// Base64 HMAC-SHA256 of `challenge` keyed with `secret`.
pub fn wampcra_signature(secret: &str, challenge: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(challenge.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

fn answer_wampcra(secret: &str, extra: WampDict) -> std::result::Result<String, WampError> {
    let extra = serde_json::to_value(extra)
        .map_err(|e| WampError::ProtocolError(format!("unreadable challenge: {e}")))?;
    if extra.get("salt").is_some() {
        return Err(WampError::ProtocolError(
            "salted wampcra challenges are not supported".into(),
        ));
    }
    let challenge = extra
        .get("challenge")
        .and_then(Value::as_str)
        .ok_or_else(|| WampError::ProtocolError("wampcra challenge is missing".into()))?;
    Ok(wampcra_signature(secret, challenge))
}

fn wire_serializer(config: &ConnectConfig) -> Result<SerializerType> {
    match config.serializer {
        Serializer::Json => Ok(SerializerType::Json),
        Serializer::MsgPack => Ok(SerializerType::MsgPack),
        Serializer::Cbor => Err(connect_error(
            config,
            "the cbor serializer is not supported by this client",
        )),
    }
}

fn connect_error(config: &ConnectConfig, reason: impl ToString) -> WickError {
    WickError::Connect {
        url: config.url.clone(),
        realm: config.realm.clone(),
        reason: reason.to_string(),
    }
}

fn from_wamp(err: WampError) -> WickError {
    match err {
        WampError::ServerError(uri, details) => {
            let message = serde_json::to_string(&details).unwrap_or_default();
            WickError::protocol(uri, message)
        }
        other => WickError::Transport(other.to_string()),
    }
}

fn flag(options: &Options, key: &str) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// WampConnector
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct WampConnector;

impl WampConnector {
    pub fn new() -> Self {
        Self
    }

    pub fn accepts(url: &str) -> bool {
        SCHEMES.iter().any(|scheme| url.starts_with(scheme))
    }
}

#[async_trait]
impl Connector for WampConnector {
    async fn connect(&self, config: &ConnectConfig) -> Result<Arc<dyn Session>> {
        if !Self::accepts(&config.url) {
            return Err(WickError::UnsupportedTransport(config.url.clone()));
        }
        let serializer = wire_serializer(config)?;
        let join = Join::from_config(config)?;
        if config.authrole.is_some() {
            tracing::debug!("authrole is not sent over {}", config.url);
        }

        let client_config = ClientConfig::default().set_serializers(vec![serializer]);
        let (mut client, (event_loop, invocations)) =
            Client::connect(&config.url, Some(client_config))
                .await
                .map_err(|e| connect_error(config, e))?;

        let done = CancellationToken::new();
        let loop_done = done.clone();
        tokio::spawn(async move {
            if let Err(e) = event_loop.await {
                tracing::debug!("event loop ended: {e}");
            }
            loop_done.cancel();
        });
        if let Some(mut invocations) = invocations {
            tokio::spawn(async move {
                while let Some(invocation) = invocations.recv().await {
                    tokio::spawn(async move {
                        if let Err(e) = invocation.await {
                            tracing::warn!("failed to answer invocation: {e}");
                        }
                    });
                }
            });
        }

        // Dropping the client on failure stops its event loop.
        join.run(&mut client, &config.realm)
            .await
            .map_err(|e| connect_error(config, e))?;

        let id = NEXT_SESSION.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session = id, url = %config.url, realm = %config.realm, "session joined");
        Ok(Arc::new(WampSession {
            id,
            client: RwLock::new(Some(client)),
            registrations: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            done,
        }))
    }
}

// ---------------------------------------------------------------------------
// WampSession
// ---------------------------------------------------------------------------

pub struct WampSession {
    /// Process-local id. The client library keeps the router's id private.
    id: u64,
    client: RwLock<Option<Client<'static>>>,
    registrations: Mutex<HashMap<String, WampId>>,
    subscriptions: Mutex<HashMap<String, WampId>>,
    done: CancellationToken,
}

impl WampSession {
    async fn client(&self) -> Result<RwLockReadGuard<'_, Client<'static>>> {
        if self.done.is_cancelled() {
            return Err(WickError::SessionClosed);
        }
        RwLockReadGuard::try_map(self.client.read().await, |client| client.as_ref())
            .map_err(|_| WickError::SessionClosed)
    }
}

fn lock_ids(map: &Mutex<HashMap<String, WampId>>) -> MutexGuard<'_, HashMap<String, WampId>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Session for WampSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn register(
        &self,
        procedure: &str,
        handler: InvocationHandler,
        options: Options,
    ) -> Result<()> {
        let client = self.client().await?;
        if !options.is_empty() {
            tracing::debug!(procedure, "registration options are not sent by this client");
        }

        let name = procedure.to_string();
        let endpoint = move |args: Option<Args>, kwargs: Option<Kwargs>| {
            let handler = Arc::clone(&handler);
            let mut details = Map::new();
            details.insert("procedure".into(), json!(name));
            let invocation = Invocation {
                procedure: name.clone(),
                args: args.unwrap_or_default(),
                kwargs: kwargs.unwrap_or_default(),
                details,
            };
            async move {
                match handler(invocation).await {
                    Ok(result) => Ok((Some(result.args), Some(result.kwargs))),
                    Err(e) => Err(WampError::UnknownError(e.to_string())),
                }
            }
        };
        let id = client.register(procedure, endpoint).await.map_err(from_wamp)?;
        lock_ids(&self.registrations).insert(procedure.to_string(), id);
        tracing::debug!(session = self.id, procedure, "registered");
        Ok(())
    }

    async fn unregister(&self, procedure: &str) -> Result<()> {
        let client = self.client().await?;
        let id = lock_ids(&self.registrations).remove(procedure).ok_or_else(|| {
            WickError::protocol(NO_SUCH_REGISTRATION, format!("no registration for '{procedure}'"))
        })?;
        client.unregister(id).await.map_err(from_wamp)?;
        tracing::debug!(session = self.id, procedure, "unregistered");
        Ok(())
    }

    async fn call(
        &self,
        procedure: &str,
        args: Args,
        kwargs: Kwargs,
        options: Options,
    ) -> Result<CallResult> {
        let client = self.client().await?;
        if !options.is_empty() {
            tracing::debug!(procedure, "call options are not sent by this client");
        }
        let (args, kwargs) = client
            .call(procedure, Some(args), Some(kwargs))
            .await
            .map_err(from_wamp)?;
        Ok(CallResult::new(
            args.unwrap_or_default(),
            kwargs.unwrap_or_default(),
        ))
    }

    async fn publish(
        &self,
        topic: &str,
        args: Args,
        kwargs: Kwargs,
        options: Options,
    ) -> Result<()> {
        let client = self.client().await?;
        let acknowledge = flag(&options, "acknowledge");
        let publication = client
            .publish(topic, Some(args), Some(kwargs), acknowledge)
            .await
            .map_err(from_wamp)?;
        if let Some(publication) = publication {
            tracing::debug!(session = self.id, topic, %publication, "publish acknowledged");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: EventHandler, options: Options) -> Result<()> {
        let client = self.client().await?;
        if lock_ids(&self.subscriptions).contains_key(topic) {
            return Ok(());
        }
        if !options.is_empty() {
            tracing::debug!(topic, "subscribe options are not sent by this client");
        }

        let (id, mut events) = client.subscribe(topic).await.map_err(from_wamp)?;
        lock_ids(&self.subscriptions).insert(topic.to_string(), id);

        let topic_name = topic.to_string();
        tokio::spawn(async move {
            while let Some((publication, args, kwargs)) = events.recv().await {
                let mut details = Map::new();
                details.insert("topic".into(), json!(topic_name));
                details.insert("publication".into(), json!(publication.to_string()));
                handler(Event {
                    topic: topic_name.clone(),
                    args: args.unwrap_or_default(),
                    kwargs: kwargs.unwrap_or_default(),
                    details,
                });
            }
        });
        tracing::debug!(session = self.id, topic, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let client = self.client().await?;
        let id = lock_ids(&self.subscriptions).remove(topic).ok_or_else(|| {
            WickError::protocol(NO_SUCH_SUBSCRIPTION, format!("no subscription for '{topic}'"))
        })?;
        client.unsubscribe(id).await.map_err(from_wamp)?;
        Ok(())
    }

    async fn close(&self) {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            // After the event loop is gone the client has nobody to say
            // goodbye to.
            if !self.done.is_cancelled() {
                client.disconnect().await;
            }
        }
        self.done.cancel();
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }
}
