//! In-process router and sessions.
//!
//! Implements [`Session`] against a router living in the same process: one
//! [`Router`] per realm, any number of joined [`LocalSession`]s. Used by the
//! test suites and by the `local://` transport of the binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthMethod;
use crate::config::ConnectConfig;
use crate::error::{Result, WickError};
use crate::session::{
    Args, CallResult, Connector, Event, EventHandler, Invocation, InvocationHandler, Kwargs,
    Options, Session, NO_SUCH_PROCEDURE, NO_SUCH_REGISTRATION, NO_SUCH_SUBSCRIPTION,
    PROCEDURE_ALREADY_EXISTS,
};

pub const LOCAL_SCHEME: &str = "local://";

// ─── Router ───────────────────────────────────────────────────────────────

struct Registration {
    session: u64,
    handler: InvocationHandler,
}

struct Subscriber {
    session: u64,
    handler: EventHandler,
}

#[derive(Default)]
struct RouterState {
    registrations: HashMap<String, Registration>,
    subscriptions: HashMap<String, Vec<Subscriber>>,
    sessions: HashMap<u64, CancellationToken>,
}

/// A single-realm router.
pub struct Router {
    realm: String,
    next_id: AtomicU64,
    state: Mutex<RouterState>,
}

impl Router {
    pub fn new(realm: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            realm: realm.into(),
            next_id: AtomicU64::new(1),
            state: Mutex::new(RouterState::default()),
        })
    }

    /// Join an anonymous session.
    pub fn join(self: &Arc<Self>) -> Arc<LocalSession> {
        self.join_as(AuthMethod::Anonymous, None, None)
    }

    pub fn join_as(
        self: &Arc<Self>,
        authmethod: AuthMethod,
        authid: Option<String>,
        authrole: Option<String>,
    ) -> Arc<LocalSession> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let done = CancellationToken::new();
        self.lock().sessions.insert(id, done.clone());
        tracing::debug!(realm = %self.realm, session = id, %authmethod, "session joined");
        Arc::new(LocalSession {
            id,
            router: Arc::clone(self),
            done,
            authid,
            authrole,
        })
    }

    /// Number of sessions currently joined.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn has_procedure(&self, procedure: &str) -> bool {
        self.lock().registrations.contains_key(procedure)
    }

    /// Drop every session, as a router shutting down would.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.registrations.clear();
        state.subscriptions.clear();
        for (_, done) in state.sessions.drain() {
            done.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self, session: u64) -> bool {
        self.lock().sessions.contains_key(&session)
    }

    fn leave(&self, session: u64) {
        let mut state = self.lock();
        state.registrations.retain(|_, r| r.session != session);
        for subscribers in state.subscriptions.values_mut() {
            subscribers.retain(|s| s.session != session);
        }
        state.subscriptions.retain(|_, s| !s.is_empty());
        if let Some(done) = state.sessions.remove(&session) {
            done.cancel();
        }
    }
}

// ─── LocalSession ─────────────────────────────────────────────────────────

pub struct LocalSession {
    id: u64,
    router: Arc<Router>,
    done: CancellationToken,
    authid: Option<String>,
    authrole: Option<String>,
}

impl LocalSession {
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Identity of this session as disclosed to peers, keys prefixed with
    /// `role` ("caller" or "publisher").
    fn disclose(&self, role: &str, details: &mut Map<String, Value>) {
        details.insert(role.into(), json!(self.id));
        if let Some(authid) = &self.authid {
            details.insert(format!("{role}_authid"), json!(authid));
        }
        if let Some(authrole) = &self.authrole {
            details.insert(format!("{role}_authrole"), json!(authrole));
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.done.is_cancelled() || !self.router.is_live(self.id) {
            return Err(WickError::SessionClosed);
        }
        Ok(())
    }
}

fn flag(options: &Options, key: &str, default: bool) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(default)
}

#[async_trait]
impl Session for LocalSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn register(
        &self,
        procedure: &str,
        handler: InvocationHandler,
        _options: Options,
    ) -> Result<()> {
        self.ensure_live()?;
        let mut state = self.router.lock();
        if state.registrations.contains_key(procedure) {
            return Err(WickError::protocol(
                PROCEDURE_ALREADY_EXISTS,
                format!("procedure '{procedure}' is already registered"),
            ));
        }
        state.registrations.insert(
            procedure.to_string(),
            Registration {
                session: self.id,
                handler,
            },
        );
        tracing::debug!(session = self.id, procedure, "registered");
        Ok(())
    }

    async fn unregister(&self, procedure: &str) -> Result<()> {
        self.ensure_live()?;
        let mut state = self.router.lock();
        let owned = state
            .registrations
            .get(procedure)
            .is_some_and(|r| r.session == self.id);
        if !owned {
            return Err(WickError::protocol(
                NO_SUCH_REGISTRATION,
                format!("no registration for '{procedure}'"),
            ));
        }
        state.registrations.remove(procedure);
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
        self.ensure_live()?;
        // Never hold the router lock while the callee runs.
        let handler = self
            .router
            .lock()
            .registrations
            .get(procedure)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| {
                WickError::protocol(NO_SUCH_PROCEDURE, format!("no callee for '{procedure}'"))
            })?;

        let mut details = Map::new();
        details.insert("procedure".into(), json!(procedure));
        if flag(&options, "disclose_me", false) {
            self.disclose("caller", &mut details);
        }

        handler(Invocation {
            procedure: procedure.to_string(),
            args,
            kwargs,
            details,
        })
        .await
    }

    async fn publish(
        &self,
        topic: &str,
        args: Args,
        kwargs: Kwargs,
        options: Options,
    ) -> Result<()> {
        self.ensure_live()?;
        let exclude_me = flag(&options, "exclude_me", true);
        let targets: Vec<EventHandler> = self
            .router
            .lock()
            .subscriptions
            .get(topic)
            .map(|subs| {
                subs.iter()
                    .filter(|s| !(exclude_me && s.session == self.id))
                    .map(|s| Arc::clone(&s.handler))
                    .collect()
            })
            .unwrap_or_default();

        let mut details = Map::new();
        details.insert("topic".into(), json!(topic));
        if flag(&options, "disclose_me", false) {
            self.disclose("publisher", &mut details);
        }

        for handler in &targets {
            handler(Event {
                topic: topic.to_string(),
                args: args.clone(),
                kwargs: kwargs.clone(),
                details: details.clone(),
            });
        }

        if flag(&options, "acknowledge", false) {
            tracing::debug!(session = self.id, topic, receivers = targets.len(), "publish acknowledged");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: EventHandler, _options: Options) -> Result<()> {
        self.ensure_live()?;
        let mut state = self.router.lock();
        let subscribers = state.subscriptions.entry(topic.to_string()).or_default();
        if subscribers.iter().any(|s| s.session == self.id) {
            return Ok(());
        }
        subscribers.push(Subscriber {
            session: self.id,
            handler,
        });
        tracing::debug!(session = self.id, topic, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.ensure_live()?;
        let mut state = self.router.lock();
        let removed = match state.subscriptions.get_mut(topic) {
            Some(subs) => {
                let before = subs.len();
                subs.retain(|s| s.session != self.id);
                before != subs.len()
            }
            None => false,
        };
        state.subscriptions.retain(|_, s| !s.is_empty());
        if removed {
            Ok(())
        } else {
            Err(WickError::protocol(
                NO_SUCH_SUBSCRIPTION,
                format!("no subscription for '{topic}'"),
            ))
        }
    }

    async fn close(&self) {
        self.router.leave(self.id);
        self.done.cancel();
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }
}

// ─── LocalConnector ───────────────────────────────────────────────────────

/// Serves `local://` URLs from routers kept in this process, one per realm.
#[derive(Default)]
pub struct LocalConnector {
    routers: Mutex<HashMap<String, Arc<Router>>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The router for `realm`, created on first use.
    pub fn router(&self, realm: &str) -> Arc<Router> {
        let mut routers = self.routers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            routers
                .entry(realm.to_string())
                .or_insert_with(|| Router::new(realm)),
        )
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, config: &ConnectConfig) -> Result<Arc<dyn Session>> {
        if !config.url.starts_with(LOCAL_SCHEME) {
            return Err(WickError::UnsupportedTransport(config.url.clone()));
        }
        if config.realm.is_empty() {
            return Err(WickError::Connect {
                url: config.url.clone(),
                realm: config.realm.clone(),
                reason: "realm must not be empty".into(),
            });
        }
        let session = self.router(&config.realm).join_as(
            config.auth_method,
            config.authid.clone(),
            config.authrole.clone(),
        );
        Ok(session)
    }
}
