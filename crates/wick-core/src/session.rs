//! The seam between the orchestrators and the protocol session library.
//!
//! Orchestrators only ever see `dyn Session`; establishing one is the job of
//! a [`Connector`]. [`crate::local`] provides an in-process implementation,
//! [`crate::wamp`] one backed by a WAMP client library.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectConfig;
use crate::Result;

pub type Args = Vec<Value>;
pub type Kwargs = Map<String, Value>;
pub type Options = Map<String, Value>;

// Router error URIs.
pub const NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
pub const PROCEDURE_ALREADY_EXISTS: &str = "wamp.error.procedure_already_exists";
pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
pub const NO_SUCH_SUBSCRIPTION: &str = "wamp.error.no_such_subscription";

/// Positional and keyword results of a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallResult {
    pub args: Args,
    pub kwargs: Kwargs,
}

impl CallResult {
    pub fn new(args: Args, kwargs: Kwargs) -> Self {
        Self { args, kwargs }
    }
}

/// An inbound request delivered to a registered procedure.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub procedure: String,
    pub args: Args,
    pub kwargs: Kwargs,
    pub details: Map<String, Value>,
}

/// An event delivered to a subscriber.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub topic: String,
    pub args: Args,
    pub kwargs: Kwargs,
    pub details: Map<String, Value>,
}

pub type InvocationHandler =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<CallResult>> + Send + Sync>;

pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// An established, joined session.
///
/// A session may carry several in-flight requests at once.
#[async_trait]
pub trait Session: Send + Sync {
    /// Router-assigned session id.
    fn id(&self) -> u64;

    async fn register(
        &self,
        procedure: &str,
        handler: InvocationHandler,
        options: Options,
    ) -> Result<()>;

    async fn unregister(&self, procedure: &str) -> Result<()>;

    async fn call(
        &self,
        procedure: &str,
        args: Args,
        kwargs: Kwargs,
        options: Options,
    ) -> Result<CallResult>;

    /// Publish an event. Without `acknowledge=true` in `options`, success
    /// only means the request was accepted locally.
    async fn publish(&self, topic: &str, args: Args, kwargs: Kwargs, options: Options)
        -> Result<()>;

    async fn subscribe(&self, topic: &str, handler: EventHandler, options: Options) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    async fn close(&self);

    /// Cancelled once the session ends, whether closed locally or dropped
    /// by the router.
    fn done(&self) -> CancellationToken;
}

/// Establishes sessions from a connection configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectConfig) -> Result<Arc<dyn Session>>;
}

/// Why a long-running command stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// The caller asked to stop (e.g. Ctrl-C).
    Shutdown,
    /// The router dropped the session.
    SessionGone,
    /// The command's own completion condition fired.
    Finished,
}

/// Wait until `shutdown` fires, the session ends, or `finished` (if any)
/// fires, whichever comes first.
pub async fn wait_for_stop(
    session: &dyn Session,
    shutdown: &CancellationToken,
    finished: Option<&CancellationToken>,
) -> Stop {
    let done = session.done();
    let finished = finished.cloned().unwrap_or_default();
    tokio::select! {
        _ = finished.cancelled() => Stop::Finished,
        _ = shutdown.cancelled() => Stop::Shutdown,
        _ = done.cancelled() => Stop::SessionGone,
    }
}
