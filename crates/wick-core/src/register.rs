//! Procedure registration.
//!
//! A registration moves `Pending -> Registered -> Unregistering -> Closed`.
//! It stays `Pending` for the configured delay, serves invocations while
//! `Registered`, and leaves the router either when the invocation limit is
//! reached, when the caller shuts it down, or when the session ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WickError};
use crate::session::{
    wait_for_stop, CallResult, Invocation, InvocationHandler, Options, Session, Stop,
    NO_SUCH_REGISTRATION,
};
use crate::shell;

/// How a procedure is registered and served.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationPolicy {
    /// Wait this long before registering.
    pub delay: Duration,
    /// Unregister after this many invocations.
    pub max_invocations: Option<u64>,
    /// Run this command for each invocation instead of echoing the inputs.
    pub shell_command: Option<String>,
    pub options: Options,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Pending,
    Registered,
    Unregistering,
    Closed,
}

struct Shared {
    state: Mutex<RegistrationState>,
    invocations: AtomicU64,
    closed: CancellationToken,
}

impl Shared {
    fn set(&self, next: RegistrationState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
        if next == RegistrationState::Closed {
            self.closed.cancel();
        }
    }

    fn get(&self) -> RegistrationState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `Unregistering` unless someone else already has.
    fn begin_unregister(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != RegistrationState::Registered {
            return false;
        }
        *state = RegistrationState::Unregistering;
        true
    }
}

/// Handle to one procedure registration. Clones share state.
#[derive(Clone)]
pub struct Registration {
    procedure: String,
    policy: RegistrationPolicy,
    shared: Arc<Shared>,
}

impl Registration {
    /// A registration that has not yet reached the router.
    pub fn pending(procedure: impl Into<String>, policy: RegistrationPolicy) -> Self {
        Self {
            procedure: procedure.into(),
            policy,
            shared: Arc::new(Shared {
                state: Mutex::new(RegistrationState::Pending),
                invocations: AtomicU64::new(0),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.shared.get()
    }

    /// Invocations handled so far.
    pub fn invocations(&self) -> u64 {
        self.shared.invocations.load(Ordering::SeqCst)
    }

    /// Cancelled once the registration is closed.
    pub fn closed(&self) -> CancellationToken {
        self.shared.closed.clone()
    }

    /// Wait out the delay, then register with the router. If `shutdown`
    /// fires during the delay the registration closes without ever reaching
    /// the router.
    pub async fn activate(
        &self,
        session: &Arc<dyn Session>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        if !self.policy.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.policy.delay) => {}
                _ = shutdown.cancelled() => {
                    self.shared.set(RegistrationState::Closed);
                    tracing::info!(procedure = %self.procedure, "interrupted before registering");
                    return Ok(());
                }
            }
        }
        let handler = self.handler(Arc::downgrade(session));
        if let Err(e) = session
            .register(&self.procedure, handler, self.policy.options.clone())
            .await
        {
            self.shared.set(RegistrationState::Closed);
            return Err(e);
        }
        self.shared.set(RegistrationState::Registered);
        tracing::info!(procedure = %self.procedure, "registered procedure");
        Ok(())
    }

    /// Remove the registration from the router. Fails while still pending;
    /// a no-op once unregistering or closed.
    pub async fn unregister(&self, session: &dyn Session) -> Result<()> {
        if !self.shared.begin_unregister() {
            if self.state() == RegistrationState::Pending {
                return Err(WickError::protocol(
                    NO_SUCH_REGISTRATION,
                    format!("'{}' is not registered yet", self.procedure),
                ));
            }
            return Ok(());
        }
        let result = session.unregister(&self.procedure).await;
        self.shared.set(RegistrationState::Closed);
        result
    }

    /// Serve invocations until the invocation limit is reached, `shutdown`
    /// fires, or the session ends. Unregisters on shutdown.
    pub async fn serve(&self, session: &dyn Session, shutdown: CancellationToken) -> Result<Stop> {
        let closed = self.closed();
        let stop = wait_for_stop(session, &shutdown, Some(&closed)).await;
        match stop {
            Stop::Finished => {
                tracing::info!(
                    procedure = %self.procedure,
                    invocations = self.invocations(),
                    "invocation limit reached"
                );
            }
            Stop::Shutdown => self.unregister(session).await?,
            Stop::SessionGone => {
                self.shared.set(RegistrationState::Closed);
                tracing::warn!("router gone, exiting");
            }
        }
        Ok(stop)
    }

    fn handler(&self, session: Weak<dyn Session>) -> InvocationHandler {
        let shared = Arc::clone(&self.shared);
        let procedure = self.procedure.clone();
        let command = self.policy.shell_command.clone();
        let limit = self.policy.max_invocations;

        Arc::new(move |inv: Invocation| {
            let shared = Arc::clone(&shared);
            let procedure = procedure.clone();
            let command = command.clone();
            let session = session.clone();
            async move {
                let n = shared.invocations.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(procedure = %procedure, invocation = n, "invoked");

                let result = match command {
                    Some(command) => run_command(&command).await,
                    None => CallResult::new(inv.args, inv.kwargs),
                };

                if limit == Some(n) && shared.begin_unregister() {
                    if let Some(session) = session.upgrade() {
                        if let Err(e) = session.unregister(&procedure).await {
                            tracing::warn!(procedure = %procedure, "unregister failed: {e}");
                        }
                    }
                    shared.set(RegistrationState::Closed);
                }
                Ok::<_, WickError>(result)
            }
            .boxed()
        })
    }
}

/// Register `procedure` on `session` after the policy's delay. The result is
/// already `Closed` when `shutdown` fired during the delay.
pub async fn register(
    session: &Arc<dyn Session>,
    procedure: &str,
    policy: RegistrationPolicy,
    shutdown: &CancellationToken,
) -> Result<Registration> {
    let registration = Registration::pending(procedure, policy);
    registration.activate(session, shutdown).await?;
    Ok(registration)
}

/// Run the command and turn its output into a call result. Failures are
/// reported to the caller as the single positional result.
async fn run_command(command: &str) -> CallResult {
    let text = match shell::shell_out(command).await {
        Ok(out) if out.success() => out.stdout,
        Ok(out) => {
            tracing::warn!(command, code = ?out.code, "command failed");
            if out.stderr.is_empty() {
                out.stdout
            } else {
                out.stderr
            }
        }
        Err(e) => {
            tracing::warn!(command, "failed to run command: {e}");
            e.to_string()
        }
    };
    CallResult::new(vec![json!(text)], Default::default())
}
