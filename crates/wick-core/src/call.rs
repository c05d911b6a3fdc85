//! Procedure calls: single, repeated, concurrent and multi-session.

use std::sync::Arc;
use std::time::Instant;

use crate::action::Action;
use crate::error::{Result, WickError};
use crate::render::Printer;
use crate::schedule::{self, Iteration, OutcomeSet, ScheduleSpec};
use crate::session::{CallResult, Session};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub schedule: ScheduleSpec,
    /// Log how long each call took to return.
    pub log_time: bool,
}

/// Invoke the action's procedure once and render the result.
pub async fn call_once(
    session: &dyn Session,
    action: &Action,
    printer: &Printer,
    log_time: bool,
) -> Result<CallResult> {
    let started = Instant::now();
    let result = action
        .execute(session)
        .await?
        .unwrap_or_default();
    if log_time {
        tracing::info!("call returned in {}ms", started.elapsed().as_millis());
    }
    printer.print_result(&result)?;
    Ok(result)
}

/// Run a call action according to `opts.schedule`.
///
/// With more than one session, each session is owned by exactly one
/// scheduler worker: concurrency is capped at the number of sessions and
/// worker `k` uses session `k`. Every completed call is rendered once. All
/// iterations run; the first failure is returned afterwards.
pub async fn call(
    sessions: &[Arc<dyn Session>],
    action: &Action,
    opts: &CallOptions,
    printer: &Printer,
) -> Result<()> {
    // Results are already rendered; only failures are kept.
    let outcomes = run_calls(sessions, action, opts, printer, |_| ()).await?;
    let failed = outcomes.failures();
    if failed > 0 {
        tracing::warn!(
            failed,
            total = outcomes.len(),
            procedure = action.target(),
            "some calls failed"
        );
    }
    outcomes.into_result().map(|_| ())
}

/// Like [`call`], but hands back every outcome.
pub async fn call_all(
    sessions: &[Arc<dyn Session>],
    action: &Action,
    opts: &CallOptions,
    printer: &Printer,
) -> Result<OutcomeSet<CallResult>> {
    run_calls(sessions, action, opts, printer, |result| result).await
}

async fn run_calls<T, K>(
    sessions: &[Arc<dyn Session>],
    action: &Action,
    opts: &CallOptions,
    printer: &Printer,
    keep: K,
) -> Result<OutcomeSet<T>>
where
    T: Send + 'static,
    K: Fn(CallResult) -> T + Send + Sync + 'static,
{
    if sessions.is_empty() {
        return Err(WickError::NoSession);
    }

    let mut spec = opts.schedule;
    if sessions.len() > 1 && spec.concurrency > sessions.len() {
        tracing::debug!(
            concurrency = spec.concurrency,
            sessions = sessions.len(),
            "capping concurrency at one worker per session"
        );
        spec.concurrency = sessions.len();
    }

    let sessions: Arc<[Arc<dyn Session>]> = sessions.to_vec().into();
    let action = Arc::new(action.clone());
    let printer = printer.clone();
    let keep = Arc::new(keep);
    let log_time = opts.log_time;

    let outcomes = schedule::run(spec, move |it: Iteration| {
        let session = Arc::clone(&sessions[it.worker % sessions.len()]);
        let action = Arc::clone(&action);
        let printer = printer.clone();
        let keep = Arc::clone(&keep);
        async move {
            call_once(session.as_ref(), &action, &printer, log_time)
                .await
                .map(|result| keep(result))
        }
    })
    .await;

    Ok(outcomes)
}
