use std::sync::Arc;
use std::time::Instant;

use crate::action::Action;
use crate::error::{Result, WickError};
use crate::schedule::{self, ScheduleSpec};
use crate::session::Session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub schedule: ScheduleSpec,
    pub log_time: bool,
}

/// Publish the action's event according to `opts.schedule`.
///
/// Success means the session library accepted each publish (or, with
/// `acknowledge=true` in the action's options, that the router confirmed
/// it). All iterations run; the first failure is returned afterwards.
pub async fn publish(session: Arc<dyn Session>, action: &Action, opts: &PublishOptions) -> Result<()> {
    let action = Arc::new(action.clone());
    let log_time = opts.log_time;

    let outcomes = schedule::run(opts.schedule, move |_| {
        let session = Arc::clone(&session);
        let action = Arc::clone(&action);
        async move {
            let started = Instant::now();
            action.execute(session.as_ref()).await?;
            if log_time {
                tracing::info!("publish returned in {}ms", started.elapsed().as_millis());
            }
            Ok::<_, WickError>(())
        }
    })
    .await;

    let failed = outcomes.failures();
    if failed > 0 {
        tracing::warn!(failed, total = outcomes.len(), "some publishes failed");
    }
    outcomes.into_result().map(|_| ())
}
