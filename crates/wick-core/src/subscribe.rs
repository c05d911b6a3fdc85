use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::render::Printer;
use crate::session::{wait_for_stop, Event, Options, Session, Stop};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOptions {
    pub options: Options,
    /// Include event details in the rendered output.
    pub details: bool,
}

/// Subscribe to `topic`, rendering every event through `printer`.
pub async fn subscribe(
    session: &dyn Session,
    topic: &str,
    opts: &SubscribeOptions,
    printer: &Printer,
) -> Result<()> {
    let printer = printer.clone();
    let details = opts.details;
    let handler = Arc::new(move |event: Event| {
        if let Err(e) = printer.print_event(&event, details) {
            tracing::warn!(topic = %event.topic, "failed to print event: {e}");
        }
    });
    session.subscribe(topic, handler, opts.options.clone()).await?;
    tracing::info!(topic, "subscribed");
    Ok(())
}

/// Wait for `shutdown` or the end of the session. Unsubscribes on shutdown.
pub async fn serve(session: &dyn Session, topic: &str, shutdown: CancellationToken) -> Result<Stop> {
    let stop = wait_for_stop(session, &shutdown, None).await;
    match stop {
        Stop::Shutdown => {
            session.unsubscribe(topic).await?;
            tracing::info!(topic, "unsubscribed");
        }
        Stop::SessionGone => tracing::warn!("router gone, exiting"),
        Stop::Finished => {}
    }
    Ok(stop)
}
