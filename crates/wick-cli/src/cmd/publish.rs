use std::sync::Arc;

use anyhow::Result;
use wick_core::config::ConnectConfig;
use wick_core::publish::{self, PublishOptions};
use wick_core::schedule::ScheduleSpec;
use wick_core::value;
use wick_core::{Action, Connector};

use crate::connect;

#[derive(clap::Args, Debug)]
pub struct PublishArgs {
    /// Topic to publish to
    pub topic: String,

    /// Positional arguments
    #[arg(allow_negative_numbers = true)]
    pub args: Vec<String>,

    /// Keyword argument KEY=VALUE (repeatable)
    #[arg(short = 'k', long = "kwarg", value_parser = super::parse_kv)]
    pub kwargs: Vec<(String, String)>,

    /// Publish option KEY=VALUE (repeatable)
    #[arg(short = 'o', long = "option", value_parser = super::parse_kv)]
    pub options: Vec<(String, String)>,

    /// Publish this many times
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub repeat: i64,

    /// Wait this many milliseconds before the first publish
    #[arg(long, default_value_t = 0)]
    pub delay: u64,

    /// Publishes in flight at once (only effective with --repeat)
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub concurrency: i64,

    /// Log session join and publish return times
    #[arg(long)]
    pub time: bool,
}

pub fn run(connector: Arc<dyn Connector>, config: &ConnectConfig, args: PublishArgs) -> Result<()> {
    let schedule = ScheduleSpec::new(args.delay, args.repeat, args.concurrency)?;
    let action = Action::publish(&args.topic)
        .with_args(value::coerce_args(&args.args))
        .with_kwargs(super::to_mapping(&args.kwargs))
        .with_options(super::to_mapping(&args.options));
    let opts = PublishOptions {
        schedule,
        log_time: args.time,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let session = connect::connect(&connector, config, args.time).await?;
        let result = publish::publish(Arc::clone(&session), &action, &opts).await;
        session.close().await;
        result?;
        Ok(())
    })
}
