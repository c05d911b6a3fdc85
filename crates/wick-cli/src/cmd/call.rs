use std::sync::Arc;

use anyhow::{bail, Result};
use wick_core::call::{self, CallOptions};
use wick_core::config::ConnectConfig;
use wick_core::render::Printer;
use wick_core::schedule::ScheduleSpec;
use wick_core::value;
use wick_core::{Action, Connector};

use crate::connect;

#[derive(clap::Args, Debug)]
pub struct CallArgs {
    /// Procedure to call
    pub procedure: String,

    /// Positional arguments
    #[arg(allow_negative_numbers = true)]
    pub args: Vec<String>,

    /// Keyword argument KEY=VALUE (repeatable)
    #[arg(short = 'k', long = "kwarg", value_parser = super::parse_kv)]
    pub kwargs: Vec<(String, String)>,

    /// Call option KEY=VALUE (repeatable)
    #[arg(short = 'o', long = "option", value_parser = super::parse_kv)]
    pub options: Vec<(String, String)>,

    /// Call the procedure this many times
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub repeat: i64,

    /// Wait this many milliseconds before the first call
    #[arg(long, default_value_t = 0)]
    pub delay: u64,

    /// Calls in flight at once (only effective with --repeat)
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub concurrency: i64,

    /// Spread the calls over this many sessions
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub parallel: i64,

    /// Log session join and call return times
    #[arg(long)]
    pub time: bool,
}

pub fn run(
    connector: Arc<dyn Connector>,
    config: &ConnectConfig,
    args: CallArgs,
    printer: Printer,
) -> Result<()> {
    let schedule = ScheduleSpec::new(args.delay, args.repeat, args.concurrency)?;
    if args.parallel < 1 {
        bail!("parallel session count must be greater than zero");
    }
    let mut parallel = args.parallel as usize;
    if parallel > schedule.concurrency {
        tracing::warn!(
            parallel,
            concurrency = schedule.concurrency,
            "more sessions than concurrent calls; using {} sessions",
            schedule.concurrency
        );
        parallel = schedule.concurrency;
    }

    let action = Action::call(&args.procedure)
        .with_args(value::coerce_args(&args.args))
        .with_kwargs(super::to_mapping(&args.kwargs))
        .with_options(super::to_mapping(&args.options));
    let opts = CallOptions {
        schedule,
        log_time: args.time,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let sessions = if parallel == 1 {
            vec![connect::connect(&connector, config, args.time).await?]
        } else {
            connect::connect_many(&connector, config, parallel, schedule.concurrency, args.time)
                .await?
        };

        let result = call::call(&sessions, &action, &opts, &printer).await;
        for session in &sessions {
            session.close().await;
        }
        result?;
        Ok(())
    })
}
