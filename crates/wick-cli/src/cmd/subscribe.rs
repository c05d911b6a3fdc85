use std::sync::Arc;

use anyhow::{Context, Result};
use wick_core::config::ConnectConfig;
use wick_core::render::Printer;
use wick_core::subscribe::{self, SubscribeOptions};
use wick_core::Connector;

use crate::connect;

#[derive(clap::Args, Debug)]
pub struct SubscribeArgs {
    /// Topic to subscribe to
    pub topic: String,

    /// Subscribe option KEY=VALUE (repeatable)
    #[arg(short = 'o', long = "option", value_parser = super::parse_kv)]
    pub options: Vec<(String, String)>,

    /// Print event details
    #[arg(long)]
    pub details: bool,
}

pub fn run(
    connector: Arc<dyn Connector>,
    config: &ConnectConfig,
    args: SubscribeArgs,
    printer: Printer,
) -> Result<()> {
    let opts = SubscribeOptions {
        options: super::to_mapping(&args.options),
        details: args.details,
    };
    let topic = args.topic;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let session = connect::connect(&connector, config, false).await?;
        let shutdown = super::shutdown_on_ctrl_c();

        subscribe::subscribe(session.as_ref(), &topic, &opts, &printer)
            .await
            .with_context(|| format!("failed to subscribe to '{topic}'"))?;
        let result = subscribe::serve(session.as_ref(), &topic, shutdown).await;
        session.close().await;
        result?;
        Ok(())
    })
}
