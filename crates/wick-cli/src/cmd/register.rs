use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use wick_core::config::ConnectConfig;
use wick_core::register::{self, RegistrationPolicy, RegistrationState};
use wick_core::Connector;

use crate::connect;

#[derive(clap::Args, Debug)]
pub struct RegisterArgs {
    /// Procedure name
    pub procedure: String,

    /// Shell command to run on each invocation; its output is returned
    pub command: Option<String>,

    /// Register after this many milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay: u64,

    /// Unregister and exit after this many invocations (0 = never)
    #[arg(long, default_value_t = 0)]
    pub invoke_count: u64,

    /// Registration option KEY=VALUE (repeatable)
    #[arg(short = 'o', long = "option", value_parser = super::parse_kv)]
    pub options: Vec<(String, String)>,
}

pub fn run(connector: Arc<dyn Connector>, config: &ConnectConfig, args: RegisterArgs) -> Result<()> {
    let policy = RegistrationPolicy {
        delay: Duration::from_millis(args.delay),
        max_invocations: (args.invoke_count > 0).then_some(args.invoke_count),
        shell_command: args.command.filter(|c| !c.is_empty()),
        options: super::to_mapping(&args.options),
    };
    let procedure = args.procedure;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let session = connect::connect(&connector, config, false).await?;
        let shutdown = super::shutdown_on_ctrl_c();

        let registration = register::register(&session, &procedure, policy, &shutdown)
            .await
            .with_context(|| format!("failed to register '{procedure}'"))?;
        if registration.state() == RegistrationState::Closed {
            session.close().await;
            return Ok(());
        }
        let result = registration.serve(session.as_ref(), shutdown).await;
        session.close().await;
        result?;
        Ok(())
    })
}
