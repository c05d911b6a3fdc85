mod cmd;
mod connect;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use cmd::{
    call::CallArgs, keygen::KeygenArgs, publish::PublishArgs, register::RegisterArgs,
    subscribe::SubscribeArgs,
};
use connect::ConnectArgs;
use wick_core::render::{OutputFormat, Printer};
use wick_core::transport::UrlConnector;
use wick_core::Connector;

#[derive(Parser)]
#[command(
    name = "wick",
    about = "WAMP command-line client: call, publish, register and subscribe",
    version,
    disable_version_flag = true,
    arg(clap::Arg::new("version")
        .short('v')
        .long("version")
        .action(clap::ArgAction::Version)
        .help("Print version"))
)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Render results and events as a JSON envelope
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a topic and print every event
    Subscribe(SubscribeArgs),

    /// Publish to a topic
    Publish(PublishArgs),

    /// Register a procedure
    Register(RegisterArgs),

    /// Call a procedure
    Call(CallArgs),

    /// Generate an ed25519 key pair for cryptosign
    Keygen(KeygenArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Subscribe(_) | Commands::Register(_) => tracing::Level::INFO,
        Commands::Call(args) if args.time => tracing::Level::INFO,
        Commands::Publish(args) if args.time => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let printer = Printer::stdout(OutputFormat::from_json_flag(cli.json));
    let connector: Arc<dyn Connector> = Arc::new(UrlConnector::new());
    let conn = &cli.connect;

    match cli.command {
        Commands::Subscribe(args) => {
            cmd::subscribe::run(connector, &conn.resolve()?, args, printer)
        }
        Commands::Publish(args) => cmd::publish::run(connector, &conn.resolve()?, args),
        Commands::Register(args) => cmd::register::run(connector, &conn.resolve()?, args),
        Commands::Call(args) => cmd::call::run(connector, &conn.resolve()?, args, printer),
        Commands::Keygen(args) => cmd::keygen::run(args),
    }
}
