//! BTR Host - runs the background context as a local service.
//!
//! `serve` registers every endpoint in a background runtime and exposes it
//! over the length-prefixed TCP transport. `call` connects as a foreground
//! context and invokes one endpoint.

mod call;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "btr-host")]
#[command(about = "Background host and foreground client for the BTR bridge")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background context until Ctrl-C
    Serve(serve::ServeArgs),
    /// Call one endpoint through a running host
    Call(call::CallArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the port line and call results
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve(serve_args) => serve::run(serve_args).await,
        Command::Call(call_args) => call::run(call_args).await,
    }
}
