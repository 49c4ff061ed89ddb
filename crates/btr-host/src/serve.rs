use anyhow::{Context as _, Result};
use btr_bridge::{BridgeRuntime, Context, IpcServer};
use btr_roblox::{ApiHosts, RobloxApi};
use clap::Args;
use tracing::info;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Send every service to one base URL instead of the Roblox hosts
    #[arg(long)]
    base_url: Option<String>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    info!("Starting BTR background host");

    let hosts = match args.base_url {
        Some(base) => {
            info!("Routing all services to {}", base);
            ApiHosts::single(base)
        }
        None => ApiHosts::roblox(),
    };

    let runtime = BridgeRuntime::builder(Context::background()).build()?;
    RobloxApi::with_hosts(&runtime, hosts)?;

    let bind = format!("{}:{}", args.host, args.port);
    let mut handle = IpcServer::start_on(&runtime, &bind)
        .await
        .with_context(|| format!("Failed to start bridge server on {}", bind))?;

    // The foreground reads this line to find the port
    println!("BRIDGE_PORT={}", handle.port);

    info!(
        "Serving {} procedures on {}",
        runtime.router().map(|r| r.procedures().len()).unwrap_or(0),
        handle.addr()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}
