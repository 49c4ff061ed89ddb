use anyhow::{anyhow, bail, Context as _, Result};
use btr_bridge::{BridgeRuntime, Context, IpcClient, Value};
use btr_roblox::{RobloxApi, ENDPOINT_NAMES};
use clap::Args;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Port printed by `btr-host serve`
    #[arg(short, long)]
    port: u16,

    /// Host the background listens on
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// XSRF token to offer the background
    #[arg(long)]
    xsrf: Option<String>,

    /// Dotted endpoint name, e.g. friends.getFriends
    endpoint: String,

    /// Arguments, each parsed as JSON (bare words are taken as strings)
    args: Vec<String>,
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}

pub async fn run(args: CallArgs) -> Result<()> {
    if !ENDPOINT_NAMES.contains(&args.endpoint.as_str()) {
        bail!(
            "Unknown endpoint {}; expected one of: {}",
            args.endpoint,
            ENDPOINT_NAMES.join(", ")
        );
    }

    let addr = SocketAddr::new(args.host, args.port);
    let client = IpcClient::connect(addr)
        .await
        .with_context(|| format!("No bridge host on {}", addr))?;

    let runtime = BridgeRuntime::builder(Context::foreground())
        .with_sender(Arc::new(client))
        .build()?;
    if let Some(token) = &args.xsrf {
        runtime.tokens().observe_token(token);
    }

    let api = RobloxApi::new(&runtime)?;
    let endpoint = api
        .endpoint(&args.endpoint)
        .ok_or_else(|| anyhow!("Endpoint {} is not registered", args.endpoint))?;

    let call_args: Vec<Value> = args.args.iter().map(|raw| parse_arg(raw)).collect();
    debug!("Calling {} with {} arguments", args.endpoint, call_args.len());

    let result = endpoint.call(call_args).await?;
    println!("{}", serde_json::to_string_pretty(&result.into_json())?);

    Ok(())
}
