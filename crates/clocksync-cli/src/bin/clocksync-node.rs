//! clocksync clock node
//!
//! Starts with a simulated skew, registers with the coordinator and applies
//! whatever corrections it sends.

use clap::Parser;

use clocksync_cli::NodeArgs;
use clocksync_runtime::{init_tracing, NodeRuntime};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = NodeArgs::parse();
    init_tracing(&args.log.telemetry())?;

    let runtime = NodeRuntime::bind(args.config()).await?;
    runtime
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down clock node");
        })
        .await?;
    Ok(())
}
