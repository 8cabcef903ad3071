//! clocksync coordinator
//!
//! Listens for node registrations and runs Berkeley rounds on operator
//! command, on a timer, or on a node's trigger.

use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::oneshot;

use clocksync_cli::CoordinatorArgs;
use clocksync_runtime::{init_tracing, CoordinatorServer, Shell};

async fn run(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.config();
    config.validate()?;

    let server = CoordinatorServer::bind(config).await?;
    let shell = Shell::new(server.coordinator().clone());

    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(async move {
        let _ = stopped.await;
    }));

    if args.no_shell {
        tokio::signal::ctrl_c().await?;
    } else {
        println!("{}", clocksync_runtime::HELP);
        tokio::select! {
            result = shell.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => result?,
            signal = tokio::signal::ctrl_c() => signal?,
        }
    }

    tracing::info!("Shutting down coordinator");
    let _ = stop.send(());
    serving.await??;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CoordinatorArgs::parse();
    init_tracing(&args.log.telemetry())?;

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(args));
    // Stdin reads park a blocking thread that never returns on its own
    runtime.shutdown_background();
    result
}
