use anyhow::Result;
use clap::Parser;

use chansched::app::Application;
use chansched::config::daemon::DaemonArgs;
use chansched::config::sim::SimulateArgs;
use chansched::config::{Cli, Commands};
use chansched::{logging, sim};

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();
    logging::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::Simulate(simulate_args) => run_simulate(simulate_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    tracing::info!(
        "Starting chansched daemon {}, policy {:?}",
        env!("CARGO_PKG_VERSION"),
        daemon_args.policy
    );
    let app = Application::build(&daemon_args).await?;
    app.run().await
}

async fn run_simulate(simulate_args: SimulateArgs) -> Result<()> {
    let config = simulate_args.into_config();
    tracing::info!(
        "Simulating {} requesters over {} channels for {} virtual seconds",
        config.requesters,
        config.channels,
        config.duration
    );
    let report = sim::run(config).await?;
    print!("{report}");
    Ok(())
}
