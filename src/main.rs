use clap::Parser;
use drydock::cli::{self, Cli, Commands};
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("Drydock started with verbosity level: {}", cli.verbose);

    let result = match cli.command {
        Commands::Run {
            branch,
            commit,
            change_id,
            artifact,
            config,
            dry_run,
            no_trigger,
        } => {
            cli::run_deployment(branch, commit, change_id, artifact, config, dry_run, no_trigger)
                .await
        }
        Commands::Resolve {
            branch,
            commit,
            change_id,
            offline,
            config,
        } => cli::resolve_identifier(branch, commit, change_id, offline, config).await,
        Commands::Status { identifier, config } => cli::show_status(identifier, config).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
