use clap::Parser;
use mongod_layer::cli::{Cli, Commands, RunArgs};
use mongod_layer::{LayerError, Orchestrator, PlatformLauncherFactory, run_command};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run(args) => {
            init_tracing(args.verbose, args.log_json);
            run(args).await
        }
    };

    std::process::exit(code);
}

async fn run(args: RunArgs) -> i32 {
    let config = match args.to_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            eprintln!("mongod-layer run: {e:#}");
            return 2;
        }
    };

    tracing::debug!(
        platform = PlatformLauncherFactory::platform_name(),
        "Using platform launcher"
    );
    let manager = Arc::new(mongod_layer::create_lifecycle_manager());
    let orchestrator = Orchestrator::new(manager, config);
    let command = args.command;
    let hold = command.is_empty();

    let result = orchestrator
        .run(|_| async move {
            if hold {
                tracing::info!("mongod is up, press Ctrl-C to stop");
                std::future::pending::<Result<i32, LayerError>>().await
            } else {
                run_command(&command).await
            }
        })
        .await;

    match result {
        Ok(code) => code,
        // Holding the server ends with a signal; that is the normal way out
        Err(LayerError::Interrupted(_)) if hold => 0,
        Err(e) => {
            tracing::error!(error = %e, "mongod-layer failed");
            eprintln!("mongod-layer run: {e}");
            e.exit_code()
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
