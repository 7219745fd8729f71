use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use uuid::Uuid;

use flowbench::{
    adapters::inbound::{
        cli::{Cli, CliAdapter, Commands, LogJsonStyle, ServeArgs},
        server::{ServeOptions, ServerAdapter},
    },
    bootstrap::{ServiceOptions, StoreChoice, build_service, load_config},
    core::ports::RunService,
};

mod tracing_setup;

use tracing_setup::{JsonLogFormat, LogOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut command = cli.command;

    // A per-run log file needs the run id before the run exists.
    if let Commands::Run(args) = &mut command
        && args.log_file
        && args.run_id.is_none()
    {
        args.run_id = Some(new_run_id());
    }
    let log_run_id = match &command {
        Commands::Run(args) if args.log_file => args.run_id.clone(),
        _ => None,
    };
    let json = cli.log_json.then_some(match cli.log_json_style {
        LogJsonStyle::Pretty => JsonLogFormat::Pretty,
        LogJsonStyle::Compact => JsonLogFormat::Compact,
    });
    let _guard = tracing_setup::init(LogOptions {
        verbose: cli.verbose,
        json,
        run_id: log_run_id.as_deref(),
    });

    let (api_key, needs_config) = match &command {
        Commands::Run(args) => (args.api_key.clone(), true),
        Commands::Serve(args) => (args.api_key.clone(), true),
        _ => (None, false),
    };
    let config = load_config(&cli.config, needs_config)?;
    let store = if cli.in_memory {
        StoreChoice::InMemory
    } else {
        StoreChoice::Sqlite
    };
    let service: Arc<dyn RunService> =
        build_service(config, ServiceOptions { store, api_key })?;

    match command {
        Commands::Serve(args) => serve_command(args, service).await,
        other => CliAdapter::new(service).execute(other).await,
    }
}

async fn serve_command(args: ServeArgs, service: Arc<dyn RunService>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("Invalid bind/port combination for serve command")?;
    let options = ServeOptions {
        default_limit: args.limit.max(1),
        ..ServeOptions::default()
    };
    println!("Serving run API on http://{addr}");
    ServerAdapter::new(service, options).run(addr).await
}

fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}
