//! Binary entrypoint for svcgen.
mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            code,
            aux,
            aux_file,
            catalog,
            config,
            out_dir,
            stats,
            tagged_verdicts,
        } => {
            commands::run(commands::RunArgs {
                code,
                aux,
                aux_file,
                catalog,
                config,
                out_dir,
                stats,
                tagged_verdicts,
            })
            .await
        }
        Commands::Check { script, tree } => commands::check(&script, tree),
    }
}
