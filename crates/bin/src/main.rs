use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands {
    pub mod health;
    pub mod serve;
}

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health(args) => commands::health::run(&args).await,
        Commands::Serve(args) => {
            init_tracing()?;
            commands::serve::run(&args).await
        }
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("orda=info".parse()?))
        .init();
    Ok(())
}
