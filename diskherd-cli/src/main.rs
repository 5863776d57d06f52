mod args;

use clap::Parser;
use diskherd_engine::HttpEngine;
use diskherd_reconcile::Driver;
use diskherd_transfer::ProxyTls;
use tracing_subscriber::EnvFilter;

use args::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = cli.engine_config()?;
    let spec = cli.disk_spec()?;

    let engine = HttpEngine::new(&config)?;
    let driver = Driver::new(&engine, ProxyTls::from(&config));

    match driver.run(&spec).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
