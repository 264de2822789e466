mod cli;
mod commands;
mod config;
mod display;
mod threads;

use anyhow::{bail, Result};
use clap::Parser;
use cli::Cli;
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(verbose: bool) {
    // The binary and the library share the `pa_inspect` target prefix.
    let default_filter = if verbose {
        "pa_inspect=debug"
    } else {
        "pa_inspect=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    let mut config = Config::load_from(&config_path)?;
    config.apply_overrides(&cli);

    if cli.save_config {
        config.save_to(&config_path)?;
        println!("Saved configuration to {}", config_path.display());
        return Ok(());
    }

    let Some(pid) = cli.target_pid() else {
        bail!("{}", cli::USAGE);
    };

    let mut inspector = commands::attach(pid, cli.address, &config)?;

    match &cli.json {
        Some(path) => commands::dump::run(&mut inspector, path),
        None => commands::live::run(
            &mut inspector,
            &config,
            cli.cycles,
            cli.stats_json.as_deref(),
        ),
    }
}
