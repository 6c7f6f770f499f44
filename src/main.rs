//! Detour CLI

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use detour::config::{Config, Mode};
use detour::network::NetworkHandler;

fn usage() -> ! {
    eprintln!("Detour v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: detour <command> <config.toml>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  record    Start the interception proxy in record mode");
    eprintln!("  replay    Start the interception proxy in replay mode");
    eprintln!("  check     Validate a configuration and print its namespaces");
    process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage();
    }

    let path = PathBuf::from(&args[2]);
    let result = match args[1].as_str() {
        "record" => serve(&path, Mode::Record).await,
        "replay" => serve(&path, Mode::Replay).await,
        "check" => check(&path),
        command => {
            eprintln!("Unknown command: {command}");
            usage();
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load(path: &Path, mode: Option<Mode>) -> anyhow::Result<Config> {
    let mut config = Config::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(mode) = mode {
        config.mode = mode;
        config.validate()?;
    }
    Ok(config)
}

async fn serve(path: &Path, mode: Mode) -> anyhow::Result<()> {
    let config = load(path, Some(mode))?;
    let handler = NetworkHandler::new(config)?;
    handler.run().await?;
    Ok(())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load(path, None)?;
    let control = config.namespace.control_prefix.as_str();

    println!("Mode:            {:?}", config.mode);
    println!("Origin:          {}", config.origin);
    println!("Backend:         {}", config.backend);
    println!("Scope:           {}", config.scope());
    println!("Control prefix:  {control}");
    println!("Record endpoint: {control}record/<absolute-url>");
    println!(
        "Replay template: {}<timestamp>/<urir>",
        config.namespace.replay_prefix
    );
    println!("Exclusions:      {:?}", config.exclusions.rules);
    println!("Rewrite links:   {}", config.rewrite_links);
    Ok(())
}
