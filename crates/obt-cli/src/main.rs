//! Onboarding Tool
//!
//! Interactive console for discovering unowned devices, taking ownership of
//! them and provisioning credentials and access control. Device traffic goes
//! through the simulated fleet configured under `[simulation]`.

use anyhow::{Context, Result};
use clap::Parser;
use obt_agent::Orchestrator;
use obt_core::DiscoveryScope;
use obt_simulator::SimulatedFleet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod menu;

use config::CliConfig;
use menu::Menu;

#[derive(Parser)]
#[command(name = "obt")]
#[command(about = "Onboarding tool - discover, own and provision devices", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, default_value = ".obt/config.toml")]
    config: PathBuf,

    /// Scope for plain discovery: global, realm or site
    #[arg(short, long, value_parser = parse_scope)]
    scope: Option<DiscoveryScope>,
}

fn parse_scope(value: &str) -> Result<DiscoveryScope, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "global" | "all" => Ok(DiscoveryScope::Global),
        "realm" | "realm-local" => Ok(DiscoveryScope::RealmLocalIpv6),
        "site" | "site-local" => Ok(DiscoveryScope::SiteLocalIpv6),
        other => Err(format!("unknown scope {other:?}; expected global, realm or site")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(&cli.config)?;

    let log_level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    std::fs::create_dir_all(&config.storage_dir).with_context(|| {
        format!(
            "Failed to initialize credential storage at {}",
            config.storage_dir.display()
        )
    })?;
    info!(storage = %config.storage_dir.display(), "Credential storage ready");
    debug!(max_app_data_size = config.max_app_data_size, "Transport limits");

    // Completion watchers and delayed device answers run here; the menu
    // stays on the main thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("obt-worker")
        .build()
        .context("Failed to start the async runtime")?;

    {
        let _runtime = runtime.enter();
        let fleet = SimulatedFleet::from_config(&config.simulation)
            .context("Failed to initialize the device transport")?;
        let (orchestrator, events) = Orchestrator::from_current_runtime(Arc::new(fleet))?;

        let scope = cli.scope.unwrap_or(config.default_scope);
        let stdin = std::io::stdin();
        let mut menu = Menu::new(orchestrator, events, stdin.lock(), std::io::stdout(), scope);
        menu.run()?;
    }

    runtime.shutdown_background();
    Ok(())
}
