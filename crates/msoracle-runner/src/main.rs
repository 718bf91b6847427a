//! msoracle: Miniscript wallet test oracle against a regtest Bitcoin Core node
//!
//! # Usage
//!
//! ```bash
//! msoracle --config /path/to/msoracle.toml
//! msoracle --list       # Print the catalog and exit
//! msoracle --validate   # Validate config and exit
//! ```

mod config;
mod run;

use anyhow::{Context, Result};
use msoracle_harness::Profile;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "msoracle.toml";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut catalog_path: Option<PathBuf> = None;
    let mut no_builtin = false;
    let mut validate_only = false;
    let mut list_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--catalog" => {
                i += 1;
                if i < args.len() {
                    catalog_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--catalog requires a path argument");
                }
            }
            "--no-builtin" => {
                no_builtin = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--list" => {
                list_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("msoracle {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // An explicit --config must exist; the default path is optional
    let mut runner_config = match config_path {
        Some(path) => config::RunnerConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if PathBuf::from(DEFAULT_CONFIG).exists() => {
            config::RunnerConfig::from_file(&PathBuf::from(DEFAULT_CONFIG))?
        }
        None => config::RunnerConfig::default(),
    };

    runner_config.apply_env_overrides();
    if catalog_path.is_some() {
        runner_config.runner.catalog_file = catalog_path;
    }
    if no_builtin {
        runner_config.runner.include_builtin = false;
    }

    std::env::set_var("RUST_LOG", &runner_config.runner.log_level);
    env_logger::init();

    if list_only {
        let catalog = run::load_catalog(&runner_config)?;
        println!("{} case(s):", catalog.len());
        for case in catalog.cases() {
            let kind = match case.profile {
                Profile::Trackable => "watch-only".to_string(),
                Profile::Preimage => "watch-only (preimage)".to_string(),
                Profile::Signable { constraint, .. } => format!("signing, {}", constraint),
            };
            println!("  {:<32} [{}]", case.label, kind);
            println!("      {}", case.expression);
        }
        return Ok(());
    }

    runner_config
        .validate()
        .context("Configuration validation failed")?;

    if validate_only {
        println!("✅ Configuration is valid.");
        println!("  Node:          {}", runner_config.node.rpc_url);
        println!("  Network:       {}", runner_config.node.network);
        println!(
            "  Wallets:       funder={} watch-only={} signer={}",
            runner_config.wallets.funder,
            runner_config.wallets.watch_only,
            runner_config.wallets.signer
        );
        println!("  Context:       {}", runner_config.harness.script_context);
        println!(
            "  Amounts:       fund {} / spend {}",
            runner_config.harness.fund_amount, runner_config.harness.spend_amount
        );
        println!(
            "  Poll timeout:  {} secs",
            runner_config.harness.poll_timeout_secs
        );
        return Ok(());
    }

    match run::run(&runner_config) {
        Ok(report) => {
            print!("{}", report);
            Ok(())
        }
        Err(e) => {
            log::error!("Harness failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"msoracle: Miniscript descriptor wallet test oracle

USAGE:
    msoracle [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: ./msoracle.toml if present)
    --catalog <PATH>      Extra TOML catalog to run after the built-in cases
    --no-builtin          Skip the built-in catalog
    --list                Print the catalog and exit
    --validate            Validate configuration and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    MSORACLE_LOG_LEVEL      Log level (error/warn/info/debug/trace)
    MSORACLE_CATALOG        Extra catalog file
    MSORACLE_RPC_URL        Node RPC URL
    MSORACLE_COOKIE_FILE    Node RPC cookie file
    MSORACLE_RPC_USER       Node RPC user
    MSORACLE_RPC_PASSWORD   Node RPC password
    MSORACLE_NETWORK        Must be regtest
    MSORACLE_POLL_TIMEOUT   Poll timeout in seconds

EXAMPLES:
    # Run the built-in catalog against a local regtest node
    msoracle --config msoracle.toml

    # Run only your own policies
    msoracle --config msoracle.toml --catalog mine.toml --no-builtin
"#
    );
}
