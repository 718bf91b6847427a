//! Runner configuration, parsed from a TOML file plus environment overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use msoracle_harness::HarnessConfig;
use msoracle_node::Auth;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Top-level runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub runner: RunnerSection,

    /// Bitcoin Core RPC connection
    #[serde(default)]
    pub node: NodeSection,

    /// Wallet names for the three roles
    #[serde(default)]
    pub wallets: WalletsSection,

    #[serde(default)]
    pub harness: HarnessConfig,
}

/// General runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Extra TOML catalog appended after the built-in cases
    #[serde(default)]
    pub catalog_file: Option<PathBuf>,

    /// Whether to run the built-in catalog
    #[serde(default = "default_true")]
    pub include_builtin: bool,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            catalog_file: None,
            include_builtin: true,
        }
    }
}

/// Bitcoin Core RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// `.cookie` file written by bitcoind; takes precedence over user/password
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,

    #[serde(default)]
    pub rpc_user: Option<String>,

    #[serde(default)]
    pub rpc_password: Option<String>,

    /// Must be "regtest": the harness mines blocks
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            cookie_file: None,
            rpc_user: None,
            rpc_password: None,
            network: default_network(),
        }
    }
}

/// Wallet names on the node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletsSection {
    /// Existing wallet holding funds
    #[serde(default = "default_funder")]
    pub funder: String,

    /// Created with private keys disabled
    #[serde(default = "default_watch_only")]
    pub watch_only: String,

    /// Created with private keys enabled
    #[serde(default = "default_signer")]
    pub signer: String,
}

impl Default for WalletsSection {
    fn default() -> Self {
        Self {
            funder: default_funder(),
            watch_only: default_watch_only(),
            signer: default_signer(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:18443".to_string()
}

fn default_network() -> String {
    "regtest".to_string()
}

fn default_funder() -> String {
    "default".to_string()
}

fn default_watch_only() -> String {
    "ms_wo".to_string()
}

fn default_signer() -> String {
    "ms_sig".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl RunnerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RunnerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `MSORACLE_LOG_LEVEL`
    /// - `MSORACLE_CATALOG`
    /// - `MSORACLE_RPC_URL`
    /// - `MSORACLE_COOKIE_FILE`
    /// - `MSORACLE_RPC_USER`
    /// - `MSORACLE_RPC_PASSWORD`
    /// - `MSORACLE_NETWORK`
    /// - `MSORACLE_POLL_TIMEOUT`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MSORACLE_LOG_LEVEL") {
            self.runner.log_level = v;
        }
        if let Ok(v) = std::env::var("MSORACLE_CATALOG") {
            self.runner.catalog_file = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MSORACLE_RPC_URL") {
            self.node.rpc_url = v;
        }
        if let Ok(v) = std::env::var("MSORACLE_COOKIE_FILE") {
            self.node.cookie_file = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MSORACLE_RPC_USER") {
            self.node.rpc_user = Some(v);
        }
        if let Ok(v) = std::env::var("MSORACLE_RPC_PASSWORD") {
            self.node.rpc_password = Some(v);
        }
        if let Ok(v) = std::env::var("MSORACLE_NETWORK") {
            self.node.network = v;
        }
        if let Ok(v) = std::env::var("MSORACLE_POLL_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.harness.poll_timeout_secs = secs;
            }
        }
    }

    /// Parse the network string to a `bitcoin::Network`.
    pub fn network(&self) -> Option<bitcoin::Network> {
        match self.node.network.as_str() {
            "bitcoin" | "mainnet" => Some(bitcoin::Network::Bitcoin),
            "testnet" | "testnet3" => Some(bitcoin::Network::Testnet),
            "signet" => Some(bitcoin::Network::Signet),
            "regtest" => Some(bitcoin::Network::Regtest),
            _ => None,
        }
    }

    /// RPC credentials, cookie file first.
    pub fn auth(&self) -> Result<Auth> {
        if let Some(ref cookie) = self.node.cookie_file {
            return Ok(Auth::CookieFile(cookie.clone()));
        }
        match (&self.node.rpc_user, &self.node.rpc_password) {
            (Some(user), Some(password)) => Ok(Auth::UserPass(user.clone(), password.clone())),
            _ => anyhow::bail!("node.cookie_file or node.rpc_user + node.rpc_password is required"),
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.node.rpc_url.is_empty(),
            "node.rpc_url must not be empty"
        );
        self.auth()?;

        // Blocks are mined freely: never against a real network
        anyhow::ensure!(
            self.network() == Some(bitcoin::Network::Regtest),
            "node.network must be regtest (got '{}')",
            self.node.network
        );

        let h = &self.harness;
        anyhow::ensure!(
            h.spend_amount < h.fund_amount,
            "harness.spend_amount must be below harness.fund_amount"
        );
        anyhow::ensure!(
            h.watch_only_range >= 2,
            "harness.watch_only_range must be >= 2"
        );
        anyhow::ensure!(
            h.poll_timeout_secs > 0,
            "harness.poll_timeout_secs must be > 0"
        );
        anyhow::ensure!(
            h.poll_interval_ms > 0,
            "harness.poll_interval_ms must be > 0"
        );

        let names = [
            &self.wallets.funder,
            &self.wallets.watch_only,
            &self.wallets.signer,
        ];
        anyhow::ensure!(
            names.iter().all(|n| !n.is_empty()),
            "wallet names must not be empty"
        );
        let unique: HashSet<&String> = names.iter().copied().collect();
        anyhow::ensure!(unique.len() == names.len(), "wallet names must be distinct");

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
