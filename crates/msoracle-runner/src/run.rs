//! Wiring between the runner configuration and a harness session

use crate::config::RunnerConfig;
use anyhow::{Context, Result};
use msoracle_harness::{Catalog, Roles, Session, SessionReport};
use msoracle_node::RpcService;

/// Built-in cases (unless disabled) followed by those of `runner.catalog_file`.
pub fn load_catalog(config: &RunnerConfig) -> Result<Catalog> {
    let mut catalog = if config.runner.include_builtin {
        Catalog::builtin()
    } else {
        Catalog::empty()
    };

    if let Some(ref path) = config.runner.catalog_file {
        let extra = Catalog::from_file(path)
            .with_context(|| format!("Failed to load catalog: {}", path.display()))?;
        log::info!("Loaded {} case(s) from {}", extra.len(), path.display());
        catalog.extend(extra)?;
    }

    anyhow::ensure!(!catalog.is_empty(), "catalog is empty: nothing to run");
    Ok(catalog)
}

pub fn roles(config: &RunnerConfig) -> Roles {
    Roles::new(
        &config.wallets.funder,
        &config.wallets.watch_only,
        &config.wallets.signer,
    )
}

/// Connect, bootstrap the wallets and run every case.
pub fn run(config: &RunnerConfig) -> Result<SessionReport> {
    let catalog = load_catalog(config)?;
    let network = config
        .network()
        .with_context(|| format!("Unknown network: {}", config.node.network))?;

    log::info!("Connecting to {}", config.node.rpc_url);
    let service = RpcService::new(&config.node.rpc_url, config.auth()?, network)
        .context("Failed to connect to node")?;

    let session = Session::bootstrap(&service, roles(config), config.harness.clone())
        .context("Failed to bootstrap wallets")?;

    log::info!(
        "Running {} case(s) ({} signable)",
        catalog.len(),
        catalog.signable().count()
    );
    let report = session.run(&catalog)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EXTRA: &str = r#"
[[case]]
label = "extra-pk"
expression = "pk(tpubD6NzVbkrYhZ4YQsHEV4iGaTyuukxrPUpsRFqotvvJXYbxJdgUPVF2bCMJEGVmbcpTTgSo4pYakqWWd4ncZmNBC2SbgpeXghhP5Jbnz4Z1ab/*)"
profile = "trackable"
"#;

    #[test]
    fn test_builtin_only() {
        let config = RunnerConfig::default();
        let catalog = load_catalog(&config).unwrap();
        assert_eq!(catalog.len(), Catalog::builtin().len());
    }

    #[test]
    fn test_builtin_plus_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", EXTRA).unwrap();

        let mut config = RunnerConfig::default();
        config.runner.catalog_file = Some(file.path().to_path_buf());
        let catalog = load_catalog(&config).unwrap();

        assert_eq!(catalog.len(), Catalog::builtin().len() + 1);
        assert_eq!(catalog.cases().last().unwrap().label, "extra-pk");
    }

    #[test]
    fn test_file_only() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", EXTRA).unwrap();

        let mut config = RunnerConfig::default();
        config.runner.include_builtin = false;
        config.runner.catalog_file = Some(file.path().to_path_buf());
        assert_eq!(load_catalog(&config).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let mut config = RunnerConfig::default();
        config.runner.include_builtin = false;
        assert!(load_catalog(&config).is_err());
    }

    #[test]
    fn test_missing_catalog_file() {
        let mut config = RunnerConfig::default();
        config.runner.catalog_file = Some("/nonexistent/catalog.toml".into());
        assert!(load_catalog(&config).is_err());
    }

    #[test]
    fn test_roles_from_config() {
        let mut config = RunnerConfig::default();
        config.wallets.signer = "keys".into();
        let roles = roles(&config);
        assert_eq!(roles.funder.name(), "default");
        assert_eq!(roles.signer.name(), "keys");
    }
}
