//! One harness run: wallet roles, bootstrap and scenario sequencing

use crate::catalog::Catalog;
use crate::config::HarnessConfig;
use crate::error::{Error, Failure};
use crate::sanity::{self, SANITY_LABEL};
use crate::{signing, watch_only};
use bitcoin::Txid;
use msoracle_node::{AddressType, Role, WalletHandle, WalletService};
use std::fmt;

/// The three wallets of a session, passed explicitly to every scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roles {
    pub funder: WalletHandle,
    pub watch_only: WalletHandle,
    pub signer: WalletHandle,
}

impl Roles {
    pub fn new(funder: &str, watch_only: &str, signer: &str) -> Self {
        Self {
            funder: WalletHandle::new(Role::Funder, funder),
            watch_only: WalletHandle::new(Role::WatchOnly, watch_only),
            signer: WalletHandle::new(Role::Signer, signer),
        }
    }
}

/// Which scenario proved a case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Sanity,
    WatchOnly,
    Signing,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Sanity => write!(f, "sanity"),
            Scenario::WatchOnly => write!(f, "watch-only"),
            Scenario::Signing => write!(f, "signing"),
        }
    }
}

/// A case that passed its scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenCase {
    pub label: String,
    pub scenario: Scenario,
    pub funding_txid: Option<Txid>,
    pub spend_txid: Option<Txid>,
    pub premature_refused: bool,
}

/// Cases proven by a session, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub proven: Vec<ProvenCase>,
}

impl SessionReport {
    pub fn count(&self, scenario: Scenario) -> usize {
        self.proven.iter().filter(|c| c.scenario == scenario).count()
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} case(s) proven: {} sanity, {} watch-only, {} signing",
            self.proven.len(),
            self.count(Scenario::Sanity),
            self.count(Scenario::WatchOnly),
            self.count(Scenario::Signing)
        )?;
        for case in &self.proven {
            write!(f, "  ✓ [{}] {}", case.scenario, case.label)?;
            if let Some(txid) = case.spend_txid {
                write!(f, " spent in {}", txid)?;
            } else if let Some(txid) = case.funding_txid {
                write!(f, " funded in {}", txid)?;
            }
            if case.premature_refused {
                write!(f, " (early spend refused)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Drives the scenarios against one wallet/node service
pub struct Session<'a, S: WalletService> {
    service: &'a S,
    roles: Roles,
    config: HarnessConfig,
}

impl<'a, S: WalletService> Session<'a, S> {
    /// Use wallets that already exist on the service
    pub fn new(service: &'a S, roles: Roles, config: HarnessConfig) -> Self {
        Self {
            service,
            roles,
            config,
        }
    }

    /// Create the watch-only and signing wallets and make sure the funder can pay.
    ///
    /// The funder wallet must already exist. When its balance is below
    /// `min_funder_balance`, `bootstrap_blocks` blocks are mined to it.
    pub fn bootstrap(service: &'a S, roles: Roles, config: HarnessConfig) -> Result<Self, Error> {
        log::info!("Making descriptor wallets");
        service.create_wallet(roles.watch_only.name(), false)?;
        service.create_wallet(roles.signer.name(), true)?;

        let mut balance = service.get_balance(&roles.funder)?;
        if balance < config.min_funder_balance {
            log::info!(
                "Funder holds {}, mining {} blocks",
                balance,
                config.bootstrap_blocks
            );
            let addr = service.get_new_address(&roles.funder, AddressType::Bech32)?;
            service.generate_to_address(&roles.funder, config.bootstrap_blocks, &addr)?;
            balance = service.get_balance(&roles.funder)?;
        }
        if balance < config.min_funder_balance {
            return Err(Error::InsufficientFunds {
                have: balance,
                need: config.min_funder_balance,
            });
        }

        Ok(Self::new(service, roles, config))
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Sanity gate, then watch-only cases, then signing cases, in catalog
    /// order. Stops at the first failure.
    pub fn run(&self, catalog: &Catalog) -> Result<SessionReport, Failure> {
        let mut report = SessionReport::default();

        sanity::check(self.service, &self.roles.watch_only, self.config.script_context)?;
        report.proven.push(ProvenCase {
            label: SANITY_LABEL.to_string(),
            scenario: Scenario::Sanity,
            funding_txid: None,
            spend_txid: None,
            premature_refused: false,
        });

        for case in catalog.watch_only() {
            let outcome = watch_only::run(self.service, &self.roles, &self.config, case)?;
            report.proven.push(ProvenCase {
                label: case.label.clone(),
                scenario: Scenario::WatchOnly,
                funding_txid: Some(outcome.funding_txid),
                spend_txid: None,
                premature_refused: false,
            });
        }

        for case in catalog.signable() {
            let outcome = signing::run(self.service, &self.roles, &self.config, case)?;
            report.proven.push(ProvenCase {
                label: case.label.clone(),
                scenario: Scenario::Signing,
                funding_txid: Some(outcome.funding_txid),
                spend_txid: Some(outcome.spend_txid),
                premature_refused: outcome.premature_refused,
            });
        }

        log::info!("Session complete: {} case(s) proven", report.proven.len());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PolicyCase;
    use crate::error::Stage;
    use crate::test_utils::quick_config;
    use crate::SpendConstraint;
    use msoracle_node::mock::{MockNode, DEFAULT_WALLET};

    fn roles() -> Roles {
        Roles::new(DEFAULT_WALLET, "ms_wo", "ms_sig")
    }

    #[test]
    fn test_builtin_catalog_session() {
        let node = MockNode::new();
        let session = Session::bootstrap(&node, roles(), quick_config()).unwrap();
        let report = session.run(&Catalog::builtin()).unwrap();

        assert_eq!(report.count(Scenario::Sanity), 1);
        assert_eq!(report.count(Scenario::WatchOnly), 4);
        assert_eq!(report.count(Scenario::Signing), 5);
        // older(2), older(4)+after(30) are checked early; after(20) is
        // already met after bootstrap and the andor case is unenforced
        let refused: Vec<&str> = report
            .proven
            .iter()
            .filter(|c| c.premature_refused)
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(refused, vec!["relative-timelock", "relative-and-absolute-timelock"]);
        assert!(report.to_string().starts_with("10 case(s) proven"));
    }

    #[test]
    fn test_bootstrap_mines_when_poor() {
        let node = MockNode::new();
        assert_eq!(node.height(), 0);
        Session::bootstrap(&node, roles(), quick_config()).unwrap();
        assert_eq!(node.height(), 101);
    }

    #[test]
    fn test_bootstrap_reports_insufficient_funds() {
        let node = MockNode::new();
        let mut config = quick_config();
        config.bootstrap_blocks = 50;
        let result = Session::bootstrap(&node, roles(), config);
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
    }

    #[test]
    fn test_bootstrap_refuses_existing_wallets() {
        let node = MockNode::new();
        Session::bootstrap(&node, roles(), quick_config()).unwrap();
        let again = Session::bootstrap(&node, roles(), quick_config());
        assert!(matches!(again, Err(Error::Node(ref e)) if e.is_rejection()));
    }

    #[test]
    fn test_run_halts_at_first_failure() {
        let node = MockNode::new();
        let session = Session::bootstrap(&node, roles(), quick_config()).unwrap();

        let mut catalog = Catalog::empty();
        // Private keys cannot go into the watch-only wallet
        catalog
            .push(PolicyCase::trackable(
                "misfiled",
                format!("pk({}/*)", crate::test_utils::TPRV),
            ))
            .unwrap();
        catalog
            .push(PolicyCase::signable(
                "never-reached",
                format!("pk({}/*)", crate::test_utils::TPRV),
                SpendConstraint::NONE,
                true,
            ))
            .unwrap();

        let height = node.height();
        let failure = session.run(&catalog).unwrap_err();
        assert_eq!(failure.policy, "misfiled");
        assert_eq!(failure.stage, Stage::Import);
        // The signing case never funded anything
        assert_eq!(node.height(), height);
        assert_eq!(node.mempool_len(), 0);
    }

    #[test]
    fn test_existing_wallets_session() {
        let node = MockNode::new();
        let roles = crate::test_utils::mock_roles(&node);
        let addr = node.get_new_address(&roles.funder, AddressType::Bech32).unwrap();
        node.generate_to_address(&roles.funder, 101, &addr).unwrap();

        let session = Session::new(&node, roles, quick_config());
        let report = session.run(&Catalog::empty()).unwrap();
        assert_eq!(report.proven.len(), 1);
        assert_eq!(report.proven[0].label, SANITY_LABEL);
    }
}
