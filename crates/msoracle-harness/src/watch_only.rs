//! Watch-only scenario
//!
//! Proves a policy is trackable from its public descriptor alone:
//! 1. Import it as active into the private-keys-disabled wallet
//! 2. The wallet's first two new addresses equal deterministic derivation at
//!    indices 0 and 1, and re-deriving index 0 gives the same address
//! 3. Funds sent to the next address show up as one solvable UTXO

use crate::catalog::PolicyCase;
use crate::config::HarnessConfig;
use crate::descriptor::WalletDescriptor;
use crate::error::{AtStage, Error, Failure, Stage};
use crate::import::import_active;
use crate::poll::wait_until;
use crate::session::Roles;
use bitcoin::{Address, Txid};
use msoracle_node::WalletService;

/// Indices compared between the wallet and external derivation
const CHECKED_INDICES: u32 = 2;

/// What the scenario observed for one policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOnlyOutcome {
    /// Addresses handed out by the wallet, index 0 first
    pub addresses: Vec<Address>,
    pub funding_txid: Txid,
}

/// Run the watch-only scenario for `case`
pub fn run<S: WalletService>(
    service: &S,
    roles: &Roles,
    config: &HarnessConfig,
    case: &PolicyCase,
) -> Result<WatchOnlyOutcome, Failure> {
    prove(service, roles, config, case).map_err(|f| f.with_expression(&case.expression))
}

fn prove<S: WalletService>(
    service: &S,
    roles: &Roles,
    config: &HarnessConfig,
    case: &PolicyCase,
) -> Result<WatchOnlyOutcome, Failure> {
    let label = case.label.as_str();

    log::info!("Importing Miniscript '{}'", case.expression);
    let descriptor = WalletDescriptor::build(&case.expression, config.script_context)
        .at_stage(label, Stage::Import)?;
    import_active(service, &roles.watch_only, &descriptor, config.watch_only_range)
        .at_stage(label, Stage::Import)?;

    log::info!("Testing we derive new addresses for it");
    let mut addresses = check_derivation(service, roles, config, &descriptor)
        .at_stage(label, Stage::Derivation)?;

    log::info!("Testing we detect funds sent to one of them");
    let (address, funding_txid) =
        detect_funding(service, roles, config).at_stage(label, Stage::Funding)?;
    addresses.push(address);

    Ok(WatchOnlyOutcome {
        addresses,
        funding_txid,
    })
}

fn check_derivation<S: WalletService>(
    service: &S,
    roles: &Roles,
    config: &HarnessConfig,
    descriptor: &WalletDescriptor,
) -> Result<Vec<Address>, Error> {
    let desc = descriptor.to_string();
    let mut addresses = Vec::with_capacity(CHECKED_INDICES as usize + 1);

    for index in 0..CHECKED_INDICES {
        let from_wallet =
            service.get_new_address(&roles.watch_only, config.script_context.address_type())?;
        let derived = service.derive_addresses(&roles.funder, &desc, index)?;
        let expected = derived.get(index as usize).ok_or_else(|| Error::DerivationMismatch {
            index,
            wallet: from_wallet.to_string(),
            derived: format!("{} address(es), none at index {}", derived.len(), index),
        })?;
        if *expected != from_wallet {
            return Err(Error::DerivationMismatch {
                index,
                wallet: from_wallet.to_string(),
                derived: expected.to_string(),
            });
        }
        addresses.push(from_wallet);
    }

    // Read-only derivation must not move any counter
    let again = service.derive_addresses(&roles.funder, &desc, 0)?;
    match again.first() {
        Some(addr) if *addr == addresses[0] => Ok(addresses),
        other => Err(Error::UnstableDerivation {
            index: 0,
            first: addresses[0].to_string(),
            second: other.map(|a| a.to_string()).unwrap_or_else(|| "nothing".into()),
        }),
    }
}

fn detect_funding<S: WalletService>(
    service: &S,
    roles: &Roles,
    config: &HarnessConfig,
) -> Result<(Address, Txid), Error> {
    let address =
        service.get_new_address(&roles.watch_only, config.script_context.address_type())?;
    let txid = service.send_to_address(&roles.funder, &address, config.fund_amount)?;
    log::debug!("Funded {} with {} in {}", address, config.fund_amount, txid);

    let filter = [address.clone()];
    let utxo = wait_until(
        &config.poll_policy(),
        &format!("a watch-only UTXO at {}", address),
        || {
            let mut utxos = service.list_unspent(&roles.watch_only, 0, &filter)?;
            Ok((utxos.len() == 1).then(|| utxos.remove(0)))
        },
    )?;

    if utxo.txid != txid {
        return Err(Error::UnexpectedUtxo(format!(
            "txid {} at {}, funder sent {}",
            utxo.txid, address, txid
        )));
    }
    if !utxo.solvable {
        return Err(Error::UnexpectedUtxo(format!(
            "{}:{} is not solvable",
            utxo.txid, utxo.vout
        )));
    }
    Ok((address, txid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::test_utils::{bootstrapped_mock, quick_config};
    use msoracle_node::mock::{Faults, MockNode};

    fn first_case() -> PolicyCase {
        Catalog::builtin().cases()[0].clone()
    }

    fn run_with(faults: Faults) -> Failure {
        let (node, roles) = bootstrapped_mock();
        node.inject_faults(faults);
        run(&node, &roles, &quick_config(), &first_case()).unwrap_err()
    }

    #[test]
    fn test_every_builtin_watch_only_case() {
        let (node, roles) = bootstrapped_mock();
        let config = quick_config();
        for case in Catalog::builtin().watch_only() {
            let outcome = run(&node, &roles, &config, case).unwrap();
            assert_eq!(outcome.addresses.len(), 3, "{}", case.label);
        }
    }

    #[test]
    fn test_addresses_match_derivation() {
        let (node, roles) = bootstrapped_mock();
        let config = quick_config();
        let catalog = Catalog::builtin();
        let case = &catalog.cases()[0];
        let outcome = run(&node, &roles, &config, case).unwrap();

        let desc = WalletDescriptor::build(&case.expression, config.script_context).unwrap();
        let derived = node
            .derive_addresses(&roles.funder, &desc.to_string(), 2)
            .unwrap();
        assert_eq!(outcome.addresses, derived);
        assert!(node.is_active_address(roles.watch_only.name(), &derived[2]));
    }

    #[test]
    fn test_nested_context() {
        let (node, roles) = bootstrapped_mock();
        let mut config = quick_config();
        config.script_context = crate::descriptor::ScriptContext::NestedSegwitV0;
        let catalog = Catalog::builtin();
        let case = &catalog.cases()[0];
        let outcome = run(&node, &roles, &config, case).unwrap();
        assert!(outcome
            .addresses
            .iter()
            .all(|a| a.address_type() == Some(bitcoin::AddressType::P2sh)));
    }

    #[test]
    fn test_private_policy_fails_at_import() {
        let (node, roles) = bootstrapped_mock();
        let signable = Catalog::builtin().signable().next().cloned().unwrap();
        let failure = run(&node, &roles, &quick_config(), &signable).unwrap_err();
        assert_eq!(failure.stage, Stage::Import);
        assert!(matches!(failure.error, Error::ImportRejected(_)));
    }

    #[test]
    fn test_unfunded_funder_fails_at_funding() {
        // No bootstrap: the funder cannot pay
        let node = MockNode::new();
        let roles = crate::test_utils::mock_roles(&node);
        let catalog = Catalog::builtin();
        let case = &catalog.cases()[0];
        let failure = run(&node, &roles, &quick_config(), case).unwrap_err();
        assert_eq!(failure.stage, Stage::Funding);
        assert!(matches!(failure.error, Error::Node(ref e) if e.is_rejection()));
    }

    #[test]
    fn test_skewed_wallet_fails_derivation() {
        let failure = run_with(Faults {
            address_skew: 1,
            ..Faults::default()
        });
        assert_eq!(failure.stage, Stage::Derivation);
        assert!(matches!(
            failure.error,
            Error::DerivationMismatch { index: 0, .. }
        ));
    }

    #[test]
    fn test_drifting_rederivation_detected() {
        // Both index checks pass, the re-derivation of index 0 moves
        let failure = run_with(Faults {
            unstable_derivation_after: Some(2),
            ..Faults::default()
        });
        assert_eq!(failure.stage, Stage::Derivation);
        match failure.error {
            Error::UnstableDerivation {
                index,
                first,
                second,
            } => {
                assert_eq!(index, 0);
                assert_ne!(first, second);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unsolvable_output_fails_funding() {
        let failure = run_with(Faults {
            unsolvable_outputs: true,
            ..Faults::default()
        });
        assert_eq!(failure.stage, Stage::Funding);
        assert!(matches!(
            failure.error,
            Error::UnexpectedUtxo(ref m) if m.contains("not solvable")
        ));
    }

    #[test]
    fn test_lost_payment_times_out() {
        let failure = run_with(Faults {
            drop_payments: true,
            ..Faults::default()
        });
        assert_eq!(failure.stage, Stage::Funding);
        assert!(matches!(failure.error, Error::FundingTimeout { .. }));
        assert_eq!(failure.policy, first_case().label);
        assert_eq!(failure.expression, Some(first_case().expression));
    }
}
