//! Signing scenario
//!
//! Proves a key-holding wallet can spend a policy end to end. The candidate
//! transaction moves one way through drafted, signed, finalized and
//! broadcast; a step that reports incomplete fails the policy, it is never
//! retried with different fields.

use crate::catalog::{PolicyCase, Profile};
use crate::config::HarnessConfig;
use crate::constraint::SpendConstraint;
use crate::descriptor::WalletDescriptor;
use crate::error::{AtStage, Error, Failure, Stage};
use crate::import::import_active;
use crate::poll::wait_until;
use crate::session::Roles;
use bitcoin::Txid;
use msoracle_node::{AddressType, PsbtInput, Unspent, WalletService};

/// What the scenario observed for one policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningOutcome {
    pub funding_txid: Txid,
    pub spend_txid: Txid,
    /// Whether an early broadcast was attempted and refused
    pub premature_refused: bool,
}

/// Run the signing scenario for `case`.
///
/// Cases that are not [`Profile::Signable`] are refused with
/// [`Stage::Construct`]: the harness never tries preimage paths.
pub fn run<S: WalletService>(
    service: &S,
    roles: &Roles,
    config: &HarnessConfig,
    case: &PolicyCase,
) -> Result<SigningOutcome, Failure> {
    prove(service, roles, config, case).map_err(|f| f.with_expression(&case.expression))
}

fn prove<S: WalletService>(
    service: &S,
    roles: &Roles,
    config: &HarnessConfig,
    case: &PolicyCase,
) -> Result<SigningOutcome, Failure> {
    let label = case.label.as_str();
    let (constraint, enforced) = match case.profile {
        Profile::Signable {
            constraint,
            enforced,
        } => (constraint, enforced),
        _ => {
            return Err(Failure::new(
                label,
                Stage::Construct,
                Error::NotSignable(label.to_string()),
            ))
        }
    };

    log::info!("Importing private Miniscript '{}'", case.expression);
    let descriptor = WalletDescriptor::build(&case.expression, config.script_context)
        .at_stage(label, Stage::Import)?;
    import_active(service, &roles.signer, &descriptor, 1).at_stage(label, Stage::Import)?;

    log::info!("Generating an address for it and testing it detects funds");
    let utxo = fund_and_confirm(service, roles, config).at_stage(label, Stage::Funding)?;

    log::info!("Creating, signing, and broadcasting a transaction spending these funds");
    let dest = service
        .get_new_address(&roles.funder, AddressType::Bech32)
        .at_stage(label, Stage::Construct)?;
    let psbt = service
        .create_psbt(
            &roles.signer,
            &[PsbtInput {
                txid: utxo.txid,
                vout: utxo.vout,
                sequence: constraint.sequence(),
            }],
            &[(dest, config.spend_amount)],
            constraint.lock_time(),
        )
        .at_stage(label, Stage::Construct)?;

    let signed = service
        .process_psbt(&roles.signer, &psbt)
        .at_stage(label, Stage::Sign)?;
    if !signed.complete {
        return Err(Failure::new(
            label,
            Stage::Sign,
            Error::SigningIncomplete {
                step: "walletprocesspsbt",
            },
        ));
    }

    let finalized = service
        .finalize_psbt(&roles.signer, &signed.psbt)
        .at_stage(label, Stage::Finalize)?;
    let hex = match finalized.hex {
        Some(hex) if finalized.complete => hex,
        _ => {
            return Err(Failure::new(
                label,
                Stage::Finalize,
                Error::SigningIncomplete {
                    step: "finalizepsbt",
                },
            ))
        }
    };

    let premature_refused = if config.check_premature_broadcast && enforced {
        refuse_premature(service, roles, constraint, &utxo, &hex)
            .at_stage(label, Stage::PrematureBroadcast)?
    } else {
        false
    };

    satisfy_timelocks(service, roles, constraint).at_stage(label, Stage::Timelocks)?;

    let spend_txid = match service.send_raw_transaction(&roles.signer, &hex) {
        Ok(txid) => txid,
        Err(e) if e.is_rejection() => {
            return Err(Failure::new(
                label,
                Stage::Broadcast,
                Error::BroadcastRejected(e.to_string()),
            ))
        }
        Err(e) => return Err(Failure::new(label, Stage::Broadcast, e)),
    };
    log::info!("Spent '{}' in {}", label, spend_txid);

    Ok(SigningOutcome {
        funding_txid: utxo.txid,
        spend_txid,
        premature_refused,
    })
}

/// Fund a fresh signer address, wait for the mempool, confirm it once and
/// wait for the signer to report the confirmed output
fn fund_and_confirm<S: WalletService>(
    service: &S,
    roles: &Roles,
    config: &HarnessConfig,
) -> Result<Unspent, Error> {
    let address =
        service.get_new_address(&roles.signer, config.script_context.address_type())?;
    let txid = service.send_to_address(&roles.funder, &address, config.fund_amount)?;

    let policy = config.poll_policy();
    wait_until(&policy, &format!("{} in the mempool", txid), || {
        Ok(service
            .get_raw_mempool(&roles.funder)?
            .contains(&txid)
            .then_some(()))
    })?;

    let miner = service.get_new_address(&roles.funder, AddressType::Bech32)?;
    service.generate_to_address(&roles.funder, 1, &miner)?;

    let filter = [address.clone()];
    let utxo = wait_until(
        &policy,
        &format!("a confirmed signer UTXO at {}", address),
        || Ok(service.list_unspent(&roles.signer, 1, &filter)?.into_iter().next()),
    )?;

    if utxo.txid != txid || !utxo.solvable {
        return Err(Error::UnexpectedUtxo(format!(
            "{}:{} (solvable: {}), funder sent {}",
            utxo.txid, utxo.vout, utxo.solvable, txid
        )));
    }
    Ok(utxo)
}

/// Broadcast before the timelock matures and require refusal.
///
/// Returns whether the attempt was made (the constraint may already be met).
fn refuse_premature<S: WalletService>(
    service: &S,
    roles: &Roles,
    constraint: SpendConstraint,
    utxo: &Unspent,
    hex: &str,
) -> Result<bool, Error> {
    let tip = service.get_block_count(&roles.funder)?;
    if !constraint.premature_at(tip, utxo.confirmations) {
        return Ok(false);
    }
    match service.send_raw_transaction(&roles.signer, hex) {
        Ok(txid) => Err(Error::PrematureBroadcastAccepted(txid)),
        Err(e) if e.is_rejection() => {
            log::info!("Premature broadcast at height {} refused: {}", tip, e);
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Mine the relative requirement first, then any remaining absolute shortfall
fn satisfy_timelocks<S: WalletService>(
    service: &S,
    roles: &Roles,
    constraint: SpendConstraint,
) -> Result<(), Error> {
    let relative = constraint.relative_blocks();
    if relative > 0 {
        let miner = service.get_new_address(&roles.funder, AddressType::Bech32)?;
        service.generate_to_address(&roles.funder, relative, &miner)?;
    }

    let height = service.get_block_count(&roles.funder)?;
    let shortfall = constraint.absolute_shortfall(height);
    if shortfall > 0 {
        let miner = service.get_new_address(&roles.funder, AddressType::Bech32)?;
        service.generate_to_address(&roles.funder, shortfall, &miner)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::test_utils::{bootstrapped_mock, quick_config, TPRV};
    use msoracle_node::mock::Faults;

    fn older_two() -> PolicyCase {
        PolicyCase::signable(
            "relative-timelock",
            format!("and_v(v:older(2),pk({}/*))", TPRV),
            SpendConstraint::relative(2),
            true,
        )
    }

    fn no_timelock() -> PolicyCase {
        PolicyCase::signable(
            "single-key",
            format!("pk({}/*)", TPRV),
            SpendConstraint::NONE,
            true,
        )
    }

    fn run_with(faults: Faults, case: &PolicyCase) -> Failure {
        let (node, roles) = bootstrapped_mock();
        node.inject_faults(faults);
        run(&node, &roles, &quick_config(), case).unwrap_err()
    }

    #[test]
    fn test_every_builtin_signable_case() {
        let (node, roles) = bootstrapped_mock();
        let config = quick_config();
        for case in Catalog::builtin().signable() {
            let outcome = run(&node, &roles, &config, case)
                .unwrap_or_else(|f| panic!("{}", f));
            assert_ne!(outcome.funding_txid, outcome.spend_txid);
        }
    }

    #[test]
    fn test_relative_timelock_refuses_early_spend() {
        let (node, roles) = bootstrapped_mock();
        let start = node.height();
        let outcome = run(&node, &roles, &quick_config(), &older_two()).unwrap();
        assert!(outcome.premature_refused);
        // One confirming block plus the two required by older(2)
        assert_eq!(node.height(), start + 3);
        assert_eq!(node.mempool_len(), 1);
    }

    #[test]
    fn test_unenforced_case_skips_early_spend() {
        let (node, roles) = bootstrapped_mock();
        let case = Catalog::builtin()
            .signable()
            .find(|c| c.label == "andor-unused-preimage-branch")
            .cloned()
            .unwrap();
        let outcome = run(&node, &roles, &quick_config(), &case).unwrap();
        assert!(!outcome.premature_refused);
    }

    #[test]
    fn test_absolute_timelock_mines_shortfall() {
        let (node, roles) = bootstrapped_mock();
        let target = node.height() + 10;
        let case = PolicyCase::signable(
            "after-future",
            format!("and_v(v:after({}),pk({}/*))", target, TPRV),
            SpendConstraint::absolute(target),
            true,
        );
        let outcome = run(&node, &roles, &quick_config(), &case).unwrap();
        assert!(outcome.premature_refused);
        assert_eq!(node.height(), target);
    }

    #[test]
    fn test_premature_check_can_be_disabled() {
        let (node, roles) = bootstrapped_mock();
        let mut config = quick_config();
        config.check_premature_broadcast = false;
        let outcome = run(&node, &roles, &config, &older_two()).unwrap();
        assert!(!outcome.premature_refused);
    }

    #[test]
    fn test_trackable_case_refused() {
        let (node, roles) = bootstrapped_mock();
        let case = Catalog::builtin().cases()[0].clone();
        let failure = run(&node, &roles, &quick_config(), &case).unwrap_err();
        assert_eq!(failure.stage, Stage::Construct);
    }

    #[test]
    fn test_public_only_policy_fails_at_import() {
        let (node, roles) = bootstrapped_mock();
        let case = PolicyCase::signable(
            "no-private-key",
            "pk(tpubD6NzVbkrYhZ4XRMcMFMMFvzVt6jaDAtjZhD7JLwdPdMm9xa76DnxYYP7w9TZGJDVFkek3ArwVsuacheqqPog8TH5iBCX1wuig8PLXim4n9a/*)",
            SpendConstraint::NONE,
            true,
        );
        let failure = run(&node, &roles, &quick_config(), &case).unwrap_err();
        assert_eq!(failure.stage, Stage::Import);
        assert!(matches!(failure.error, Error::ImportRejected(_)));
    }

    #[test]
    fn test_lost_payment_times_out_in_mempool() {
        let failure = run_with(
            Faults {
                drop_payments: true,
                ..Faults::default()
            },
            &no_timelock(),
        );
        assert_eq!(failure.stage, Stage::Funding);
        assert!(matches!(
            failure.error,
            Error::FundingTimeout { ref condition, .. } if condition.contains("mempool")
        ));
    }

    #[test]
    fn test_unsolvable_output_fails_funding() {
        let failure = run_with(
            Faults {
                unsolvable_outputs: true,
                ..Faults::default()
            },
            &no_timelock(),
        );
        assert_eq!(failure.stage, Stage::Funding);
        assert!(matches!(
            failure.error,
            Error::UnexpectedUtxo(ref m) if m.contains("solvable: false")
        ));
    }

    #[test]
    fn test_incomplete_signing() {
        let failure = run_with(
            Faults {
                incomplete_signing: true,
                ..Faults::default()
            },
            &no_timelock(),
        );
        assert_eq!(failure.stage, Stage::Sign);
        assert!(failure.to_string().contains(&no_timelock().expression));
        assert!(matches!(
            failure.error,
            Error::SigningIncomplete {
                step: "walletprocesspsbt"
            }
        ));
    }

    #[test]
    fn test_incomplete_finalize() {
        let failure = run_with(
            Faults {
                incomplete_finalize: true,
                ..Faults::default()
            },
            &no_timelock(),
        );
        assert_eq!(failure.stage, Stage::Finalize);
        assert!(matches!(
            failure.error,
            Error::SigningIncomplete {
                step: "finalizepsbt"
            }
        ));
    }

    #[test]
    fn test_rejected_broadcast() {
        let failure = run_with(
            Faults {
                reject_broadcast: Some("mandatory-script-verify-flag-failed".into()),
                ..Faults::default()
            },
            &no_timelock(),
        );
        assert_eq!(failure.stage, Stage::Broadcast);
        assert!(matches!(
            failure.error,
            Error::BroadcastRejected(ref m) if m.contains("mandatory-script-verify-flag-failed")
        ));
    }

    #[test]
    fn test_early_spend_accepted_is_a_failure() {
        let (node, roles) = bootstrapped_mock();
        node.inject_faults(Faults {
            ignore_timelocks: true,
            ..Faults::default()
        });
        let start = node.height();
        let failure = run(&node, &roles, &quick_config(), &older_two()).unwrap_err();
        assert_eq!(failure.stage, Stage::PrematureBroadcast);
        assert!(matches!(failure.error, Error::PrematureBroadcastAccepted(_)));
        // Only the funding confirmation was mined
        assert_eq!(node.height(), start + 1);
    }
}
