//! Live regtest tests: a real bitcoind, no simulator.
//!
//! Needs a Bitcoin Core binary with Miniscript descriptor support (24.0+):
//!   BITCOIND_EXE=/path/to/bitcoind cargo test -p msoracle-e2e -- --ignored --nocapture

use bitcoind::BitcoinD;
use msoracle_harness::{
    sanity, signing, watch_only, Catalog, HarnessConfig, Roles, ScriptContext, Session,
    WalletDescriptor,
};
use msoracle_node::{Auth, RpcService, WalletService};
use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Fresh regtest node; its "default" wallet is the funder.
fn start_node() -> (BitcoinD, RpcService) {
    init_logger();
    let exe = bitcoind::exe_path().expect("set BITCOIND_EXE to a bitcoind binary");
    let bitcoind = BitcoinD::new(exe).expect("bitcoind should start");
    let service = RpcService::new(
        &bitcoind.rpc_url(),
        Auth::CookieFile(bitcoind.params.cookie_file.clone()),
        bitcoin::Network::Regtest,
    )
    .expect("RPC client");
    (bitcoind, service)
}

fn roles() -> Roles {
    Roles::new("default", "ms_wo", "ms_sig")
}

fn case(label: &str) -> msoracle_harness::PolicyCase {
    Catalog::builtin()
        .cases()
        .iter()
        .find(|c| c.label == label)
        .cloned()
        .unwrap_or_else(|| panic!("builtin case {label}"))
}

// ============================================================================
// Full sessions
// ============================================================================

#[test]
#[ignore = "requires bitcoind (BITCOIND_EXE)"]
fn test_builtin_catalog_wsh() {
    let (_bitcoind, service) = start_node();
    let session = Session::bootstrap(&service, roles(), HarnessConfig::default()).unwrap();

    let report = session.run(&Catalog::builtin()).unwrap();
    println!("{}", report);
    assert_eq!(report.proven.len(), Catalog::builtin().len() + 1);
}

#[test]
#[ignore = "requires bitcoind (BITCOIND_EXE)"]
fn test_builtin_catalog_sh_wsh() {
    let (_bitcoind, service) = start_node();
    let config = HarnessConfig {
        script_context: ScriptContext::NestedSegwitV0,
        ..HarnessConfig::default()
    };
    let session = Session::bootstrap(&service, roles(), config).unwrap();

    let report = session.run(&Catalog::builtin()).unwrap();
    assert_eq!(report.proven.len(), Catalog::builtin().len() + 1);
}

// ============================================================================
// Single scenarios
// ============================================================================

#[test]
#[ignore = "requires bitcoind (BITCOIND_EXE)"]
fn test_node_refuses_insane_policy() {
    let (_bitcoind, service) = start_node();
    service.create_wallet("ms_wo", false).unwrap();
    let wallet = roles().watch_only;

    sanity::check(&service, &wallet, ScriptContext::SegwitV0).unwrap();
    sanity::check(&service, &wallet, ScriptContext::NestedSegwitV0).unwrap();
}

#[test]
#[ignore = "requires bitcoind (BITCOIND_EXE)"]
fn test_relative_timelock_refused_then_spent() {
    let (_bitcoind, service) = start_node();
    let session = Session::bootstrap(&service, roles(), HarnessConfig::default()).unwrap();

    let outcome = signing::run(
        &service,
        session.roles(),
        session.config(),
        &case("relative-timelock"),
    )
    .unwrap();
    assert!(outcome.premature_refused);
    assert_ne!(outcome.funding_txid, outcome.spend_txid);

    let mempool = service.get_raw_mempool(&session.roles().funder).unwrap();
    assert!(mempool.contains(&outcome.spend_txid));
}

#[test]
#[ignore = "requires bitcoind (BITCOIND_EXE)"]
fn test_watch_only_derivation_is_stable() {
    let (_bitcoind, service) = start_node();
    let session = Session::bootstrap(&service, roles(), HarnessConfig::default()).unwrap();
    let case = case("liquid-federation-recovery");

    let outcome = watch_only::run(&service, session.roles(), session.config(), &case).unwrap();
    // Two derivation checks, then the funded address
    assert_eq!(outcome.addresses.len(), 3);

    let descriptor = WalletDescriptor::build(&case.expression, ScriptContext::SegwitV0).unwrap();
    let wallet = &session.roles().watch_only;
    let first = service
        .derive_addresses(wallet, &descriptor.to_string(), 2)
        .unwrap();
    let second = service
        .derive_addresses(wallet, &descriptor.to_string(), 2)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first, outcome.addresses);
}
