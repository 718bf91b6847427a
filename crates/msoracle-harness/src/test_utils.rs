//! Shared fixtures for harness tests running against the in-memory simulator.

use crate::config::HarnessConfig;
use crate::session::Roles;
use msoracle_node::mock::{MockNode, DEFAULT_WALLET};
use msoracle_node::{AddressType, WalletService};

/// Private key used by the built-in timelocked policies
pub const TPRV: &str = "tprv8ZgxMBicQKsPdZFz4VVtpR8NZrjL4LpuLcfVB8oK9evqe6gkYB8GMZ2nf9SQGhVDZpWCpQpEmPckToyTja8R4xSoMMvwYRG4T4uvwhbrNWh";

/// Create the watch-only and signing wallets on `node`.
pub fn mock_roles(node: &MockNode) -> Roles {
    node.create_wallet("ms_wo", false).unwrap();
    node.create_wallet("ms_sig", true).unwrap();
    Roles::new(DEFAULT_WALLET, "ms_wo", "ms_sig")
}

/// A simulator at height 101 with one mature coinbase in the funder wallet.
pub fn bootstrapped_mock() -> (MockNode, Roles) {
    let node = MockNode::new();
    let roles = mock_roles(&node);
    let addr = node
        .get_new_address(&roles.funder, AddressType::Bech32)
        .unwrap();
    node.generate_to_address(&roles.funder, 101, &addr).unwrap();
    (node, roles)
}

/// Defaults with a short poll bound, the simulator never needs to wait.
pub fn quick_config() -> HarnessConfig {
    HarnessConfig {
        poll_timeout_secs: 1,
        poll_interval_ms: 1,
        ..HarnessConfig::default()
    }
}
