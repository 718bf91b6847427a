//! msoracle wallet/node service interface
//!
//! The Miniscript harness never talks to a node directly. Every interaction
//! goes through the [`WalletService`] trait, a synchronous request/response
//! vocabulary covering:
//! - Wallet creation and descriptor import
//! - Address generation and deterministic derivation
//! - Funding, UTXO listing and mempool inspection
//! - Block generation (regtest only)
//! - PSBT creation, signing, finalization and broadcast
//!
//! Two implementations are provided:
//! - [`RpcService`]: Bitcoin Core JSON-RPC, one endpoint per wallet
//! - `mock::MockNode` (feature `mock`): an in-memory regtest simulator
//!
//! # Example
//!
//! ```ignore
//! use msoracle_node::{RpcService, Auth, WalletService, WalletHandle, Role, AddressType};
//! use bitcoin::Network;
//!
//! let node = RpcService::new("http://127.0.0.1:18443", Auth::CookieFile(cookie), Network::Regtest)?;
//! let funder = WalletHandle::new(Role::Funder, "default");
//! let addr = node.get_new_address(&funder, AddressType::Bech32)?;
//! println!("Funder address: {}", addr);
//! ```

pub mod rpc;
pub mod types;

#[cfg(feature = "mock")]
pub mod mock;

pub use bitcoincore_rpc::Auth;
pub use rpc::RpcService;
pub use types::{
    AddressType, Diagnostic, FinalizedPsbt, ImportRequest, ImportResult, ProcessedPsbt,
    PsbtInput, Role, TimeOrigin, Unspent, WalletHandle,
};

use bitcoin::{absolute, Address, Amount, BlockHash, Network, Txid};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from wallet/node operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("RPC transport error: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),

    #[error("Request rejected by node: {0}")]
    Rejected(String),

    #[error("Unknown wallet: {0}")]
    UnknownWallet(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Malformed response to {method}: {reason}")]
    MalformedResponse {
        method: &'static str,
        reason: String,
    },
}

impl Error {
    /// Whether the node itself refused the request (as opposed to a
    /// transport or decoding failure).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}

/// Synchronous request/response interface to the external wallet/node service.
///
/// Wallet-scoped calls take the [`WalletHandle`] of the role issuing them.
/// Chain-wide calls (`derive_addresses`, `get_raw_mempool`, `get_block_count`,
/// `generate_to_address`) are still routed through a wallet, as the funder
/// drives the chain.
pub trait WalletService {
    /// Network the service runs on
    fn network(&self) -> Network;

    /// Create a descriptor wallet
    fn create_wallet(&self, name: &str, enable_private_keys: bool) -> Result<(), Error>;

    /// Import descriptors, one result per request, in request order
    fn import_descriptors(
        &self,
        wallet: &WalletHandle,
        requests: &[ImportRequest],
    ) -> Result<Vec<ImportResult>, Error>;

    /// Next address from the wallet's active descriptor for `address_type`
    fn get_new_address(
        &self,
        wallet: &WalletHandle,
        address_type: AddressType,
    ) -> Result<Address, Error>;

    /// Addresses of `descriptor` at indices `0..=index`
    fn derive_addresses(
        &self,
        wallet: &WalletHandle,
        descriptor: &str,
        index: u32,
    ) -> Result<Vec<Address>, Error>;

    /// Pay `amount` to `address` from the wallet's funds
    fn send_to_address(
        &self,
        wallet: &WalletHandle,
        address: &Address,
        amount: Amount,
    ) -> Result<Txid, Error>;

    /// Unspent outputs with at least `min_confirmations`, filtered to `addresses`
    fn list_unspent(
        &self,
        wallet: &WalletHandle,
        min_confirmations: u32,
        addresses: &[Address],
    ) -> Result<Vec<Unspent>, Error>;

    /// Transaction ids currently in the mempool
    fn get_raw_mempool(&self, wallet: &WalletHandle) -> Result<HashSet<Txid>, Error>;

    /// Mine `blocks` blocks paying the coinbase to `address`
    fn generate_to_address(
        &self,
        wallet: &WalletHandle,
        blocks: u32,
        address: &Address,
    ) -> Result<Vec<BlockHash>, Error>;

    /// Current chain tip height
    fn get_block_count(&self, wallet: &WalletHandle) -> Result<u32, Error>;

    /// Trusted spendable balance of the wallet
    fn get_balance(&self, wallet: &WalletHandle) -> Result<Amount, Error>;

    /// Draft a PSBT (base64) spending `inputs` to `outputs`
    fn create_psbt(
        &self,
        wallet: &WalletHandle,
        inputs: &[PsbtInput],
        outputs: &[(Address, Amount)],
        lock_time: absolute::LockTime,
    ) -> Result<String, Error>;

    /// Let the wallet fill in whatever witness data it can
    fn process_psbt(&self, wallet: &WalletHandle, psbt: &str) -> Result<ProcessedPsbt, Error>;

    /// Convert a fully signed PSBT into a network-serialized transaction
    fn finalize_psbt(&self, wallet: &WalletHandle, psbt: &str) -> Result<FinalizedPsbt, Error>;

    /// Submit a raw transaction (hex) to the mempool
    fn send_raw_transaction(&self, wallet: &WalletHandle, hex: &str) -> Result<Txid, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(Error::Rejected("non-BIP68-final".into()).is_rejection());
        assert!(!Error::UnknownWallet("ms_wo".into()).is_rejection());
        assert!(!Error::InvalidAddress("bcrt1...".into()).is_rejection());
    }

    #[test]
    fn test_error_display() {
        let err = Error::MalformedResponse {
            method: "getbalance",
            reason: "negative amount".into(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed response to getbalance: negative amount"
        );
    }
}
