//! Request and response shapes exchanged with the wallet/node service

use bitcoin::{Address, Amount, Sequence, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three wallet roles of a harness session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Holds spendable funds and advances the chain
    Funder,
    /// Public descriptors only, private keys disabled
    WatchOnly,
    /// Private-key-bearing descriptors
    Signer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Funder => write!(f, "funder"),
            Role::WatchOnly => write!(f, "watch-only"),
            Role::Signer => write!(f, "signer"),
        }
    }
}

/// Identifies one wallet on the service, tagged with the role it plays
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletHandle {
    role: Role,
    name: String,
}

impl WalletHandle {
    pub fn new(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Wallet name as known to the node
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for WalletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wallet '{}'", self.role, self.name)
    }
}

/// Output type requested from `get_new_address`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    /// Native segwit (P2WPKH / P2WSH)
    Bech32,
    /// Segwit nested in P2SH
    P2shSegwit,
}

impl AddressType {
    /// Name used by Bitcoin Core's `getnewaddress`
    pub fn rpc_name(&self) -> &'static str {
        match self {
            AddressType::Bech32 => "bech32",
            AddressType::P2shSegwit => "p2sh-segwit",
        }
    }
}

/// Rescan origin for an imported descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrigin {
    /// Only track from the current tip onward
    Now,
    /// Rescan from a UNIX timestamp
    At(u64),
}

/// One entry of an `import_descriptors` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// Checksummed descriptor string
    pub descriptor: String,
    /// Whether the descriptor becomes eligible for address generation
    pub active: bool,
    /// Number of indices to derive up front (`None` for non-ranged imports)
    pub range_size: Option<u32>,
    /// First derivation index handed out by `get_new_address`
    pub start_index: u32,
    pub time_origin: TimeOrigin,
}

impl ImportRequest {
    /// An active, ranged import starting at index 0
    pub fn active(descriptor: impl Into<String>, range_size: u32) -> Self {
        Self {
            descriptor: descriptor.into(),
            active: true,
            range_size: Some(range_size),
            start_index: 0,
            time_origin: TimeOrigin::Now,
        }
    }

    /// An inactive import with no derivation range
    pub fn inactive(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            active: false,
            range_size: None,
            start_index: 0,
            time_origin: TimeOrigin::Now,
        }
    }

    /// Inclusive derivation range `[start, end]` covering `range_size` indices
    pub fn range_bounds(&self) -> Option<(u32, u32)> {
        self.range_size
            .map(|size| (self.start_index, self.start_index + size.saturating_sub(1)))
    }
}

/// Structured error attached to a failed import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: i64,
    pub message: String,
}

/// Outcome of one import request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<Diagnostic>,
}

impl ImportResult {
    pub fn accepted() -> Self {
        Self {
            success: true,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            warnings: Vec::new(),
            error: Some(Diagnostic {
                code,
                message: message.into(),
            }),
        }
    }

    /// The diagnostic message, or an empty string when none was given
    pub fn message(&self) -> &str {
        self.error.as_ref().map(|d| d.message.as_str()).unwrap_or("")
    }
}

/// An unspent output as reported by a wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unspent {
    pub txid: Txid,
    pub vout: u32,
    pub address: Address,
    pub amount: Amount,
    /// 0 while in the mempool
    pub confirmations: u32,
    /// Whether the wallet knows how to build a satisfying witness
    pub solvable: bool,
}

/// One input of a PSBT draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsbtInput {
    pub txid: Txid,
    pub vout: u32,
    pub sequence: Sequence,
}

/// Result of asking a wallet to sign a PSBT
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessedPsbt {
    pub psbt: String,
    pub complete: bool,
}

/// Result of finalizing a PSBT
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FinalizedPsbt {
    #[serde(default)]
    pub psbt: Option<String>,
    /// Network-serialized transaction, present once complete
    #[serde(default)]
    pub hex: Option<String>,
    pub complete: bool,
}
