//! In-memory regtest simulator
//!
//! Emulates the slice of a Bitcoin Core node and its descriptor wallets that
//! the harness exercises. Descriptors are parsed, sanity-checked and derived
//! with miniscript, so address derivation is real. PSBTs and raw transactions
//! are opaque handles into a draft table, and consensus is reduced to BIP68
//! sequence locks and nLockTime finality.
//!
//! Single-threaded by construction: state lives in a `RefCell`.
//!
//! [`Faults`] make the simulator misbehave the way a broken wallet or node
//! would, so each failure the harness reports can be reached offline.

use crate::types::{
    AddressType, FinalizedPsbt, ImportRequest, ImportResult, ProcessedPsbt, PsbtInput, Unspent,
    WalletHandle,
};
use crate::{Error, WalletService};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{absolute, Address, Amount, BlockHash, Network, ScriptBuf, Txid};
use miniscript::descriptor::{Descriptor, DescriptorPublicKey};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Wallet every simulator starts with, mirroring a fresh regtest node
pub const DEFAULT_WALLET: &str = "default";

const COINBASE_MATURITY: u32 = 100;
const BLOCK_SUBSIDY: Amount = Amount::from_sat(50 * 100_000_000);
/// Flat fee charged by `send_to_address`
const WALLET_FEE: Amount = Amount::from_sat(1_000);
const LOCK_TIME_THRESHOLD: u32 = 500_000_000;

const SEQUENCE_FINAL: u32 = 0xffff_ffff;
const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

const RPC_WALLET_ERROR: i64 = -4;
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

const PSBT_PREFIX: &str = "mockpsbt:";

/// Misbehaviours injected with [`MockNode::inject_faults`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// `list_unspent` reports every output as unsolvable
    pub unsolvable_outputs: bool,
    /// `process_psbt` never reports complete
    pub incomplete_signing: bool,
    /// `finalize_psbt` never reports complete
    pub incomplete_finalize: bool,
    /// BIP68 and nLockTime are not checked at broadcast
    pub ignore_timelocks: bool,
    /// Every broadcast is refused with this reason
    pub reject_broadcast: Option<String>,
    /// Active descriptors hand out addresses this many indices ahead
    pub address_skew: u32,
    /// `derive_addresses` shifts by one index once it has answered this many calls
    pub unstable_derivation_after: Option<u32>,
    /// `send_to_address` returns a txid but the payment never reaches the mempool
    pub drop_payments: bool,
}

/// A descriptor imported into a simulated wallet
struct TrackedDescriptor {
    descriptor: Descriptor<DescriptorPublicKey>,
    has_private_keys: bool,
    next_index: u32,
    addresses: BTreeMap<u32, Address>,
}

impl TrackedDescriptor {
    fn address_at(&mut self, index: u32, network: Network) -> Result<Address, String> {
        if let Some(addr) = self.addresses.get(&index) {
            return Ok(addr.clone());
        }
        let addr = derive_address(&self.descriptor, index, network)?;
        self.addresses.insert(index, addr.clone());
        Ok(addr)
    }

    fn owns(&self, address: &Address) -> bool {
        self.addresses.values().any(|a| a == address)
    }
}

#[derive(Default)]
struct MockWallet {
    private_keys: bool,
    descriptors: Vec<TrackedDescriptor>,
    active: HashMap<AddressType, usize>,
    /// Addresses from the wallet's own keypool (not from imports)
    keypool: Vec<Address>,
    coinbase_heights: Vec<u32>,
    spent: Amount,
}

impl MockWallet {
    fn owns(&self, address: &Address) -> bool {
        self.keypool.contains(address) || self.descriptors.iter().any(|d| d.owns(address))
    }

    fn can_sign_for(&self, address: &Address) -> bool {
        self.private_keys
            && (self.keypool.contains(address)
                || self
                    .descriptors
                    .iter()
                    .any(|d| d.has_private_keys && d.owns(address)))
    }

    fn balance(&self, tip: u32) -> Amount {
        let mature = self
            .coinbase_heights
            .iter()
            .filter(|h| tip - **h >= COINBASE_MATURITY)
            .count() as u64;
        (BLOCK_SUBSIDY * mature)
            .checked_sub(self.spent)
            .unwrap_or(Amount::ZERO)
    }
}

#[derive(Debug, Clone)]
struct Coin {
    txid: Txid,
    vout: u32,
    address: Address,
    amount: Amount,
    /// Confirmation height, `None` while in the mempool
    height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DraftStage {
    Drafted,
    Signed,
    Finalized,
}

#[derive(Debug, Clone)]
struct Draft {
    inputs: Vec<PsbtInput>,
    outputs: Vec<(Address, Amount)>,
    lock_time: absolute::LockTime,
    stage: DraftStage,
}

#[derive(Default)]
struct State {
    height: u32,
    wallets: HashMap<String, MockWallet>,
    coins: Vec<Coin>,
    mempool: Vec<Txid>,
    drafts: Vec<Draft>,
    tx_counter: u64,
    keypool_counter: u64,
    /// Results handed back by the next imports instead of evaluating them
    scripted_imports: Vec<ImportResult>,
    faults: Faults,
    derive_calls: u32,
}

impl State {
    fn wallet(&self, handle: &WalletHandle) -> Result<&MockWallet, Error> {
        self.wallets
            .get(handle.name())
            .ok_or_else(|| Error::UnknownWallet(handle.name().to_string()))
    }

    fn wallet_mut(&mut self, handle: &WalletHandle) -> Result<&mut MockWallet, Error> {
        self.wallets
            .get_mut(handle.name())
            .ok_or_else(|| Error::UnknownWallet(handle.name().to_string()))
    }

    fn next_txid(&mut self) -> Txid {
        self.tx_counter += 1;
        Txid::hash(&self.tx_counter.to_le_bytes())
    }

    fn owner_of(&self, address: &Address) -> Option<String> {
        self.wallets
            .iter()
            .find(|(_, w)| w.owns(address))
            .map(|(name, _)| name.clone())
    }

    fn coin_index(&self, txid: &Txid, vout: u32) -> Option<usize> {
        self.coins
            .iter()
            .position(|c| c.txid == *txid && c.vout == vout)
    }

    fn confirmations(&self, coin: &Coin) -> u32 {
        coin.height.map(|h| self.height - h + 1).unwrap_or(0)
    }
}

/// In-memory stand-in for a regtest node
pub struct MockNode {
    network: Network,
    secp: Secp256k1<All>,
    state: RefCell<State>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    /// A fresh chain at height 0 with an empty private-key wallet named [`DEFAULT_WALLET`]
    pub fn new() -> Self {
        let mut state = State::default();
        state.wallets.insert(
            DEFAULT_WALLET.to_string(),
            MockWallet {
                private_keys: true,
                ..MockWallet::default()
            },
        );
        Self {
            network: Network::Regtest,
            secp: Secp256k1::new(),
            state: RefCell::new(state),
        }
    }

    /// Current chain tip height
    pub fn height(&self) -> u32 {
        self.state.borrow().height
    }

    /// Number of transactions waiting in the mempool
    pub fn mempool_len(&self) -> usize {
        self.state.borrow().mempool.len()
    }

    /// Make the next `import_descriptors` call return `results` verbatim
    pub fn script_import(&self, results: Vec<ImportResult>) {
        self.state.borrow_mut().scripted_imports = results;
    }

    /// Misbehave as described by `faults` from now on
    pub fn inject_faults(&self, faults: Faults) {
        let mut state = self.state.borrow_mut();
        state.faults = faults;
        state.derive_calls = 0;
    }

    /// Whether `address` belongs to a descriptor imported into `wallet` as active
    pub fn is_active_address(&self, wallet: &str, address: &Address) -> bool {
        let state = self.state.borrow();
        state.wallets.get(wallet).is_some_and(|w| {
            w.active
                .values()
                .any(|idx| w.descriptors[*idx].owns(address))
        })
    }

    fn import_one(
        &self,
        wallet: &mut MockWallet,
        req: &ImportRequest,
    ) -> Result<(), (i64, String)> {
        let invalid = |e: miniscript::Error| {
            (
                RPC_INVALID_ADDRESS_OR_KEY,
                describe_descriptor_error(&req.descriptor, &e),
            )
        };
        let (descriptor, keymap) =
            Descriptor::parse_descriptor(&self.secp, &req.descriptor).map_err(invalid)?;
        descriptor.sanity_check().map_err(invalid)?;

        let has_private_keys = !keymap.is_empty();
        if has_private_keys && !wallet.private_keys {
            return Err((
                RPC_WALLET_ERROR,
                "Cannot import private keys to a wallet with private keys disabled".into(),
            ));
        }
        if !has_private_keys && wallet.private_keys {
            return Err((
                RPC_WALLET_ERROR,
                concat!(
                    "Cannot import descriptor without private keys ",
                    "to a wallet with private keys enabled"
                )
                .into(),
            ));
        }

        let ranged = descriptor.has_wildcard();
        if req.active && !ranged {
            let message = String::from("Active descriptors must be ranged");
            return Err((RPC_INVALID_ADDRESS_OR_KEY, message));
        }
        if !ranged && req.range_size.is_some() {
            return Err((
                RPC_INVALID_ADDRESS_OR_KEY,
                "Range should not be specified for an un-ranged descriptor".into(),
            ));
        }

        let address_type = if matches!(descriptor, Descriptor::Sh(_)) {
            AddressType::P2shSegwit
        } else {
            AddressType::Bech32
        };

        let mut tracked = TrackedDescriptor {
            descriptor,
            has_private_keys,
            next_index: req.start_index,
            addresses: BTreeMap::new(),
        };
        let (start, end) = if ranged {
            req.range_bounds().unwrap_or((req.start_index, req.start_index))
        } else {
            (0, 0)
        };
        for index in start..=end {
            tracked
                .address_at(index, self.network)
                .map_err(|e| (RPC_INVALID_ADDRESS_OR_KEY, e))?;
        }

        wallet.descriptors.push(tracked);
        if req.active {
            wallet.active.insert(address_type, wallet.descriptors.len() - 1);
        }
        Ok(())
    }
}

/// Core-style wording for descriptor parse and sanity failures
fn describe_descriptor_error(descriptor: &str, e: &miniscript::Error) -> String {
    let body = descriptor.split('#').next().unwrap_or(descriptor);
    let reason = match e {
        miniscript::Error::AnalysisError(analysis) => match analysis {
            miniscript::AnalysisError::SiglessBranch => "witnesses without signature exist",
            miniscript::AnalysisError::Malleable => "malleable witnesses exist",
            miniscript::AnalysisError::HeightTimelockCombination => {
                "contains mixes of timelocks expressed in blocks and seconds"
            }
            miniscript::AnalysisError::RepeatedPubkeys => "contains duplicate public keys",
            other => return format!("'{}' is not sane: {}", body, other),
        },
        other => return other.to_string(),
    };
    format!("'{}' is not sane: {}", body, reason)
}

fn derive_address(
    descriptor: &Descriptor<DescriptorPublicKey>,
    index: u32,
    network: Network,
) -> Result<Address, String> {
    descriptor
        .at_derivation_index(index)
        .map_err(|e| e.to_string())?
        .address(network)
        .map_err(|e| e.to_string())
}

fn draft_index(handle: &str) -> Result<usize, Error> {
    handle
        .strip_prefix(PSBT_PREFIX)
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::Rejected("TX decode failed".into()))
}

/// BIP68: a height-based relative lock of `n` on a coin confirmed at `coin_height`
/// is met for inclusion in the block after `tip` once `coin_height + n <= tip + 1`.
fn sequence_lock_met(sequence: u32, coin_height: Option<u32>, tip: u32) -> bool {
    let flags = SEQUENCE_LOCKTIME_DISABLE_FLAG | SEQUENCE_LOCKTIME_TYPE_FLAG;
    if sequence & flags != 0 {
        return true;
    }
    let required = sequence & SEQUENCE_LOCKTIME_MASK;
    match coin_height {
        Some(h) => h + required <= tip + 1,
        None => required == 0,
    }
}

impl WalletService for MockNode {
    fn network(&self) -> Network {
        self.network
    }

    fn create_wallet(&self, name: &str, enable_private_keys: bool) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        if state.wallets.contains_key(name) {
            return Err(Error::Rejected(format!("Wallet \"{}\" already exists.", name)));
        }
        state.wallets.insert(
            name.to_string(),
            MockWallet {
                private_keys: enable_private_keys,
                ..MockWallet::default()
            },
        );
        Ok(())
    }

    fn import_descriptors(
        &self,
        wallet: &WalletHandle,
        requests: &[ImportRequest],
    ) -> Result<Vec<ImportResult>, Error> {
        let mut state = self.state.borrow_mut();
        if !state.scripted_imports.is_empty() {
            state.wallet(wallet)?;
            return Ok(std::mem::take(&mut state.scripted_imports));
        }
        let w = state.wallet_mut(wallet)?;
        Ok(requests
            .iter()
            .map(|req| match self.import_one(w, req) {
                Ok(()) => ImportResult::accepted(),
                Err((code, message)) => ImportResult::rejected(code, message),
            })
            .collect())
    }

    fn get_new_address(
        &self,
        wallet: &WalletHandle,
        address_type: AddressType,
    ) -> Result<Address, Error> {
        let mut state = self.state.borrow_mut();
        state.keypool_counter += 1;
        let counter = state.keypool_counter;
        let skew = state.faults.address_skew;
        let network = self.network;
        let w = state.wallet_mut(wallet)?;

        if let Some(&idx) = w.active.get(&address_type) {
            let tracked = &mut w.descriptors[idx];
            let index = tracked.next_index + skew;
            let addr = tracked
                .address_at(index, network)
                .map_err(Error::Rejected)?;
            tracked.next_index += 1;
            return Ok(addr);
        }

        if w.private_keys && address_type == AddressType::Bech32 {
            let script = ScriptBuf::from_bytes(counter.to_le_bytes().to_vec());
            let addr = Address::p2wsh(&script, network);
            w.keypool.push(addr.clone());
            return Ok(addr);
        }

        Err(Error::Rejected("Error: This wallet has no available keys".into()))
    }

    fn derive_addresses(
        &self,
        _wallet: &WalletHandle,
        descriptor: &str,
        index: u32,
    ) -> Result<Vec<Address>, Error> {
        let (parsed, _) = Descriptor::parse_descriptor(&self.secp, descriptor)
            .map_err(|e| Error::Rejected(describe_descriptor_error(descriptor, &e)))?;
        if !parsed.has_wildcard() {
            return Err(Error::Rejected(
                "Range should not be specified for an un-ranged descriptor".into(),
            ));
        }
        let shift = {
            let mut state = self.state.borrow_mut();
            state.derive_calls += 1;
            match state.faults.unstable_derivation_after {
                Some(n) if state.derive_calls > n => 1,
                _ => 0,
            }
        };
        (0..=index)
            .map(|i| derive_address(&parsed, i + shift, self.network).map_err(Error::Rejected))
            .collect()
    }

    fn send_to_address(
        &self,
        wallet: &WalletHandle,
        address: &Address,
        amount: Amount,
    ) -> Result<Txid, Error> {
        let mut state = self.state.borrow_mut();
        let tip = state.height;
        let w = state.wallet_mut(wallet)?;
        if !w.private_keys {
            return Err(Error::Rejected(
                "Error: Private keys are disabled for this wallet".into(),
            ));
        }
        let needed = amount + WALLET_FEE;
        if w.balance(tip) < needed {
            return Err(Error::Rejected("Insufficient funds".into()));
        }
        w.spent += needed;

        let txid = state.next_txid();
        if state.faults.drop_payments {
            return Ok(txid);
        }
        // vout 0 is the (untracked) change output
        state.coins.push(Coin {
            txid,
            vout: 1,
            address: address.clone(),
            amount,
            height: None,
        });
        state.mempool.push(txid);
        Ok(txid)
    }

    fn list_unspent(
        &self,
        wallet: &WalletHandle,
        min_confirmations: u32,
        addresses: &[Address],
    ) -> Result<Vec<Unspent>, Error> {
        let state = self.state.borrow();
        let w = state.wallet(wallet)?;
        Ok(state
            .coins
            .iter()
            .filter(|c| addresses.is_empty() || addresses.contains(&c.address))
            .filter(|c| w.owns(&c.address))
            .filter(|c| state.confirmations(c) >= min_confirmations)
            .map(|c| Unspent {
                txid: c.txid,
                vout: c.vout,
                address: c.address.clone(),
                amount: c.amount,
                confirmations: state.confirmations(c),
                solvable: !state.faults.unsolvable_outputs,
            })
            .collect())
    }

    fn get_raw_mempool(&self, wallet: &WalletHandle) -> Result<HashSet<Txid>, Error> {
        let state = self.state.borrow();
        state.wallet(wallet)?;
        Ok(state.mempool.iter().copied().collect())
    }

    fn generate_to_address(
        &self,
        wallet: &WalletHandle,
        blocks: u32,
        address: &Address,
    ) -> Result<Vec<BlockHash>, Error> {
        let mut state = self.state.borrow_mut();
        state.wallet(wallet)?;
        let owner = state.owner_of(address);

        let mut hashes = Vec::with_capacity(blocks as usize);
        for _ in 0..blocks {
            state.height += 1;
            let height = state.height;
            for coin in state.coins.iter_mut().filter(|c| c.height.is_none()) {
                coin.height = Some(height);
            }
            state.mempool.clear();
            if let Some(name) = &owner {
                if let Some(w) = state.wallets.get_mut(name) {
                    w.coinbase_heights.push(height);
                }
            }
            hashes.push(BlockHash::hash(&height.to_le_bytes()));
        }
        Ok(hashes)
    }

    fn get_block_count(&self, wallet: &WalletHandle) -> Result<u32, Error> {
        let state = self.state.borrow();
        state.wallet(wallet)?;
        Ok(state.height)
    }

    fn get_balance(&self, wallet: &WalletHandle) -> Result<Amount, Error> {
        let state = self.state.borrow();
        Ok(state.wallet(wallet)?.balance(state.height))
    }

    fn create_psbt(
        &self,
        wallet: &WalletHandle,
        inputs: &[PsbtInput],
        outputs: &[(Address, Amount)],
        lock_time: absolute::LockTime,
    ) -> Result<String, Error> {
        let mut state = self.state.borrow_mut();
        state.wallet(wallet)?;
        state.drafts.push(Draft {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            lock_time,
            stage: DraftStage::Drafted,
        });
        Ok(format!("{}{}", PSBT_PREFIX, state.drafts.len() - 1))
    }

    fn process_psbt(&self, wallet: &WalletHandle, psbt: &str) -> Result<ProcessedPsbt, Error> {
        let id = draft_index(psbt)?;
        let mut state = self.state.borrow_mut();
        let complete = {
            let w = state.wallet(wallet)?;
            let draft = state
                .drafts
                .get(id)
                .ok_or_else(|| Error::Rejected("TX decode failed".into()))?;
            !state.faults.incomplete_signing
                && !draft.inputs.is_empty()
                && draft.inputs.iter().all(|input| {
                    state
                        .coin_index(&input.txid, input.vout)
                        .map(|i| w.can_sign_for(&state.coins[i].address))
                        .unwrap_or(false)
                })
        };
        if complete {
            let draft = &mut state.drafts[id];
            if draft.stage == DraftStage::Drafted {
                draft.stage = DraftStage::Signed;
            }
        }
        Ok(ProcessedPsbt {
            psbt: psbt.to_string(),
            complete,
        })
    }

    fn finalize_psbt(&self, wallet: &WalletHandle, psbt: &str) -> Result<FinalizedPsbt, Error> {
        let id = draft_index(psbt)?;
        let mut state = self.state.borrow_mut();
        state.wallet(wallet)?;
        let incomplete = state.faults.incomplete_finalize;
        let draft = state
            .drafts
            .get_mut(id)
            .ok_or_else(|| Error::Rejected("TX decode failed".into()))?;
        if incomplete || draft.stage == DraftStage::Drafted {
            return Ok(FinalizedPsbt {
                psbt: Some(psbt.to_string()),
                hex: None,
                complete: false,
            });
        }
        draft.stage = DraftStage::Finalized;
        Ok(FinalizedPsbt {
            psbt: None,
            hex: Some(format!("{:016x}", id)),
            complete: true,
        })
    }

    fn send_raw_transaction(&self, wallet: &WalletHandle, hex: &str) -> Result<Txid, Error> {
        let id = usize::from_str_radix(hex, 16)
            .map_err(|_| Error::Rejected("TX decode failed".into()))?;
        let mut state = self.state.borrow_mut();
        state.wallet(wallet)?;
        let draft = state
            .drafts
            .get(id)
            .filter(|d| d.stage == DraftStage::Finalized)
            .cloned()
            .ok_or_else(|| Error::Rejected("TX decode failed".into()))?;
        if let Some(reason) = &state.faults.reject_broadcast {
            return Err(Error::Rejected(reason.clone()));
        }
        let tip = state.height;
        let check_locks = !state.faults.ignore_timelocks;

        let mut spent = Vec::with_capacity(draft.inputs.len());
        let mut input_value = Amount::ZERO;
        for input in &draft.inputs {
            let idx = state
                .coin_index(&input.txid, input.vout)
                .ok_or_else(|| Error::Rejected("bad-txns-inputs-missingorspent".into()))?;
            let coin = &state.coins[idx];
            let sequence = input.sequence.to_consensus_u32();
            if check_locks && !sequence_lock_met(sequence, coin.height, tip) {
                return Err(Error::Rejected("non-BIP68-final".into()));
            }
            input_value += coin.amount;
            spent.push(idx);
        }

        let output_value = draft
            .outputs
            .iter()
            .fold(Amount::ZERO, |acc, (_, amount)| acc + *amount);
        if output_value > input_value {
            return Err(Error::Rejected("bad-txns-in-belowout".into()));
        }

        let lock_time = draft.lock_time.to_consensus_u32();
        let all_final = draft
            .inputs
            .iter()
            .all(|i| i.sequence.to_consensus_u32() == SEQUENCE_FINAL);
        let height_locked = lock_time != 0 && lock_time < LOCK_TIME_THRESHOLD;
        if check_locks && height_locked && !all_final && lock_time > tip {
            return Err(Error::Rejected("non-final".into()));
        }

        spent.sort_unstable_by(|a, b| b.cmp(a));
        for idx in spent {
            state.coins.remove(idx);
        }
        let txid = state.next_txid();
        for (vout, (address, amount)) in draft.outputs.iter().enumerate() {
            state.coins.push(Coin {
                txid,
                vout: vout as u32,
                address: address.clone(),
                amount: *amount,
                height: None,
            });
        }
        state.mempool.push(txid);
        Ok(txid)
    }
}
