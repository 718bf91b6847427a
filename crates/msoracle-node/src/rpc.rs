//! Bitcoin Core JSON-RPC implementation of [`WalletService`]
//!
//! Wallet-scoped calls go to `<url>/wallet/<name>`, node-scoped calls
//! (`createwallet`) to the bare URL. Responses are decoded into our own
//! types rather than the client's canned ones so the request vocabulary
//! stays exactly what the harness needs.

use crate::types::{
    AddressType, FinalizedPsbt, ImportRequest, ImportResult, ProcessedPsbt, PsbtInput,
    TimeOrigin, Unspent, WalletHandle,
};
use crate::{Error, WalletService};
use bitcoin::address::NetworkUnchecked;
use bitcoin::{absolute, Address, Amount, BlockHash, Network, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Bitcoin Core RPC client, one HTTP endpoint per wallet
pub struct RpcService {
    url: String,
    auth: Auth,
    network: Network,
    /// Clients keyed by endpoint URL, built on first use
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl RpcService {
    /// Create a new RPC service and check the node answers
    ///
    /// # Arguments
    /// * `url` - Node RPC URL (e.g., "http://127.0.0.1:18443")
    /// * `auth` - Cookie file or user/password credentials
    /// * `network` - Network the node runs on
    pub fn new(url: &str, auth: Auth, network: Network) -> Result<Self, Error> {
        if !url.starts_with("http://127.0.0.1")
            && !url.starts_with("http://localhost")
            && !url.starts_with("https://")
        {
            log::warn!("Connecting to a non-local node over plaintext HTTP: {}", url);
        }

        let service = Self::unchecked(url, auth, network);

        let height: u64 = service.call(None, "getblockcount", &[])?;
        log::info!("Connected to node at {} (height {})", service.url, height);
        Ok(service)
    }

    fn unchecked(url: &str, auth: Auth, network: Network) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            auth,
            network,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, wallet: Option<&WalletHandle>) -> Result<Arc<Client>, Error> {
        let url = match wallet {
            Some(w) => format!("{}/wallet/{}", self.url, w.name()),
            None => self.url.clone(),
        };
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&url) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(Client::new(&url, self.auth.clone())?);
        clients.insert(url, Arc::clone(&client));
        Ok(client)
    }

    fn call<T: DeserializeOwned>(
        &self,
        wallet: Option<&WalletHandle>,
        method: &'static str,
        args: &[Value],
    ) -> Result<T, Error> {
        log::debug!(
            "RPC {} -> {}",
            wallet.map(|w| w.name()).unwrap_or("<node>"),
            method
        );
        self.client(wallet)?
            .call(method, args)
            .map_err(classify_rpc_error)
    }

    fn checked(&self, address: Address<NetworkUnchecked>) -> Result<Address, Error> {
        address
            .require_network(self.network)
            .map_err(|e| Error::InvalidAddress(e.to_string()))
    }
}

/// Separate node-side refusals (RPC error objects) from transport failures
fn classify_rpc_error(e: bitcoincore_rpc::Error) -> Error {
    match e {
        bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::error::Error::Rpc(ref rpc)) => {
            Error::Rejected(format!("{} (code {})", rpc.message, rpc.code))
        }
        other => Error::Rpc(other),
    }
}

/// JSON shape of one `importdescriptors` request
fn import_request_json(req: &ImportRequest) -> Value {
    let mut obj = json!({
        "desc": req.descriptor,
        "active": req.active,
        "timestamp": match req.time_origin {
            TimeOrigin::Now => json!("now"),
            TimeOrigin::At(ts) => json!(ts),
        },
    });
    if let Some((start, end)) = req.range_bounds() {
        obj["range"] = json!([start, end]);
        obj["next_index"] = json!(req.start_index);
    }
    obj
}

#[derive(Deserialize)]
struct RawUnspent {
    txid: Txid,
    vout: u32,
    address: Address<NetworkUnchecked>,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    amount: Amount,
    confirmations: u32,
    solvable: bool,
}

impl WalletService for RpcService {
    fn network(&self) -> Network {
        self.network
    }

    fn create_wallet(&self, name: &str, enable_private_keys: bool) -> Result<(), Error> {
        // createwallet(name, disable_private_keys, blank, passphrase, avoid_reuse, descriptors)
        let _: Value = self.call(
            None,
            "createwallet",
            &[
                json!(name),
                json!(!enable_private_keys),
                json!(false),
                json!(""),
                json!(false),
                json!(true),
            ],
        )?;
        log::info!(
            "Created wallet '{}' (private keys {})",
            name,
            if enable_private_keys { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    fn import_descriptors(
        &self,
        wallet: &WalletHandle,
        requests: &[ImportRequest],
    ) -> Result<Vec<ImportResult>, Error> {
        let payload: Vec<Value> = requests.iter().map(import_request_json).collect();
        let results: Vec<ImportResult> =
            self.call(Some(wallet), "importdescriptors", &[Value::Array(payload)])?;
        if results.len() != requests.len() {
            return Err(Error::MalformedResponse {
                method: "importdescriptors",
                reason: format!("{} results for {} requests", results.len(), requests.len()),
            });
        }
        Ok(results)
    }

    fn get_new_address(
        &self,
        wallet: &WalletHandle,
        address_type: AddressType,
    ) -> Result<Address, Error> {
        let addr: Address<NetworkUnchecked> = self.call(
            Some(wallet),
            "getnewaddress",
            &[json!(""), json!(address_type.rpc_name())],
        )?;
        self.checked(addr)
    }

    fn derive_addresses(
        &self,
        wallet: &WalletHandle,
        descriptor: &str,
        index: u32,
    ) -> Result<Vec<Address>, Error> {
        let addrs: Vec<Address<NetworkUnchecked>> = self.call(
            Some(wallet),
            "deriveaddresses",
            &[json!(descriptor), json!(index)],
        )?;
        addrs.into_iter().map(|a| self.checked(a)).collect()
    }

    fn send_to_address(
        &self,
        wallet: &WalletHandle,
        address: &Address,
        amount: Amount,
    ) -> Result<Txid, Error> {
        self.call(
            Some(wallet),
            "sendtoaddress",
            &[json!(address.to_string()), json!(amount.to_btc())],
        )
    }

    fn list_unspent(
        &self,
        wallet: &WalletHandle,
        min_confirmations: u32,
        addresses: &[Address],
    ) -> Result<Vec<Unspent>, Error> {
        let filter: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        let raw: Vec<RawUnspent> = self.call(
            Some(wallet),
            "listunspent",
            &[json!(min_confirmations), json!(9_999_999), json!(filter)],
        )?;
        raw.into_iter()
            .map(|u| {
                Ok(Unspent {
                    txid: u.txid,
                    vout: u.vout,
                    address: self.checked(u.address)?,
                    amount: u.amount,
                    confirmations: u.confirmations,
                    solvable: u.solvable,
                })
            })
            .collect()
    }

    fn get_raw_mempool(&self, wallet: &WalletHandle) -> Result<HashSet<Txid>, Error> {
        let txids: Vec<Txid> = self.call(Some(wallet), "getrawmempool", &[])?;
        Ok(txids.into_iter().collect())
    }

    fn generate_to_address(
        &self,
        wallet: &WalletHandle,
        blocks: u32,
        address: &Address,
    ) -> Result<Vec<BlockHash>, Error> {
        self.call(
            Some(wallet),
            "generatetoaddress",
            &[json!(blocks), json!(address.to_string())],
        )
    }

    fn get_block_count(&self, wallet: &WalletHandle) -> Result<u32, Error> {
        let height: u64 = self.call(Some(wallet), "getblockcount", &[])?;
        u32::try_from(height).map_err(|_| Error::MalformedResponse {
            method: "getblockcount",
            reason: format!("height {} out of range", height),
        })
    }

    fn get_balance(&self, wallet: &WalletHandle) -> Result<Amount, Error> {
        let btc: f64 = self.call(Some(wallet), "getbalance", &[])?;
        Amount::from_btc(btc).map_err(|e| Error::MalformedResponse {
            method: "getbalance",
            reason: e.to_string(),
        })
    }

    fn create_psbt(
        &self,
        wallet: &WalletHandle,
        inputs: &[PsbtInput],
        outputs: &[(Address, Amount)],
        lock_time: absolute::LockTime,
    ) -> Result<String, Error> {
        let ins: Vec<Value> = inputs
            .iter()
            .map(|i| {
                json!({
                    "txid": i.txid.to_string(),
                    "vout": i.vout,
                    "sequence": i.sequence.to_consensus_u32(),
                })
            })
            .collect();
        let outs: Vec<Value> = outputs
            .iter()
            .map(|(addr, amount)| {
                let mut out = serde_json::Map::new();
                out.insert(addr.to_string(), json!(amount.to_btc()));
                Value::Object(out)
            })
            .collect();
        self.call(
            Some(wallet),
            "createpsbt",
            &[
                Value::Array(ins),
                Value::Array(outs),
                json!(lock_time.to_consensus_u32()),
            ],
        )
    }

    fn process_psbt(&self, wallet: &WalletHandle, psbt: &str) -> Result<ProcessedPsbt, Error> {
        self.call(Some(wallet), "walletprocesspsbt", &[json!(psbt)])
    }

    fn finalize_psbt(&self, wallet: &WalletHandle, psbt: &str) -> Result<FinalizedPsbt, Error> {
        self.call(Some(wallet), "finalizepsbt", &[json!(psbt)])
    }

    fn send_raw_transaction(&self, wallet: &WalletHandle, hex: &str) -> Result<Txid, Error> {
        self.call(Some(wallet), "sendrawtransaction", &[json!(hex)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_import_json() {
        let req = ImportRequest::active("wsh(pk(K))#abcdefgh", 3);
        let v = import_request_json(&req);
        assert_eq!(v["desc"], "wsh(pk(K))#abcdefgh");
        assert_eq!(v["active"], true);
        assert_eq!(v["range"], json!([0, 2]));
        assert_eq!(v["next_index"], 0);
        assert_eq!(v["timestamp"], "now");
    }

    #[test]
    fn test_inactive_import_json_has_no_range() {
        let mut req = ImportRequest::inactive("wsh(pk(K))#abcdefgh");
        req.time_origin = TimeOrigin::At(1_700_000_000);
        let v = import_request_json(&req);
        assert_eq!(v["active"], false);
        assert!(v.get("range").is_none());
        assert!(v.get("next_index").is_none());
        assert_eq!(v["timestamp"], 1_700_000_000u64);
    }

    #[test]
    fn test_raw_unspent_decodes_btc_amount() {
        let json = r#"{
            "txid": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            "vout": 1,
            "address": "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080",
            "amount": 0.01,
            "confirmations": 0,
            "spendable": false,
            "solvable": true
        }"#;
        let raw: RawUnspent = serde_json::from_str(json).unwrap();
        assert_eq!(raw.vout, 1);
        assert_eq!(raw.amount, Amount::from_sat(1_000_000));
        assert!(raw.solvable);
        assert!(raw.address.require_network(Network::Regtest).is_ok());
    }

    #[test]
    fn test_client_reused_per_endpoint() {
        let service = RpcService::unchecked(
            "http://127.0.0.1:18443/",
            Auth::UserPass("user".into(), "pass".into()),
            Network::Regtest,
        );
        let signer = WalletHandle::new(crate::Role::Signer, "ms_sig");
        let watch_only = WalletHandle::new(crate::Role::WatchOnly, "ms_wo");

        let first = service.client(Some(&signer)).unwrap();
        let again = service.client(Some(&signer)).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let other = service.client(Some(&watch_only)).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        service.client(None).unwrap();

        let cached = service.clients.lock().unwrap();
        assert_eq!(cached.len(), 3);
        assert!(cached.contains_key("http://127.0.0.1:18443/wallet/ms_sig"));
        assert!(cached.contains_key("http://127.0.0.1:18443"));
    }

    // Integration tests require a running regtest node
    // Run with: cargo test --package msoracle-node -- --ignored

    #[test]
    #[ignore = "requires a regtest node on 127.0.0.1:18443"]
    fn test_connect_local_regtest() {
        let cookie = std::env::var("MSORACLE_COOKIE_FILE").expect("MSORACLE_COOKIE_FILE");
        let service = RpcService::new(
            "http://127.0.0.1:18443",
            Auth::CookieFile(cookie.into()),
            Network::Regtest,
        );
        assert!(service.is_ok());
    }
}
