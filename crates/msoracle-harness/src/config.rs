//! Harness tunables

use crate::descriptor::ScriptContext;
use crate::poll::PollPolicy;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Amounts, ranges and timing used by every scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Sent by the funder to each policy address
    #[serde(default = "default_fund_amount", with = "bitcoin::amount::serde::as_btc")]
    pub fund_amount: Amount,

    /// Paid out by each spend; the gap to `fund_amount` is the fee
    #[serde(default = "default_spend_amount", with = "bitcoin::amount::serde::as_btc")]
    pub spend_amount: Amount,

    /// Indices imported up front for watch-only descriptors (0..range)
    #[serde(default = "default_watch_only_range")]
    pub watch_only_range: u32,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Attempt each enforced spend before its timelock and require refusal
    #[serde(default = "default_true")]
    pub check_premature_broadcast: bool,

    #[serde(default)]
    pub script_context: ScriptContext,

    /// Bootstrap mines when the funder holds less than this
    #[serde(default = "default_min_funder_balance", with = "bitcoin::amount::serde::as_btc")]
    pub min_funder_balance: Amount,

    /// Blocks mined at bootstrap (101 matures one coinbase)
    #[serde(default = "default_bootstrap_blocks")]
    pub bootstrap_blocks: u32,
}

fn default_fund_amount() -> Amount {
    Amount::from_sat(1_000_000)
}

fn default_spend_amount() -> Amount {
    Amount::from_sat(900_000)
}

fn default_watch_only_range() -> u32 {
    3
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_min_funder_balance() -> Amount {
    Amount::from_sat(100_000_000)
}

fn default_bootstrap_blocks() -> u32 {
    101
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fund_amount: default_fund_amount(),
            spend_amount: default_spend_amount(),
            watch_only_range: default_watch_only_range(),
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            check_premature_broadcast: true,
            script_context: ScriptContext::default(),
            min_funder_balance: default_min_funder_balance(),
            bootstrap_blocks: default_bootstrap_blocks(),
        }
    }
}

impl HarnessConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            timeout: Duration::from_secs(self.poll_timeout_secs),
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}
