//! Failure taxonomy of the harness

use crate::catalog::CatalogError;
use bitcoin::{Amount, Txid};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while proving a policy
#[derive(Error, Debug)]
pub enum Error {
    #[error("Import rejected: {0}")]
    ImportRejected(String),

    #[error("Derivation mismatch at index {index}: wallet gave {wallet}, derivation gave {derived}")]
    DerivationMismatch {
        index: u32,
        wallet: String,
        derived: String,
    },

    #[error("Re-deriving index {index} gave {second}, first derivation gave {first}")]
    UnstableDerivation {
        index: u32,
        first: String,
        second: String,
    },

    #[error("Timed out after {waited:?} waiting for {condition}")]
    FundingTimeout { condition: String, waited: Duration },

    #[error("Unexpected funding output: {0}")]
    UnexpectedUtxo(String),

    #[error("{step} reported incomplete")]
    SigningIncomplete { step: &'static str },

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("Transaction {0} was accepted before its timelock matured")]
    PrematureBroadcastAccepted(Txid),

    #[error("Unsafe policy was accepted at import")]
    InsaneAccepted,

    #[error("Unexpected sanity diagnostic: {0}")]
    WrongDiagnostic(String),

    #[error("Funder balance {have} is below the required {need}")]
    InsufficientFunds { have: Amount, need: Amount },

    #[error("Policy '{0}' has no signable profile")]
    NotSignable(String),

    #[error("Descriptor error: {0}")]
    Descriptor(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Node error: {0}")]
    Node(#[from] msoracle_node::Error),
}

/// Step of a scenario at which a policy failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Import,
    Derivation,
    Funding,
    Construct,
    Sign,
    Finalize,
    PrematureBroadcast,
    Timelocks,
    Broadcast,
    Sanity,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Import => "import",
            Stage::Derivation => "derivation",
            Stage::Funding => "funding",
            Stage::Construct => "construct",
            Stage::Sign => "sign",
            Stage::Finalize => "finalize",
            Stage::PrematureBroadcast => "premature-broadcast",
            Stage::Timelocks => "timelocks",
            Stage::Broadcast => "broadcast",
            Stage::Sanity => "sanity",
        };
        f.write_str(name)
    }
}

/// A scenario failure, pinned to the policy and stage that produced it
#[derive(Error, Debug)]
#[error("policy '{policy}' failed at {stage}: {error}{}", expression_suffix(.expression))]
pub struct Failure {
    pub policy: String,
    /// Miniscript expression of the failing policy
    pub expression: Option<String>,
    pub stage: Stage,
    #[source]
    pub error: Error,
}

fn expression_suffix(expression: &Option<String>) -> String {
    match expression {
        Some(expr) => format!(" (expression: {})", expr),
        None => String::new(),
    }
}

impl Failure {
    pub fn new(policy: impl Into<String>, stage: Stage, error: impl Into<Error>) -> Self {
        Self {
            policy: policy.into(),
            expression: None,
            stage,
            error: error.into(),
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

/// Tag a scenario step's result with the policy and stage it belongs to
pub(crate) trait AtStage<T> {
    fn at_stage(self, policy: &str, stage: Stage) -> Result<T, Failure>;
}

impl<T, E: Into<Error>> AtStage<T> for Result<T, E> {
    fn at_stage(self, policy: &str, stage: Stage) -> Result<T, Failure> {
        self.map_err(|e| Failure::new(policy, stage, e))
    }
}
