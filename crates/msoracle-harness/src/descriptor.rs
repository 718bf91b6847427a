//! Checksummed descriptors built from raw Miniscript policies

use crate::error::Error;
use miniscript::descriptor::checksum::desc_checksum;
use msoracle_node::AddressType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Script context a policy is wrapped in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScriptContext {
    /// `wsh(...)`: native segwit v0
    #[default]
    #[serde(rename = "wsh")]
    SegwitV0,
    /// `sh(wsh(...))`: segwit v0 nested in P2SH
    #[serde(rename = "sh-wsh")]
    NestedSegwitV0,
}

impl ScriptContext {
    /// Wrap a policy expression in this context's combinator
    pub fn wrap(&self, expression: &str) -> String {
        match self {
            ScriptContext::SegwitV0 => format!("wsh({})", expression),
            ScriptContext::NestedSegwitV0 => format!("sh(wsh({}))", expression),
        }
    }

    /// Address type a wallet hands out for descriptors in this context
    pub fn address_type(&self) -> AddressType {
        match self {
            ScriptContext::SegwitV0 => AddressType::Bech32,
            ScriptContext::NestedSegwitV0 => AddressType::P2shSegwit,
        }
    }
}

impl fmt::Display for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptContext::SegwitV0 => write!(f, "wsh"),
            ScriptContext::NestedSegwitV0 => write!(f, "sh-wsh"),
        }
    }
}

/// A wrapped policy plus its BIP-380 checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletDescriptor {
    body: String,
    checksum: String,
}

impl WalletDescriptor {
    /// Wrap `expression` for `context` and append its checksum.
    ///
    /// Only the character set is checked here; whether the policy parses
    /// and is sane is left to the wallet at import.
    pub fn build(expression: &str, context: ScriptContext) -> Result<Self, Error> {
        let body = context.wrap(expression);
        let checksum = desc_checksum(&body).map_err(|e| Error::Descriptor(e.to_string()))?;
        Ok(Self { body, checksum })
    }

    /// Descriptor without the checksum
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

impl fmt::Display for WalletDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.body, self.checksum)
    }
}
