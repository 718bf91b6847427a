//! msoracle Miniscript harness
//!
//! A test oracle proving, for a catalog of Miniscript policies, that
//! *descriptor → address → UTXO → satisfying witness* round-trips through an
//! external wallet/node service:
//! - [`watch_only`]: a public-only wallet derives the same addresses as
//!   deterministic derivation and detects funds sent to them
//! - [`signing`]: a key-holding wallet signs, finalizes and broadcasts a spend
//!   carrying exactly the timelock fields the policy requires
//! - [`sanity`]: an unsafe policy is refused at import with a specific diagnostic
//!
//! [`Session`] sequences the three over a [`Catalog`], halting at the first
//! failure.
//!
//! # Example
//!
//! ```ignore
//! use msoracle_harness::{Catalog, HarnessConfig, Roles, Session};
//!
//! let roles = Roles::new("default", "ms_wo", "ms_sig");
//! let session = Session::bootstrap(&node, roles, HarnessConfig::default())?;
//! let report = session.run(&Catalog::builtin())?;
//! println!("{}", report);
//! ```

pub mod catalog;
pub mod config;
pub mod constraint;
pub mod descriptor;
pub mod error;
mod import;
pub mod poll;
pub mod sanity;
pub mod session;
pub mod signing;
pub mod watch_only;

#[cfg(test)]
pub(crate) mod test_utils;

pub use catalog::{Catalog, CatalogError, PolicyCase, Profile};
pub use config::HarnessConfig;
pub use constraint::SpendConstraint;
pub use descriptor::{ScriptContext, WalletDescriptor};
pub use error::{Error, Failure, Stage};
pub use poll::PollPolicy;
pub use session::{ProvenCase, Roles, Session, SessionReport};
