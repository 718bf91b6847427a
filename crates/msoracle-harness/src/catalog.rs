//! Policy catalog
//!
//! Every policy under test is a [`PolicyCase`] tagged with the capability
//! [`Profile`] that decides which scenario proves it. Adding a policy shape
//! is a data change: either an entry in [`Catalog::builtin`] or a `[[case]]`
//! in a TOML catalog file:
//!
//! ```toml
//! [[case]]
//! label = "relative-timelock"
//! expression = "and_v(v:older(2),pk(tprv.../*))"
//! profile = "signable"
//! sequence = 2
//! enforced = true
//! ```

use crate::constraint::SpendConstraint;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Policy that admits a witness without any signature
pub const INSANE_POLICY: &str = "and_b(ripemd160(1fd9b55a054a2b3f658d97e6b84cf3ee00be429a),a:1)";

/// Diagnostic substring the wallet must report when refusing [`INSANE_POLICY`]
pub const SANITY_DIAGNOSTIC: &str = "is not sane: witnesses without signature exist";

/// Heights at or above this are UNIX timestamps in nLockTime
const LOCK_TIME_THRESHOLD: u32 = 500_000_000;

/// Catalog loading errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Case #{0} has an empty label")]
    EmptyLabel(usize),

    #[error("Case '{0}' has an empty expression")]
    EmptyExpression(String),

    #[error("Duplicate case label: {0}")]
    DuplicateLabel(String),

    #[error("Case '{0}' sets a timelock but is not signable")]
    TimelockOnUnsignable(String),

    #[error("Case '{label}' locktime {locktime} is not a block height")]
    LocktimeNotHeight { label: String, locktime: u32 },

    #[error("Case '{0}' has a zero relative timelock")]
    ZeroSequence(String),
}

/// What a policy lets the harness prove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Keys are public only: derivation and funding detection
    Trackable,
    /// Satisfiable only with a hash preimage the harness never supplies
    Preimage,
    /// A single wallet holding the private keys can spend it
    Signable {
        constraint: SpendConstraint,
        /// Every signer-satisfiable branch carries `constraint`, so a spend
        /// before it matures must be refused
        enforced: bool,
    },
}

impl Profile {
    pub fn is_signable(&self) -> bool {
        matches!(self, Profile::Signable { .. })
    }
}

/// One policy under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCase {
    /// Short unique name used in logs and failures
    pub label: String,
    /// Miniscript expression, without script context or checksum
    pub expression: String,
    pub profile: Profile,
}

impl PolicyCase {
    pub fn trackable(label: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            expression: expression.into(),
            profile: Profile::Trackable,
        }
    }

    pub fn preimage(label: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            expression: expression.into(),
            profile: Profile::Preimage,
        }
    }

    pub fn signable(
        label: impl Into<String>,
        expression: impl Into<String>,
        constraint: SpendConstraint,
        enforced: bool,
    ) -> Self {
        Self {
            label: label.into(),
            expression: expression.into(),
            profile: Profile::Signable {
                constraint,
                enforced,
            },
        }
    }
}

/// Ordered list of policy cases with unique labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    cases: Vec<PolicyCase>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in corpus: four watch-only shapes and five signable ones
    pub fn builtin() -> Self {
        let cases = vec![
            PolicyCase::trackable(
                "one-of-two-keys",
                "or_b(pk(tpubD6NzVbkrYhZ4XRMcMFMMFvzVt6jaDAtjZhD7JLwdPdMm9xa76DnxYYP7w9TZGJDVFkek3ArwVsuacheqqPog8TH5iBCX1wuig8PLXim4n9a/*),s:pk(tpubD6NzVbkrYhZ4WsqRzDmkL82SWcu42JzUvKWzrJHQ8EC2vEHRHkXj1De93sD3biLrKd8XGnamXURGjMbYavbszVDXpjXV2cGUERucLJkE6cy/*))",
            ),
            // Same spending policy as BOLT3's offered HTLC with anchor outputs
            PolicyCase::preimage(
                "bolt3-offered-htlc",
                "or_d(pk(tpubD6NzVbkrYhZ4XRMcMFMMFvzVt6jaDAtjZhD7JLwdPdMm9xa76DnxYYP7w9TZGJDVFkek3ArwVsuacheqqPog8TH5iBCX1wuig8PLXim4n9a/*),and_v(and_v(v:pk(tpubD6NzVbkrYhZ4WsqRzDmkL82SWcu42JzUvKWzrJHQ8EC2vEHRHkXj1De93sD3biLrKd8XGnamXURGjMbYavbszVDXpjXV2cGUERucLJkE6cy/*),or_c(pk(tpubD6NzVbkrYhZ4YNwtTWrKRJQzQX3PjPKeUQg1gYh1hiLMkk1cw8SRLgB1yb7JzE8bHKNt6EcZXkJ6AqpCZL1aaRSjnG36mLgbQvJZBNsjWnG/*),v:hash160(7f999c905d5e35cefd0a37673f746eb13fba3640))),older(1)))",
            ),
            // Revault unvault policy, with after() in place of older()
            PolicyCase::trackable(
                "revault-unvault-after",
                "andor(multi(2,tpubD6NzVbkrYhZ4YMQC15JS7QcrsAyfGrGiykweqMmPxTkEVScu7vCZLNpPXW1XphHwzsgmqdHWDQAfucbM72EEB1ZEyfgZxYvkZjYVXx1xS9p/*,tpubD6NzVbkrYhZ4WkCyc7E3z6g6NkypHMiecnwc4DpWHTPqFdteRGkEKukdrSSyJGNnGrHNMfy4BCw2UXo5soYRCtCDDfy4q8pc8oyB7RgTFv8/*),and_v(v:multi(4,030f64b922aee2fd597f104bc6cb3b670f1ca2c6c49b1071a1a6c010575d94fe5a,02abe475b199ec3d62fa576faee16a334fdb86ffb26dce75becebaaedf328ac3fe,0314f3dc33595b0d016bb522f6fe3a67680723d842c1b9b8ae6b59fdd8ab5cccb4,025eba3305bd3c829e4e1551aac7358e4178832c739e4fc4729effe428de0398ab),after(424242)),thresh(4,pkh(tpubD6NzVbkrYhZ4YVrNggiT2ptVHwnFbLBqDkCtV5HkxR4WtcRLAQReKTkqZGNcV6GE7cQsmpBzzSzhk16DUwB1gn1L7ZPnJF2dnNePP1uMBCY/*),a:pkh(tpubD6NzVbkrYhZ4YU9vM1s53UhD75UyJatx8EMzMZ3VUjR2FciNfLLkAw6a4pWACChzobTseNqdWk4G7ZdBqRDLtLSACKykTScmqibb1ZrCvJu/*),a:pkh(tpubD6NzVbkrYhZ4YUHcFfuH9iEBLiH8CBRJTpS7X3qjHmh82m1KCNbzs6w9gyK8oWHSZmKHWcakAXCGfbKg6xoCvKzQCWAHyxaC7QcWfmzyBf4/*),a:pkh(tpubD6NzVbkrYhZ4XXEmQtS3sgxpJbMyMg4McqRR1Af6ULzyrTRnhwjyr1etPD7svap9oFtJf4MM72brUb5o7uvF2Jyszc5c1t836fJW7SX2e8D/*)))",
            ),
            // Liquid-like federated peg-in with emergency recovery keys
            PolicyCase::trackable(
                "liquid-federation-recovery",
                "or_i(and_b(pk(029ffbe722b147f3035c87cb1c60b9a5947dd49c774cc31e94773478711a929ac0),a:and_b(pk(025f05815e3a1a8a83bfbb03ce016c9a2ee31066b98f567f6227df1d76ec4bd143),a:and_b(pk(025625f41e4a065efc06d5019cbbd56fe8c07595af1231e7cbc03fafb87ebb71ec),a:and_b(pk(02a27c8b850a00f67da3499b60562673dcf5fdfb82b7e17652a7ac54416812aefd),s:pk(03e618ec5f384d6e19ca9ebdb8e2119e5bef978285076828ce054e55c4daf473e2))))),and_v(v:thresh(2,pkh(tpubD6NzVbkrYhZ4YK67cd5fDe4fBVmGB2waTDrAt1q4ey9HPq9veHjWkw3VpbaCHCcWozjkhgAkWpFrxuPMUrmXVrLHMfEJ9auoZA6AS1g3grC/*),a:pkh(033841045a531e1adf9910a6ec279589a90b3b8a904ee64ffd692bd08a8996c1aa),a:pkh(02aebf2d10b040eb936a6f02f44ee82f8b34f5c1ccb20ff3949c2b28206b7c1068)),older(4209713)))",
            ),
            PolicyCase::signable(
                "one-of-two-one-private",
                "or_i(pk(tprv8ZgxMBicQKsPerQj6m35no46amfKQdjY7AhLnmatHYXs8S4MTgeZYkWAn4edSGwwL3vkSiiGqSZQrmy5D3P5gBoqgvYP2fCUpBwbKTMTAkL/*),pk(tpubD6NzVbkrYhZ4YPAbyf6urxqqnmJF79PzQtyERAmvkSVS9fweCTjxjDh22Z5St9fGb1a5DUCv8G27nYupKP1Ctr1pkamJossoetzws1moNRn/*))",
                SpendConstraint::NONE,
                true,
            ),
            // The first branch needs a preimage, so it is spent through the
            // last one. Its keys need no timelock: not enforced.
            PolicyCase::signable(
                "andor-unused-preimage-branch",
                "andor(ndv:older(2),and_v(v:pk(tprv8ZgxMBicQKsPdZFz4VVtpR8NZrjL4LpuLcfVB8oK9evqe6gkYB8GMZ2nf9SQGhVDZpWCpQpEmPckToyTja8R4xSoMMvwYRG4T4uvwhbrNWh),sha256(2a8ce30189b2ec3200b47aeb4feaac8fcad7c0ba170389729f4898b0b7933bcb)),and_v(v:pkh(tprv8ZgxMBicQKsPd3cbrKjE5GKKJLDEidhtzSSmPVtSPyoHQGL2LZw49yt9foZsN9BeiC5VqRaESUSDV2PS9w7zAVBSK6EQH3CZW9sMKxSKDwD),pk(tprv8ZgxMBicQKsPd7T1sTsZdJo7EJm5bD8SKQUHWqivT8r5GCH13wzS1QspAgSnCeoy7fdSUQs7nxZdTVchxQuHxWWNHL4D4pdD67oq6khhX49/*)))",
                SpendConstraint::relative(2),
                false,
            ),
            PolicyCase::signable(
                "relative-timelock",
                "and_v(v:older(2),pk(tprv8ZgxMBicQKsPdZFz4VVtpR8NZrjL4LpuLcfVB8oK9evqe6gkYB8GMZ2nf9SQGhVDZpWCpQpEmPckToyTja8R4xSoMMvwYRG4T4uvwhbrNWh/*))",
                SpendConstraint::relative(2),
                true,
            ),
            PolicyCase::signable(
                "absolute-timelock",
                "and_v(v:after(20),pk(tprv8ZgxMBicQKsPdZFz4VVtpR8NZrjL4LpuLcfVB8oK9evqe6gkYB8GMZ2nf9SQGhVDZpWCpQpEmPckToyTja8R4xSoMMvwYRG4T4uvwhbrNWh/*))",
                SpendConstraint::absolute(20),
                true,
            ),
            PolicyCase::signable(
                "relative-and-absolute-timelock",
                "and_v(v:older(4),and_v(v:after(30),pk(tprv8ZgxMBicQKsPdZFz4VVtpR8NZrjL4LpuLcfVB8oK9evqe6gkYB8GMZ2nf9SQGhVDZpWCpQpEmPckToyTja8R4xSoMMvwYRG4T4uvwhbrNWh/*)))",
                SpendConstraint::both(4, 30),
                true,
            ),
        ];
        Self { cases }
    }

    /// Load and validate a TOML catalog file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML catalog content
    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        let mut catalog = Self::empty();
        for (idx, raw) in file.case.into_iter().enumerate() {
            catalog.push(raw.into_case(idx)?)?;
        }
        Ok(catalog)
    }

    /// Append a case, refusing duplicate labels
    pub fn push(&mut self, case: PolicyCase) -> Result<(), CatalogError> {
        if self.cases.iter().any(|c| c.label == case.label) {
            return Err(CatalogError::DuplicateLabel(case.label));
        }
        self.cases.push(case);
        Ok(())
    }

    /// Append every case of `other`, in order
    pub fn extend(&mut self, other: Catalog) -> Result<(), CatalogError> {
        other.cases.into_iter().try_for_each(|c| self.push(c))
    }

    pub fn cases(&self) -> &[PolicyCase] {
        &self.cases
    }

    /// Cases proven by the watch-only scenario, in catalog order
    pub fn watch_only(&self) -> impl Iterator<Item = &PolicyCase> {
        self.cases.iter().filter(|c| !c.profile.is_signable())
    }

    /// Cases proven by the signing scenario, in catalog order
    pub fn signable(&self) -> impl Iterator<Item = &PolicyCase> {
        self.cases.iter().filter(|c| c.profile.is_signable())
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    case: Vec<RawCase>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ProfileKind {
    Trackable,
    Preimage,
    Signable,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCase {
    label: String,
    expression: String,
    profile: ProfileKind,
    sequence: Option<u16>,
    locktime: Option<u32>,
    #[serde(default = "default_enforced")]
    enforced: bool,
}

fn default_enforced() -> bool {
    true
}

impl RawCase {
    fn into_case(self, idx: usize) -> Result<PolicyCase, CatalogError> {
        let label = self.label.trim().to_string();
        if label.is_empty() {
            return Err(CatalogError::EmptyLabel(idx));
        }
        if self.expression.trim().is_empty() {
            return Err(CatalogError::EmptyExpression(label));
        }
        let has_timelock = self.sequence.is_some() || self.locktime.is_some();

        let profile = match self.profile {
            ProfileKind::Trackable | ProfileKind::Preimage if has_timelock => {
                return Err(CatalogError::TimelockOnUnsignable(label));
            }
            ProfileKind::Trackable => Profile::Trackable,
            ProfileKind::Preimage => Profile::Preimage,
            ProfileKind::Signable => {
                if self.sequence == Some(0) {
                    return Err(CatalogError::ZeroSequence(label));
                }
                if let Some(locktime) = self.locktime {
                    if locktime >= LOCK_TIME_THRESHOLD {
                        return Err(CatalogError::LocktimeNotHeight { label, locktime });
                    }
                }
                Profile::Signable {
                    constraint: SpendConstraint {
                        relative: self.sequence,
                        absolute: self.locktime,
                    },
                    enforced: self.enforced,
                }
            }
        };

        Ok(PolicyCase {
            label,
            expression: self.expression.trim().to_string(),
            profile,
        })
    }
}
