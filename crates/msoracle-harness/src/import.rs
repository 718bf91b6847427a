//! Descriptor import shared by the scenarios

use crate::descriptor::WalletDescriptor;
use crate::error::Error;
use msoracle_node::{ImportRequest, ImportResult, WalletHandle, WalletService};

/// Import `descriptor` as active over `range_size` indices; any refusal is an error
pub(crate) fn import_active<S: WalletService>(
    service: &S,
    wallet: &WalletHandle,
    descriptor: &WalletDescriptor,
    range_size: u32,
) -> Result<(), Error> {
    let request = ImportRequest::active(descriptor.to_string(), range_size);
    let result = single_result(service.import_descriptors(wallet, &[request])?)?;
    if !result.success {
        return Err(Error::ImportRejected(result.message().to_string()));
    }
    for warning in &result.warnings {
        log::warn!("Import into {} warned: {}", wallet, warning);
    }
    Ok(())
}

/// The one result of a single-request import
pub(crate) fn single_result(results: Vec<ImportResult>) -> Result<ImportResult, Error> {
    results.into_iter().next().ok_or_else(|| {
        Error::Node(msoracle_node::Error::MalformedResponse {
            method: "importdescriptors",
            reason: "no result for the request".into(),
        })
    })
}
