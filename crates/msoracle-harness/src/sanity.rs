//! Sanity gate: an unsafe policy must be refused at import

use crate::catalog::{INSANE_POLICY, SANITY_DIAGNOSTIC};
use crate::descriptor::{ScriptContext, WalletDescriptor};
use crate::error::{AtStage, Error, Failure, Stage};
use crate::import::single_result;
use msoracle_node::{ImportRequest, WalletHandle, WalletService};

/// Label used for the gate in failures and reports
pub const SANITY_LABEL: &str = "insane-sigless-branch";

/// Import [`INSANE_POLICY`] as inactive and require the sigless-witness diagnostic
pub fn check<S: WalletService>(
    service: &S,
    wallet: &WalletHandle,
    context: ScriptContext,
) -> Result<(), Failure> {
    log::info!("Checking an insane Miniscript descriptor is refused");
    gate(service, wallet, context)
        .at_stage(SANITY_LABEL, Stage::Sanity)
        .map_err(|f| f.with_expression(INSANE_POLICY))
}

fn gate<S: WalletService>(
    service: &S,
    wallet: &WalletHandle,
    context: ScriptContext,
) -> Result<(), Error> {
    let descriptor = WalletDescriptor::build(INSANE_POLICY, context)?;
    let request = ImportRequest::inactive(descriptor.to_string());
    let result = single_result(service.import_descriptors(wallet, &[request])?)?;

    if result.success {
        return Err(Error::InsaneAccepted);
    }
    if !result.message().contains(SANITY_DIAGNOSTIC) {
        return Err(Error::WrongDiagnostic(result.message().to_string()));
    }
    log::debug!("Refused as expected: {}", result.message());
    Ok(())
}
