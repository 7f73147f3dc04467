//! Reconciling a device-signed PSBT with the one that was sent to the device.
//!
//! Devices may drop key-paths, witness data or unknown fields from their
//! response. Only partial signatures are taken from the signed copy; everything
//! else comes from the original.

use crate::error::{Error, Result};
use crate::psbt::Psbt;

/// Returns `original` with every partial signature from `signed` applied.
pub fn merge(original: &Psbt, signed: &Psbt) -> Result<Psbt> {
    let mut merged = original.clone();
    merge_into(&mut merged, signed)?;
    Ok(merged)
}

/// Applies the partial signatures of `signed` to `original` in place.
///
/// The structures are compared before anything is written, so on error
/// `original` is untouched.
pub fn merge_into(original: &mut Psbt, signed: &Psbt) -> Result<()> {
    check_compatible(original, signed)?;

    let mut applied = 0usize;
    for (index, signed_input) in signed.inputs().iter().enumerate() {
        let target = original.input_mut(index).ok_or_else(|| {
            Error::StructuralMismatch(format!("input {} missing from original", index))
        })?;
        for (pubkey, signature) in signed_input.partial_sigs() {
            target.set_partial_sig(pubkey, signature.to_vec())?;
            applied += 1;
        }
    }

    log::debug!(
        "merged {} partial signatures into {} inputs of {}",
        applied,
        signed.inputs().len(),
        original.txid()
    );
    Ok(())
}

fn check_compatible(original: &Psbt, signed: &Psbt) -> Result<()> {
    if original.inputs().len() != signed.inputs().len() {
        return Err(Error::StructuralMismatch(format!(
            "original has {} inputs, signed has {}",
            original.inputs().len(),
            signed.inputs().len()
        )));
    }
    if original.outputs().len() != signed.outputs().len() {
        return Err(Error::StructuralMismatch(format!(
            "original has {} outputs, signed has {}",
            original.outputs().len(),
            signed.outputs().len()
        )));
    }
    if original.txid() != signed.txid() {
        return Err(Error::StructuralMismatch(format!(
            "signed transaction {} does not match original {}",
            signed.txid(),
            original.txid()
        )));
    }
    Ok(())
}
