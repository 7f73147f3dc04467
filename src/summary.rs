//! PSBT metadata for approval screens: amounts, addresses, fee and the
//! fingerprints of the devices that need to sign.

use serde::{Deserialize, Serialize};

use crate::address::{self, AddressResult, Network};
use crate::psbt::Psbt;

/// Amount and address of one input or output. Both are absent for an input
/// without a witness UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountEntry {
    pub amount: Option<u64>,
    pub address: Option<AddressResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSummary {
    pub inputs: Vec<AmountEntry>,
    pub outputs: Vec<AmountEntry>,
    /// Inputs minus outputs, in satoshis. `None` unless every input amount is known.
    pub fee: Option<i64>,
    /// True when every input carried its amount.
    pub complete: bool,
    /// Lowercase hex fingerprints in first-seen order, without duplicates.
    pub fingerprints: Vec<String>,
}

impl MetadataSummary {
    pub fn unknown_inputs(&self) -> usize {
        self.inputs.iter().filter(|i| i.amount.is_none()).count()
    }
}

pub fn summarize(psbt: &Psbt, network: Network) -> MetadataSummary {
    // wide accumulator: amounts are attacker-controlled u64s
    let mut balance: i128 = 0;
    let mut complete = true;

    let inputs = psbt
        .inputs()
        .iter()
        .map(|input| match input.witness_utxo() {
            Some(utxo) => {
                balance += i128::from(utxo.value);
                AmountEntry {
                    amount: Some(utxo.value),
                    address: Some(address::derive(&utxo.script_pubkey, network)),
                }
            }
            None => {
                complete = false;
                AmountEntry {
                    amount: None,
                    address: None,
                }
            }
        })
        .collect();

    let outputs = psbt
        .outputs()
        .iter()
        .map(|output| {
            balance -= i128::from(output.amount());
            AmountEntry {
                amount: Some(output.amount()),
                address: Some(address::derive(output.script_pubkey(), network)),
            }
        })
        .collect();

    let fee = if complete {
        i64::try_from(balance).ok()
    } else {
        None
    };

    let mut fingerprints: Vec<String> = Vec::new();
    for input in psbt.inputs() {
        for (_, source) in input.key_paths() {
            let fingerprint = source.fingerprint_hex();
            if !fingerprints.contains(&fingerprint) {
                fingerprints.push(fingerprint);
            }
        }
    }

    MetadataSummary {
        inputs,
        outputs,
        fee,
        complete,
        fingerprints,
    }
}
