//! Partially signed transaction codec
//!
//! Decodes and encodes BIP-174 (version 0) PSBTs. Decoding is strict: any
//! deviation from the key/value grammar is a `MalformedInput` error. Fields are
//! kept in the order they were read so that encoding reproduces the source bytes,
//! including fields this crate does not interpret.

pub mod field;

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bitcoin::consensus::encode;
use bitcoin::{Transaction, TxOut, Txid};

use crate::error::{Error, Result};
use field::{Pair, Reader, SEPARATOR};

pub const PSBT_MAGIC: &[u8; 5] = b"psbt\xff";

pub const PSBT_GLOBAL_UNSIGNED_TX: u8 = 0x00;
pub const PSBT_GLOBAL_VERSION: u8 = 0xfb;

pub const PSBT_IN_WITNESS_UTXO: u8 = 0x01;
pub const PSBT_IN_PARTIAL_SIG: u8 = 0x02;
pub const PSBT_IN_BIP32_DERIVATION: u8 = 0x06;

const BASE64_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Originating fingerprint and derivation path of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySource {
    pub fingerprint: [u8; 4],
    pub path: Vec<u32>,
}

impl KeySource {
    pub fn new(fingerprint: [u8; 4], path: Vec<u32>) -> Self {
        Self { fingerprint, path }
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 || bytes.len() % 4 != 0 {
            return Err(Error::malformed(format!(
                "key-path record has invalid length {}",
                bytes.len()
            )));
        }
        let mut fingerprint = [0u8; 4];
        fingerprint.copy_from_slice(&bytes[..4]);
        let path = bytes[4..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { fingerprint, path })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 * self.path.len());
        out.extend_from_slice(&self.fingerprint);
        for step in &self.path {
            out.extend_from_slice(&step.to_le_bytes());
        }
        out
    }

    /// Lowercase hex of the fingerprint.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint_hex())?;
        for step in &self.path {
            if step & 0x8000_0000 != 0 {
                write!(f, "/{}h", step & 0x7fff_ffff)?;
            } else {
                write!(f, "/{}", step)?;
            }
        }
        Ok(())
    }
}

fn check_pubkey(key: &[u8], what: &str) -> Result<()> {
    match (key.len(), key.first()) {
        (33, Some(0x02)) | (33, Some(0x03)) | (65, Some(0x04)) => Ok(()),
        _ => Err(Error::malformed(format!(
            "{} key {} is not a public key",
            what,
            hex::encode(key)
        ))),
    }
}

/// One field of an input map, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputField {
    WitnessUtxo(TxOut),
    KeyPath { pubkey: Vec<u8>, source: KeySource },
    PartialSig { pubkey: Vec<u8>, signature: Vec<u8> },
    /// Any field not interpreted here, carried verbatim.
    Unknown(Pair),
}

impl InputField {
    fn from_pair(pair: Pair) -> Result<Self> {
        match pair.key_type() {
            PSBT_IN_WITNESS_UTXO => {
                if !pair.key_data().is_empty() {
                    return Err(Error::malformed("witness UTXO key carries key data"));
                }
                let txout: TxOut = encode::deserialize(&pair.value)
                    .map_err(|e| Error::malformed(format!("invalid witness UTXO: {}", e)))?;
                Ok(InputField::WitnessUtxo(txout))
            }
            PSBT_IN_PARTIAL_SIG => {
                check_pubkey(pair.key_data(), "partial signature")?;
                Ok(InputField::PartialSig {
                    pubkey: pair.key_data().to_vec(),
                    signature: pair.value,
                })
            }
            PSBT_IN_BIP32_DERIVATION => {
                check_pubkey(pair.key_data(), "key-path")?;
                let source = KeySource::from_bytes(&pair.value)?;
                Ok(InputField::KeyPath {
                    pubkey: pair.key_data().to_vec(),
                    source,
                })
            }
            _ => Ok(InputField::Unknown(pair)),
        }
    }

    fn to_pair(&self) -> Pair {
        match self {
            InputField::WitnessUtxo(txout) => {
                Pair::new(PSBT_IN_WITNESS_UTXO, &[], encode::serialize(txout))
            }
            InputField::KeyPath { pubkey, source } => {
                Pair::new(PSBT_IN_BIP32_DERIVATION, pubkey, source.to_bytes())
            }
            InputField::PartialSig { pubkey, signature } => {
                Pair::new(PSBT_IN_PARTIAL_SIG, pubkey, signature.clone())
            }
            InputField::Unknown(pair) => pair.clone(),
        }
    }
}

/// A per-input map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    fields: Vec<InputField>,
}

impl Input {
    fn from_pairs(pairs: Vec<Pair>) -> Result<Self> {
        let fields = pairs
            .into_iter()
            .map(InputField::from_pair)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[InputField] {
        &self.fields
    }

    /// Amount and script of the coin being spent, when the creator embedded it.
    pub fn witness_utxo(&self) -> Option<&TxOut> {
        self.fields.iter().find_map(|f| match f {
            InputField::WitnessUtxo(txout) => Some(txout),
            _ => None,
        })
    }

    pub fn key_paths(&self) -> impl Iterator<Item = (&[u8], &KeySource)> {
        self.fields.iter().filter_map(|f| match f {
            InputField::KeyPath { pubkey, source } => Some((pubkey.as_slice(), source)),
            _ => None,
        })
    }

    pub fn partial_sigs(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.fields.iter().filter_map(|f| match f {
            InputField::PartialSig { pubkey, signature } => {
                Some((pubkey.as_slice(), signature.as_slice()))
            }
            _ => None,
        })
    }

    pub fn partial_sig(&self, pubkey: &[u8]) -> Option<&[u8]> {
        self.partial_sigs()
            .find(|(key, _)| *key == pubkey)
            .map(|(_, sig)| sig)
    }

    /// Sets the signature for `pubkey`. An existing entry is overwritten in
    /// place; a new key is appended after the current fields.
    pub fn set_partial_sig(&mut self, pubkey: &[u8], signature: Vec<u8>) -> Result<()> {
        check_pubkey(pubkey, "partial signature")?;
        for field in self.fields.iter_mut() {
            if let InputField::PartialSig { pubkey: key, signature: sig } = field {
                if key.as_slice() == pubkey {
                    *sig = signature;
                    return Ok(());
                }
            }
        }
        self.fields.push(InputField::PartialSig {
            pubkey: pubkey.to_vec(),
            signature,
        });
        Ok(())
    }

    pub fn set_witness_utxo(&mut self, txout: TxOut) {
        for field in self.fields.iter_mut() {
            if let InputField::WitnessUtxo(existing) = field {
                *existing = txout;
                return;
            }
        }
        self.fields.push(InputField::WitnessUtxo(txout));
    }

    pub fn insert_key_path(&mut self, pubkey: &[u8], source: KeySource) -> Result<()> {
        check_pubkey(pubkey, "key-path")?;
        for field in self.fields.iter_mut() {
            if let InputField::KeyPath { pubkey: key, source: existing } = field {
                if key.as_slice() == pubkey {
                    *existing = source;
                    return Ok(());
                }
            }
        }
        self.fields.push(InputField::KeyPath {
            pubkey: pubkey.to_vec(),
            source,
        });
        Ok(())
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        for field in &self.fields {
            field.to_pair().write_to(buf);
        }
        buf.push(SEPARATOR);
    }
}

/// A per-output map together with the amount and script from the unsigned
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    txout: TxOut,
    pairs: Vec<Pair>,
}

impl Output {
    pub fn amount(&self) -> u64 {
        self.txout.value
    }

    pub fn script_pubkey(&self) -> &bitcoin::Script {
        &self.txout.script_pubkey
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }
}

/// A decoded partially signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psbt {
    global: Vec<Pair>,
    unsigned_tx: Transaction,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

impl Psbt {
    /// Wraps an unsigned transaction with empty input and output maps.
    pub fn from_unsigned_tx(tx: Transaction) -> Result<Self> {
        check_unsigned(&tx)?;
        let global = vec![Pair::new(PSBT_GLOBAL_UNSIGNED_TX, &[], encode::serialize(&tx))];
        let inputs = vec![Input::default(); tx.input.len()];
        let outputs = tx
            .output
            .iter()
            .map(|txout| Output {
                txout: txout.clone(),
                pairs: Vec::new(),
            })
            .collect();
        Ok(Self {
            global,
            unsigned_tx: tx,
            inputs,
            outputs,
        })
    }

    pub fn unsigned_tx(&self) -> &Transaction {
        &self.unsigned_tx
    }

    pub fn txid(&self) -> Txid {
        self.unsigned_tx.txid()
    }

    pub fn global_pairs(&self) -> &[Pair] {
        &self.global
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn input_mut(&mut self, index: usize) -> Option<&mut Input> {
        self.inputs.get_mut(index)
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Decode a PSBT from its binary form.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);

        let magic = reader
            .take(PSBT_MAGIC.len(), "magic")
            .map_err(|_| Error::malformed("input shorter than PSBT magic"))?;
        if magic != PSBT_MAGIC {
            return Err(Error::malformed("invalid PSBT magic bytes"));
        }

        let global = reader.read_map("global")?;
        let mut unsigned_tx = None;
        for pair in &global {
            match pair.key_type() {
                PSBT_GLOBAL_UNSIGNED_TX => {
                    if !pair.key_data().is_empty() {
                        return Err(Error::malformed("unsigned transaction key carries key data"));
                    }
                    let tx: Transaction = encode::deserialize(&pair.value).map_err(|e| {
                        Error::malformed(format!("invalid unsigned transaction: {}", e))
                    })?;
                    check_unsigned(&tx)?;
                    unsigned_tx = Some(tx);
                }
                PSBT_GLOBAL_VERSION => {
                    if !pair.key_data().is_empty() || pair.value.len() != 4 {
                        return Err(Error::malformed("invalid PSBT version field"));
                    }
                    let version = u32::from_le_bytes([
                        pair.value[0],
                        pair.value[1],
                        pair.value[2],
                        pair.value[3],
                    ]);
                    if version != 0 {
                        return Err(Error::malformed(format!(
                            "unsupported PSBT version {}",
                            version
                        )));
                    }
                }
                _ => {}
            }
        }
        let unsigned_tx =
            unsigned_tx.ok_or_else(|| Error::malformed("missing unsigned transaction"))?;

        let mut inputs = Vec::with_capacity(unsigned_tx.input.len());
        for index in 0..unsigned_tx.input.len() {
            let pairs = reader.read_map(&format!("input {}", index))?;
            inputs.push(Input::from_pairs(pairs)?);
        }

        let mut outputs = Vec::with_capacity(unsigned_tx.output.len());
        for (index, txout) in unsigned_tx.output.iter().enumerate() {
            let pairs = reader.read_map(&format!("output {}", index))?;
            outputs.push(Output {
                txout: txout.clone(),
                pairs,
            });
        }

        if reader.remaining() != 0 {
            return Err(Error::malformed(format!(
                "{} trailing bytes after output maps at offset {}",
                reader.remaining(),
                reader.position()
            )));
        }

        Ok(Self {
            global,
            unsigned_tx,
            inputs,
            outputs,
        })
    }

    /// Encode the PSBT in the field order it was decoded or built with.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(PSBT_MAGIC);
        for pair in &self.global {
            pair.write_to(&mut buf);
        }
        buf.push(SEPARATOR);
        for input in &self.inputs {
            input.write_to(&mut buf);
        }
        for output in &self.outputs {
            for pair in &output.pairs {
                pair.write_to(&mut buf);
            }
            buf.push(SEPARATOR);
        }
        buf
    }

    /// Decode from base64. ASCII whitespace anywhere in `s` is ignored so
    /// line-wrapped input decodes, and non-zero trailing bits are accepted.
    /// Padding is still required.
    pub fn from_base64(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = BASE64_DECODER.decode(compact)?;
        Self::deserialize(&bytes)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.serialize())
    }
}

fn check_unsigned(tx: &Transaction) -> Result<()> {
    if tx
        .input
        .iter()
        .any(|txin| !txin.script_sig.is_empty() || !txin.witness.is_empty())
    {
        return Err(Error::malformed(
            "unsigned transaction carries scriptSig or witness data",
        ));
    }
    Ok(())
}
