//! Address derivation from output scripts
//!
//! Only witness programs are turned into addresses. Legacy and nested-segwit
//! scripts come back as [`AddressResult::Unsupported`] with the script hex, so a
//! caller can never mistake a raw script for an address.

use std::fmt;
use std::str::FromStr;

use bitcoin::{Address, Script};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Network the address is rendered for. Always chosen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Main,
    Test,
}

impl Network {
    fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Main => bitcoin::Network::Bitcoin,
            Network::Test => bitcoin::Network::Testnet,
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            other => Err(Error::Config(format!("unknown network: {}", other))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Main => f.write_str("main"),
            Network::Test => f.write_str("test"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressResult {
    Segwit { address: String },
    /// Not a witness program; `script` is the raw script hex.
    Unsupported { script: String },
}

impl AddressResult {
    pub fn address(&self) -> Option<&str> {
        match self {
            AddressResult::Segwit { address } => Some(address),
            AddressResult::Unsupported { .. } => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, AddressResult::Segwit { .. })
    }
}

impl fmt::Display for AddressResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressResult::Segwit { address } => f.write_str(address),
            AddressResult::Unsupported { script } => write!(f, "unsupported script {}", script),
        }
    }
}

/// Render `script` as a segwit address on `network`.
pub fn derive(script: &Script, network: Network) -> AddressResult {
    let unsupported = || AddressResult::Unsupported {
        script: hex::encode(script.as_bytes()),
    };

    if !script.is_witness_program() {
        return unsupported();
    }

    match Address::from_script(script, network.to_bitcoin()) {
        Ok(address) => AddressResult::Segwit {
            address: address.to_string(),
        },
        Err(e) => {
            log::debug!("witness script {} has no address form: {}", hex::encode(script.as_bytes()), e);
            unsupported()
        }
    }
}
