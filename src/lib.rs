//! Bridge between hardware signing devices and callers holding PSBTs.
//!
//! The pieces, leaf first: [`psbt`] decodes and encodes the binary structure,
//! [`address`] renders output scripts, [`summary`] builds the approval view,
//! [`merge`] folds a device's signatures back into the original, [`device`]
//! caches connected devices and [`rpc`] routes JSON-RPC requests. [`bridge`]
//! joins them.

pub mod address;
pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod merge;
pub mod psbt;
pub mod rpc;
pub mod summary;

pub use address::{AddressResult, Network};
pub use bridge::{dispatcher, Bridge};
pub use config::BridgeConfig;
pub use device::{Device, DeviceConnector, DeviceDiscovery, DeviceRegistry, SigningHandle};
pub use error::{Error, Result};
pub use merge::merge;
pub use psbt::Psbt;
pub use rpc::RpcDispatcher;
pub use summary::{summarize, MetadataSummary};
