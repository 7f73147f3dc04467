//! Composition of the registry, the codec and the dispatcher
//!
//! `Bridge` holds the only shared state (the device registry) plus the
//! connector used to reach devices. [`dispatcher`] exposes its operations as
//! RPC methods.

use std::sync::Arc;

use serde_json::Value;

use crate::address::Network;
use crate::device::{Device, DeviceConnector, DeviceRegistry};
use crate::error::{Error, Result};
use crate::merge::merge;
use crate::psbt::Psbt;
use crate::rpc::{Params, RpcDispatcher};
use crate::summary::{summarize, MetadataSummary};

pub struct Bridge {
    registry: Arc<DeviceRegistry>,
    connector: Arc<dyn DeviceConnector>,
    network: Network,
}

impl Bridge {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        connector: Arc<dyn DeviceConnector>,
        network: Network,
    ) -> Self {
        Self {
            registry,
            connector,
            network,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub async fn enumerate(&self) -> Vec<Device> {
        self.registry.list().await
    }

    pub fn get_psbt_meta(&self, b64_psbt: &str) -> Result<MetadataSummary> {
        let psbt = Psbt::from_base64(b64_psbt)?;
        Ok(summarize(&psbt, self.network))
    }

    /// Have the selected device sign `b64_psbt` and return the original PSBT
    /// with the device's partial signatures merged in, base64 encoded.
    pub async fn sign(
        &self,
        b64_psbt: &str,
        fingerprint: Option<&str>,
        path: Option<&str>,
    ) -> Result<String> {
        if fingerprint.is_none() && path.is_none() {
            return Err(Error::InvalidParams(
                "either fingerprint or path is required".to_string(),
            ));
        }
        let original = Psbt::from_base64(b64_psbt)?;

        // select() returns an owned copy; no registry lock is held past this point
        let device = self
            .registry
            .select(fingerprint, path)
            .await
            .ok_or_else(|| {
                Error::DeviceNotFound(format!(
                    "fingerprint={} path={}",
                    fingerprint.unwrap_or("-"),
                    path.unwrap_or("-")
                ))
            })?;

        log::info!(
            "✍️ Signing {} with {} device {} at {}",
            original.txid(),
            device.device_type,
            device.fingerprint,
            device.path
        );
        let mut handle = self.connector.open(&device.device_type, &device.path).await?;
        let signed = handle.sign(&original).await.map_err(|e| {
            log::error!("❌ Device {} failed to sign: {}", device.fingerprint, e);
            e
        })?;

        let merged = merge(&original, &signed)?;
        log::info!("✅ Signed {} with device {}", merged.txid(), device.fingerprint);
        Ok(merged.to_base64())
    }
}

async fn rpc_enumerate(bridge: Arc<Bridge>, _params: Params) -> Result<Value> {
    Ok(serde_json::to_value(bridge.enumerate().await)?)
}

async fn rpc_get_psbt_meta(bridge: Arc<Bridge>, params: Params) -> Result<Value> {
    let b64_psbt: String = params.required("b64_psbt")?;
    Ok(serde_json::to_value(bridge.get_psbt_meta(&b64_psbt)?)?)
}

async fn rpc_sign(bridge: Arc<Bridge>, params: Params) -> Result<Value> {
    let psbt: String = params.required("psbt")?;
    let fingerprint: Option<String> = params.get("fingerprint")?;
    let path: Option<String> = params.get("path")?;
    let signed = bridge
        .sign(&psbt, fingerprint.as_deref(), path.as_deref())
        .await?;
    Ok(Value::String(signed))
}

/// Dispatcher exposing `enumerate`, `get_psbt_meta` and `sign`.
pub fn dispatcher(bridge: Arc<Bridge>) -> RpcDispatcher {
    let mut dispatcher = RpcDispatcher::new();

    let b = bridge.clone();
    dispatcher.register("enumerate", &[], move |params| rpc_enumerate(b.clone(), params));

    let b = bridge.clone();
    dispatcher.register("get_psbt_meta", &["b64_psbt"], move |params| {
        rpc_get_psbt_meta(b.clone(), params)
    });

    let b = bridge;
    dispatcher.register("sign", &["psbt", "fingerprint", "path"], move |params| {
        rpc_sign(b.clone(), params)
    });

    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceDiscovery, SigningHandle, StaticDiscovery};
    use crate::psbt::tests::{sample_psbt, PUBKEY_A};
    use crate::rpc::{INVALID_PARAMS, SERVER_ERROR};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    /// Returns a bare copy of the transaction carrying one signature per input,
    /// the way devices drop everything they did not add.
    struct StrippingHandle;

    #[async_trait]
    impl SigningHandle for StrippingHandle {
        async fn sign(&mut self, psbt: &Psbt) -> Result<Psbt> {
            let mut signed = Psbt::from_unsigned_tx(psbt.unsigned_tx().clone())?;
            let pubkey = hex::decode(PUBKEY_A).unwrap();
            for index in 0..psbt.inputs().len() {
                signed
                    .input_mut(index)
                    .unwrap()
                    .set_partial_sig(&pubkey, vec![0x30, index as u8, 0x01])?;
            }
            Ok(signed)
        }
    }

    #[derive(Default)]
    struct MockConnector {
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceConnector for MockConnector {
        async fn open(&self, device_type: &str, path: &str) -> Result<Box<dyn SigningHandle>> {
            self.opened.lock().unwrap().push(format!("{}:{}", device_type, path));
            Ok(Box::new(StrippingHandle))
        }
    }

    fn bridge_with(connector: Arc<MockConnector>) -> Arc<Bridge> {
        let source = Arc::new(StaticDiscovery::new(vec![
            Device::new("aabbccdd", "/dev/hidraw0", "coldcard"),
            Device::new("01020304", "/dev/hidraw1", "trezor"),
        ])) as Arc<dyn DeviceDiscovery>;
        let registry = Arc::new(DeviceRegistry::new(vec![source]));
        Arc::new(Bridge::new(registry, connector, Network::Main))
    }

    #[tokio::test]
    async fn test_sign_merges_into_original() {
        let _ = env_logger::builder().is_test(true).try_init();
        let connector = Arc::new(MockConnector::default());
        let bridge = bridge_with(connector.clone());
        let original = sample_psbt();

        let signed = bridge
            .sign(&original.to_base64(), Some("AABBCCDD"), None)
            .await
            .unwrap();
        let signed = Psbt::from_base64(&signed).unwrap();

        let pubkey = hex::decode(PUBKEY_A).unwrap();
        for input in signed.inputs() {
            assert!(input.partial_sig(&pubkey).is_some());
            assert_eq!(input.key_paths().count(), 1);
            assert!(input.witness_utxo().is_some());
        }
        assert_eq!(*connector.opened.lock().unwrap(), vec!["coldcard:/dev/hidraw0"]);
    }

    #[tokio::test]
    async fn test_sign_by_path() {
        let connector = Arc::new(MockConnector::default());
        let bridge = bridge_with(connector.clone());
        bridge
            .sign(&sample_psbt().to_base64(), None, Some("/dev/hidraw1"))
            .await
            .unwrap();
        assert_eq!(*connector.opened.lock().unwrap(), vec!["trezor:/dev/hidraw1"]);
    }

    #[tokio::test]
    async fn test_sign_requires_selector() {
        let bridge = bridge_with(Arc::new(MockConnector::default()));
        let err = bridge.sign(&sample_psbt().to_base64(), None, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_sign_unknown_device() {
        let connector = Arc::new(MockConnector::default());
        let bridge = bridge_with(connector.clone());
        let err = bridge
            .sign(&sample_psbt().to_base64(), Some("ffffffff"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert!(connector.opened.lock().unwrap().is_empty());
    }

    /// Waits for `release` before answering, like a device waiting on the user.
    struct WaitingHandle {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SigningHandle for WaitingHandle {
        async fn sign(&mut self, psbt: &Psbt) -> Result<Psbt> {
            self.entered.notify_one();
            self.release.notified().await;
            StrippingHandle.sign(psbt).await
        }
    }

    #[derive(Default)]
    struct WaitingConnector {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl DeviceConnector for WaitingConnector {
        async fn open(&self, _device_type: &str, _path: &str) -> Result<Box<dyn SigningHandle>> {
            Ok(Box::new(WaitingHandle {
                entered: self.entered.clone(),
                release: self.release.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_enumerate_while_device_is_signing() {
        let connector = Arc::new(WaitingConnector::default());
        let source = Arc::new(StaticDiscovery::new(vec![Device::new(
            "aabbccdd",
            "/dev/hidraw0",
            "coldcard",
        )])) as Arc<dyn DeviceDiscovery>;
        let registry = Arc::new(DeviceRegistry::new(vec![source]));
        let bridge = Arc::new(Bridge::new(registry, connector.clone(), Network::Test));
        assert_eq!(bridge.network(), Network::Test);

        let signing = {
            let bridge = bridge.clone();
            let b64 = sample_psbt().to_base64();
            tokio::spawn(async move { bridge.sign(&b64, Some("aabbccdd"), None).await })
        };

        timeout(Duration::from_secs(5), connector.entered.notified())
            .await
            .expect("device never asked to sign");

        let devices = timeout(Duration::from_secs(1), bridge.enumerate())
            .await
            .expect("enumerate blocked by an in-flight signature");
        assert_eq!(devices.len(), 1);
        let selected = timeout(Duration::from_secs(1), bridge.registry().select(None, Some("/dev/hidraw0")))
            .await
            .expect("select blocked by an in-flight signature");
        assert!(selected.is_some());
        assert!(!signing.is_finished());

        connector.release.notify_one();
        let signed = signing.await.unwrap().unwrap();
        assert!(Psbt::from_base64(&signed).is_ok());
    }

    #[tokio::test]
    async fn test_rpc_methods() {
        let d = dispatcher(bridge_with(Arc::new(MockConnector::default())));
        assert_eq!(d.method_names(), vec!["enumerate", "get_psbt_meta", "sign"]);

        let devices = d.dispatch(json!({"method": "enumerate", "id": 1})).await;
        assert_eq!(devices["result"][0]["type"], "coldcard");

        let meta = d
            .dispatch(json!({"method": "get_psbt_meta", "params": [sample_psbt().to_base64()]}))
            .await;
        assert_eq!(meta["result"]["fee"], 10_000);

        let bad = d
            .dispatch(json!({"method": "get_psbt_meta", "params": {"b64_psbt": "bm90IGEgcHNidA=="}}))
            .await;
        assert_eq!(bad["error"]["code"], SERVER_ERROR);

        let missing = d.dispatch(json!({"method": "sign", "params": []})).await;
        assert_eq!(missing["error"]["code"], INVALID_PARAMS);
    }
}
