use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Device, DeviceDiscovery};

/// Maximum age of the cached device list.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryFailure {
    pub source: String,
    pub reason: String,
}

/// Outcome of one discovery cycle. A failing source contributes no devices
/// and one entry in `failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub devices: Vec<Device>,
    pub failures: Vec<DiscoveryFailure>,
}

struct Cache {
    report: Arc<DiscoveryReport>,
    refreshed_at: Option<Instant>,
}

/// Cached view of the connected devices, refreshed at most once per
/// [`REFRESH_INTERVAL`] no matter how many callers ask.
pub struct DeviceRegistry {
    sources: Vec<Arc<dyn DeviceDiscovery>>,
    cache: Mutex<Cache>,
}

impl DeviceRegistry {
    pub fn new(sources: Vec<Arc<dyn DeviceDiscovery>>) -> Self {
        Self {
            sources,
            cache: Mutex::new(Cache {
                report: Arc::new(DiscoveryReport::default()),
                refreshed_at: None,
            }),
        }
    }

    /// Current snapshot, refreshing first if it is older than the interval.
    ///
    /// The lock is held across the refresh so concurrent callers wait for a
    /// single discovery pass and then share its result.
    pub async fn report(&self) -> Arc<DiscoveryReport> {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();
        let stale = cache
            .refreshed_at
            .map_or(true, |at| now.duration_since(at) >= REFRESH_INTERVAL);
        if stale {
            cache.report = Arc::new(self.discover_all().await);
            cache.refreshed_at = Some(now);
        }
        cache.report.clone()
    }

    pub async fn list(&self) -> Vec<Device> {
        self.report().await.devices.clone()
    }

    /// Find a device by fingerprint (case-insensitive), then by path (exact).
    /// `None` means nothing matching is connected.
    pub async fn select(&self, fingerprint: Option<&str>, path: Option<&str>) -> Option<Device> {
        let report = self.report().await;

        if let Some(fingerprint) = fingerprint {
            if let Some(device) = report
                .devices
                .iter()
                .find(|d| d.fingerprint.eq_ignore_ascii_case(fingerprint))
            {
                return Some(device.clone());
            }
            log::debug!("no device with fingerprint {}", fingerprint);
        }

        let path = path?;
        report.devices.iter().find(|d| d.path == path).cloned()
    }

    async fn discover_all(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for source in &self.sources {
            match source.discover().await {
                Ok(devices) => {
                    log::debug!("{} reported {} devices", source.name(), devices.len());
                    report.devices.extend(devices);
                }
                Err(e) => {
                    log::warn!("device discovery via {} failed: {}", source.name(), e);
                    report.failures.push(DiscoveryFailure {
                        source: source.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        log::info!(
            "device list refreshed: {} devices, {} failed sources",
            report.devices.len(),
            report.failures.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        devices: Vec<Device>,
    }

    impl Counting {
        fn new(devices: Vec<Device>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                devices,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeviceDiscovery for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn discover(&self) -> Result<Vec<Device>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.devices.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl DeviceDiscovery for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn discover(&self) -> Result<Vec<Device>> {
            Err(Error::DeviceTransport("usb stack unavailable".to_string()))
        }
    }

    fn devices() -> Vec<Device> {
        vec![
            Device::new("aabbccdd", "/dev/hidraw0", "trezor"),
            Device::new("11223344", "/dev/x", "specter"),
        ]
    }

    fn registry_with(devices: Vec<Device>) -> DeviceRegistry {
        let source: Arc<dyn DeviceDiscovery> = Counting::new(devices);
        DeviceRegistry::new(vec![source])
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_rate_limited() {
        let source = Counting::new(devices());
        let registry = DeviceRegistry::new(vec![source.clone() as Arc<dyn DeviceDiscovery>]);

        assert_eq!(registry.list().await.len(), 2);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(registry.list().await.len(), 2);
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        registry.list().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let source = Counting::new(devices());
        let registry = Arc::new(DeviceRegistry::new(vec![
            source.clone() as Arc<dyn DeviceDiscovery>
        ]));

        let lists = futures::future::join_all((0..8).map(|_| {
            let registry = registry.clone();
            async move { registry.list().await }
        }))
        .await;

        assert_eq!(source.calls(), 1);
        assert!(lists.iter().all(|l| *l == devices()));
    }

    #[tokio::test]
    async fn test_failing_source_is_reported_not_raised() {
        let _ = env_logger::try_init();
        let source = Counting::new(devices());
        let registry = DeviceRegistry::new(vec![
            Arc::new(Broken) as Arc<dyn DeviceDiscovery>,
            source.clone() as Arc<dyn DeviceDiscovery>,
        ]);

        let report = registry.report().await;
        assert_eq!(report.devices.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, "broken");
        assert!(report.failures[0].reason.contains("usb stack unavailable"));
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_empty_list() {
        let registry = DeviceRegistry::new(vec![Arc::new(Broken) as Arc<dyn DeviceDiscovery>]);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_select_by_fingerprint_ignores_case() {
        let registry = registry_with(devices());
        let device = registry.select(Some("AABBCCDD"), None).await.unwrap();
        assert_eq!(device.path, "/dev/hidraw0");
    }

    #[tokio::test]
    async fn test_select_falls_back_to_path() {
        let registry = registry_with(devices());

        let device = registry.select(Some("deadbeef"), Some("/dev/x")).await.unwrap();
        assert_eq!(device.fingerprint, "11223344");

        // fingerprint wins when both match different devices
        let device = registry.select(Some("aabbccdd"), Some("/dev/x")).await.unwrap();
        assert_eq!(device.fingerprint, "aabbccdd");
    }

    #[tokio::test]
    async fn test_select_no_match() {
        let registry = registry_with(devices());
        assert!(registry.select(Some("deadbeef"), None).await.is_none());
        assert!(registry.select(None, Some("/dev/X")).await.is_none());
        assert!(registry.select(None, None).await.is_none());
    }
}
