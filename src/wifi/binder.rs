//! Request, bind and release the robot's WiFi network

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::platform::{NetworkHandle, NetworkRequest, WifiPlatform};
use super::scan::{filter_robot_aps, AccessPoint};
use super::WifiError;

/// Floor for the association poll interval
const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Notifications raised by the binder outside of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderEvent {
    /// The bound network went away
    NetworkLost { ssid: String },
}

/// The network command traffic is currently bound to.
///
/// Shared between the binder, which installs and clears it, and the network
/// monitor, which clears it on loss.
#[derive(Debug, Clone, Default)]
pub struct NetworkBinding {
    current: Arc<RwLock<Option<NetworkHandle>>>,
}

impl NetworkBinding {
    pub fn current(&self) -> Option<NetworkHandle> {
        self.current.read().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.current.read().is_some()
    }

    fn bind(&self, handle: NetworkHandle) {
        *self.current.write() = Some(handle);
    }

    fn clear(&self) {
        self.current.write().take();
    }

    /// Clear only if `id` is still the bound network
    fn clear_if(&self, id: u64) -> bool {
        let mut current = self.current.write();
        match current.as_ref() {
            Some(handle) if handle.id == id => {
                *current = None;
                true
            }
            _ => false,
        }
    }
}

struct ActiveRequest {
    handle: NetworkHandle,
    /// False for a network the device joined without our request
    requested: bool,
    monitor: CancellationToken,
}

/// Joins robot access points and keeps at most one network request alive.
pub struct WifiNetworkBinder {
    platform: Arc<dyn WifiPlatform>,
    binding: NetworkBinding,
    /// Serializes unbind, request and bind
    active: Mutex<Option<ActiveRequest>>,
    monitor_interval: Duration,
    rebind_timeout: Duration,
    events: mpsc::UnboundedSender<BinderEvent>,
}

impl WifiNetworkBinder {
    pub fn new(
        platform: Arc<dyn WifiPlatform>,
        monitor_interval: Duration,
        rebind_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<BinderEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let binder = Self {
            platform,
            binding: NetworkBinding::default(),
            active: Mutex::new(None),
            monitor_interval: monitor_interval.max(MIN_MONITOR_INTERVAL),
            rebind_timeout,
            events,
        };
        (binder, events_rx)
    }

    pub fn binding(&self) -> NetworkBinding {
        self.binding.clone()
    }

    /// Currently bound network
    pub fn current(&self) -> Option<NetworkHandle> {
        self.binding.current()
    }

    /// Whether the device is associated with `ssid` right now
    pub async fn is_already_on(&self, ssid: &str) -> bool {
        match self.platform.current_ssid().await {
            Ok(Some(current)) => strip_quotes(&current) == strip_quotes(ssid),
            Ok(None) => false,
            Err(e) => {
                debug!("[WiFi] Could not read current SSID: {}", e);
                false
            }
        }
    }

    /// Robot access points in range, strongest first
    pub async fn scan_robot_aps(&self) -> Result<Vec<AccessPoint>, WifiError> {
        let robots = filter_robot_aps(self.platform.scan().await?);
        info!("[WiFi] Found {} robot network(s)", robots.len());
        Ok(robots)
    }

    /// Join `ssid` and bind command traffic to it.
    ///
    /// Returns immediately without a platform request when the device is
    /// already on `ssid`. Otherwise any previous request is released first,
    /// then the platform has `timeout` to grant the new one.
    pub async fn request_and_bind(
        &self,
        ssid: &str,
        passphrase: &str,
        timeout: Duration,
    ) -> Result<NetworkHandle, WifiError> {
        let request = NetworkRequest::for_access_point(ssid, passphrase);
        request.validate()?;

        let mut active = self.active.lock().await;

        if self.is_already_on(ssid).await {
            let target = strip_quotes(ssid);
            if let Some(existing) = active
                .as_ref()
                .filter(|a| strip_quotes(&a.handle.ssid) == target)
            {
                debug!("[WiFi] Already on {}, keeping binding", ssid);
                return Ok(existing.handle.clone());
            }
            // Joined outside our request: no handle to pin to, default routing applies
            info!("[WiFi] Already on {}, using default routing", ssid);
            self.release(&mut active).await;
            let handle = NetworkHandle::unbound(ssid);
            *active = Some(self.activate(handle.clone(), false));
            return Ok(handle);
        }

        self.release(&mut active).await;

        info!("[WiFi] Requesting network {}", ssid);
        let handle = match tokio::time::timeout(timeout, self.platform.request_network(&request)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!("[WiFi] Request for {} failed: {}", ssid, e);
                return Err(e);
            }
            Err(_) => {
                warn!("[WiFi] Request for {} timed out after {:?}", ssid, timeout);
                return Err(WifiError::Timeout(timeout));
            }
        };

        info!(
            "[WiFi] Bound to {} (interface: {:?}, local: {:?})",
            handle.ssid, handle.interface, handle.local_addr
        );
        *active = Some(self.activate(handle.clone(), true));
        Ok(handle)
    }

    /// Rejoin `ssid` with the shorter best-effort timeout
    pub async fn rebind(&self, ssid: &str, passphrase: &str) -> Result<NetworkHandle, WifiError> {
        self.request_and_bind(ssid, passphrase, self.rebind_timeout).await
    }

    /// Drop the binding and withdraw the request. Safe to call when nothing is bound.
    pub async fn unbind(&self) {
        let mut active = self.active.lock().await;
        self.release(&mut active).await;
    }

    fn activate(&self, handle: NetworkHandle, requested: bool) -> ActiveRequest {
        self.binding.bind(handle.clone());
        let monitor = CancellationToken::new();
        spawn_monitor(
            self.platform.clone(),
            self.binding.clone(),
            handle.clone(),
            self.monitor_interval,
            self.events.clone(),
            monitor.clone(),
        );
        ActiveRequest {
            handle,
            requested,
            monitor,
        }
    }

    async fn release(&self, active: &mut Option<ActiveRequest>) {
        self.binding.clear();
        let Some(request) = active.take() else {
            return;
        };
        request.monitor.cancel();
        if request.requested {
            debug!("[WiFi] Releasing request for {}", request.handle.ssid);
            if let Err(e) = self.platform.release_network(&request.handle).await {
                debug!("[WiFi] Release of {} failed: {}", request.handle.ssid, e);
            }
        }
    }
}

impl Drop for WifiNetworkBinder {
    fn drop(&mut self) {
        if let Ok(active) = self.active.try_lock() {
            if let Some(request) = active.as_ref() {
                request.monitor.cancel();
            }
        }
    }
}

fn spawn_monitor(
    platform: Arc<dyn WifiPlatform>,
    binding: NetworkBinding,
    handle: NetworkHandle,
    interval: Duration,
    events: mpsc::UnboundedSender<BinderEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = match platform.current_ssid().await {
                Ok(current) => current,
                Err(e) => {
                    debug!("[WiFi] Monitor could not read SSID: {}", e);
                    continue;
                }
            };
            if current.as_deref().map(strip_quotes) == Some(strip_quotes(&handle.ssid)) {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }

            warn!("[WiFi] Lost network {} (now on {:?})", handle.ssid, current);
            binding.clear_if(handle.id);
            let _ = events.send(BinderEvent::NetworkLost {
                ssid: handle.ssid.clone(),
            });
            break;
        }
    });
}

/// Some platforms report SSIDs wrapped in double quotes
fn strip_quotes(ssid: &str) -> &str {
    ssid.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ssid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::testing::{FakePlatform, Grant};

    const MONITOR: Duration = Duration::from_millis(100);
    const REBIND: Duration = Duration::from_secs(5);

    fn binder(platform: &Arc<FakePlatform>) -> (WifiNetworkBinder, mpsc::UnboundedReceiver<BinderEvent>) {
        WifiNetworkBinder::new(platform.clone(), MONITOR, REBIND)
    }

    #[tokio::test]
    async fn test_fast_path_issues_no_request() {
        let platform = Arc::new(FakePlatform::new(Some("\"Robot_AP\"")));
        let (binder, _events) = binder(&platform);

        let handle = binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("fast path");

        assert_eq!(platform.requests(), 0);
        assert_eq!(handle, NetworkHandle::unbound("Robot_AP"));
        assert_eq!(binder.current(), Some(handle));
    }

    #[tokio::test]
    async fn test_request_binds_network() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, _events) = binder(&platform);

        let handle = binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("granted");

        assert_eq!(platform.requests(), 1);
        assert_eq!(handle.ssid, "Robot_AP");
        assert!(handle.is_pinned());
        assert_eq!(binder.current(), Some(handle.clone()));

        // Second request on the same network reuses the binding
        let again = binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("reuse");
        assert_eq!(again, handle);
        assert_eq!(platform.requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let platform = Arc::new(FakePlatform::new(None));
        platform.set_grant(Grant::Never);
        let (binder, _events) = binder(&platform);

        let result = binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await;

        assert_eq!(result, Err(WifiError::Timeout(Duration::from_secs(15))));
        assert!(!binder.binding().is_bound());
    }

    #[tokio::test]
    async fn test_request_failure_propagates() {
        let platform = Arc::new(FakePlatform::new(None));
        platform.set_grant(Grant::Fail(WifiError::PermissionDenied("location".into())));
        let (binder, _events) = binder(&platform);

        let result = binder.rebind("Robot_AP", "12345678").await;
        assert!(matches!(result, Err(WifiError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_malformed_request_rejected_before_platform() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, _events) = binder(&platform);

        let result = binder.rebind("", "12345678").await;
        assert!(matches!(result, Err(WifiError::MalformedRequest(_))));
        assert_eq!(platform.requests(), 0);
    }

    #[tokio::test]
    async fn test_unbind_releases_and_is_idempotent() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, _events) = binder(&platform);

        binder.unbind().await;
        assert_eq!(platform.releases(), 0);

        binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("granted");
        binder.unbind().await;
        binder.unbind().await;

        assert_eq!(platform.releases(), 1);
        assert!(binder.current().is_none());
    }

    #[tokio::test]
    async fn test_new_request_releases_previous() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, _events) = binder(&platform);

        binder
            .request_and_bind("Robot_A", "12345678", Duration::from_secs(15))
            .await
            .expect("first");
        let second = binder
            .request_and_bind("Robot_B", "12345678", Duration::from_secs(15))
            .await
            .expect("second");

        assert_eq!(platform.requests(), 2);
        assert_eq!(platform.releases(), 1);
        assert_eq!(binder.current(), Some(second));
    }

    #[tokio::test]
    async fn test_monitor_reports_loss() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, mut events) = binder(&platform);

        binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("granted");

        platform.set_current(Some("HomeNet"));

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("loss reported");
        assert_eq!(
            event,
            Some(BinderEvent::NetworkLost {
                ssid: "Robot_AP".into()
            })
        );
        assert!(binder.current().is_none());
    }

    #[tokio::test]
    async fn test_quoted_ssid_reuses_binding() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, _events) = binder(&platform);

        let handle = binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("granted");
        let again = binder
            .request_and_bind("\"Robot_AP\"", "12345678", Duration::from_secs(15))
            .await
            .expect("reuse");

        assert_eq!(again, handle);
        assert_eq!(platform.requests(), 1);
        assert_eq!(platform.releases(), 0);
    }

    #[tokio::test]
    async fn test_zero_monitor_interval_still_reports_loss() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, mut events) = WifiNetworkBinder::new(platform.clone(), Duration::ZERO, REBIND);

        binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("granted");
        platform.set_current(Some("HomeNet"));

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("loss reported");
        assert!(matches!(event, Some(BinderEvent::NetworkLost { .. })));
    }

    #[tokio::test]
    async fn test_monitor_stops_after_unbind() {
        let platform = Arc::new(FakePlatform::new(None));
        let (binder, mut events) = binder(&platform);

        binder
            .request_and_bind("Robot_AP", "12345678", Duration::from_secs(15))
            .await
            .expect("granted");
        binder.unbind().await;
        platform.set_current(None);

        let event = tokio::time::timeout(MONITOR * 5, events.recv()).await;
        assert!(event.is_err(), "no loss after unbind");
    }

    #[tokio::test]
    async fn test_scan_lists_robot_networks() {
        let platform = Arc::new(FakePlatform::new(None));
        platform.set_visible(vec![
            AccessPoint::new("HomeNet", 95),
            AccessPoint::new("ESP_1A2B", 30),
            AccessPoint::new("Robot_AP", 80),
        ]);
        let (binder, _events) = binder(&platform);

        let robots = binder.scan_robot_aps().await.expect("scan");
        assert_eq!(
            robots,
            vec![AccessPoint::new("Robot_AP", 80), AccessPoint::new("ESP_1A2B", 30)]
        );
        assert_eq!(platform.requests(), 0);
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"Robot_AP\""), "Robot_AP");
        assert_eq!(strip_quotes("Robot_AP"), "Robot_AP");
        assert_eq!(strip_quotes("\""), "\"");
    }
}
