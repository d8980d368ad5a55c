//! Position sources and the permission boundary in front of them.
//!
//! A subscription is a stream of fixes fed by a background task. The task
//! lives exactly as long as the [`LocationSubscription`]: `cancel()` or
//! dropping the subscription stops it.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::model::Coordinate;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_IP_ENDPOINT: &str = "http://ip-api.com/json";
const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accuracy {
    #[default]
    HighAccuracy,
    Balanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRequest {
    pub accuracy: Accuracy,
    pub interval: Duration,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self { accuracy: Accuracy::HighAccuracy, interval: DEFAULT_INTERVAL }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission not granted")]
    PermissionNotGranted,
    #[error("Location services are turned off")]
    ServicesDisabled,
    #[error("Location unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    FineLocation,
    CoarseLocation,
}

/// The pair the pipeline always asks for together.
pub const LOCATION_PERMISSIONS: [Permission; 2] =
    [Permission::FineLocation, Permission::CoarseLocation];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied { permanently: bool },
    /// The platform wants the user told why before asking again.
    RationaleRequired,
}

#[async_trait]
pub trait PermissionGate: Send + Sync + Debug {
    async fn request(&self, permissions: &[Permission]) -> PermissionOutcome;

    fn is_granted(&self, permission: Permission) -> bool;
}

/// Permission gate backed by a stored yes/no answer.
///
/// No answer yet means the user has to be told why location is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsentGate {
    consent: Option<bool>,
}

impl ConsentGate {
    pub fn new(consent: Option<bool>) -> Self {
        Self { consent }
    }

    pub fn granted() -> Self {
        Self::new(Some(true))
    }
}

#[async_trait]
impl PermissionGate for ConsentGate {
    async fn request(&self, _permissions: &[Permission]) -> PermissionOutcome {
        match self.consent {
            Some(true) => PermissionOutcome::Granted,
            Some(false) => PermissionOutcome::Denied { permanently: true },
            None => PermissionOutcome::RationaleRequired,
        }
    }

    fn is_granted(&self, _permission: Permission) -> bool {
        self.consent == Some(true)
    }
}

/// Live stream of position fixes.
#[derive(Debug)]
pub struct LocationSubscription {
    updates: mpsc::Receiver<Coordinate>,
    stop: Option<oneshot::Sender<()>>,
}

impl LocationSubscription {
    /// Subscription plus the producer ends: the fix sender and the stop signal.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Coordinate>, oneshot::Receiver<()>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let sub = Self { updates: rx, stop: Some(stop_tx) };
        (tx, stop_rx, sub)
    }

    /// Next fix, or `None` once the producer has finished.
    pub async fn next(&mut self) -> Option<Coordinate> {
        self.updates.recv().await
    }

    pub fn is_active(&self) -> bool {
        self.stop.is_some()
    }

    /// Unsubscribe. The producer stops at its next await point.
    pub fn cancel(mut self) {
        self.stop_producer();
    }

    fn stop_producer(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
            debug!("Location subscription cancelled");
        }
        self.updates.close();
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        self.stop_producer();
    }
}

/// Run `produce` once per `interval` (the first immediately) and stream its
/// fixes until the subscription goes away. `None` from `produce` skips a tick.
pub fn spawn_periodic<F, Fut>(interval: Duration, mut produce: F) -> LocationSubscription
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Option<Coordinate>> + Send + 'static,
{
    let (tx, mut stop, sub) = LocationSubscription::channel(4);
    // `interval` panics on zero.
    let interval = interval.max(MIN_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {}
            }

            let fix = tokio::select! {
                _ = &mut stop => break,
                fix = produce() => fix,
            };

            if let Some(coord) = fix {
                if tx.send(coord).await.is_err() {
                    break;
                }
            }
        }
        debug!("Location producer stopped");
    });

    sub
}

pub trait LocationProvider: Send + Sync + Debug {
    /// Whether any position source is switched on.
    fn services_enabled(&self) -> bool;

    fn subscribe(&self, request: &LocationRequest) -> Result<LocationSubscription, LocationError>;
}

fn ensure_permitted(gate: &dyn PermissionGate) -> Result<(), LocationError> {
    if LOCATION_PERMISSIONS.iter().any(|p| gate.is_granted(*p)) {
        Ok(())
    } else {
        Err(LocationError::PermissionNotGranted)
    }
}

/// Reports a fixed, configured position.
#[derive(Debug, Clone)]
pub struct StaticLocationProvider {
    coordinate: Option<Coordinate>,
    permissions: Arc<dyn PermissionGate>,
}

impl StaticLocationProvider {
    pub fn new(coordinate: Option<Coordinate>, permissions: Arc<dyn PermissionGate>) -> Self {
        Self { coordinate, permissions }
    }
}

impl LocationProvider for StaticLocationProvider {
    fn services_enabled(&self) -> bool {
        self.coordinate.is_some()
    }

    fn subscribe(&self, request: &LocationRequest) -> Result<LocationSubscription, LocationError> {
        let coord = self.coordinate.ok_or(LocationError::ServicesDisabled)?;
        ensure_permitted(self.permissions.as_ref())?;

        Ok(spawn_periodic(request.interval, move || async move { Some(coord) }))
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: Option<String>,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
}

/// Network-based position from an IP geolocation service.
#[derive(Debug, Clone)]
pub struct IpLocationProvider {
    http: Client,
    endpoint: String,
    permissions: Arc<dyn PermissionGate>,
}

impl IpLocationProvider {
    pub fn new(endpoint: &str, permissions: Arc<dyn PermissionGate>) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(IP_LOOKUP_TIMEOUT).build()?;
        Ok(Self { http, endpoint: endpoint.to_string(), permissions })
    }

    pub async fn lookup(&self) -> Result<Coordinate, LocationError> {
        lookup_ip(&self.http, &self.endpoint).await
    }
}

async fn lookup_ip(http: &Client, endpoint: &str) -> Result<Coordinate, LocationError> {
    let res = http
        .get(endpoint)
        .send()
        .await
        .map_err(|e| LocationError::Unavailable(e.to_string()))?;

    if !res.status().is_success() {
        return Err(LocationError::Unavailable(format!(
            "IP geolocation returned status {}",
            res.status()
        )));
    }

    let body: IpApiResponse =
        res.json().await.map_err(|e| LocationError::Unavailable(e.to_string()))?;

    if body.status.as_deref().is_some_and(|s| s != "success") {
        return Err(LocationError::Unavailable(
            body.message.unwrap_or_else(|| "lookup failed".to_string()),
        ));
    }

    let (Some(lat), Some(lon)) = (body.lat, body.lon) else {
        return Err(LocationError::Unavailable("response carried no coordinates".into()));
    };
    let coord = Coordinate::new(lat, lon);
    if !coord.is_valid() {
        return Err(LocationError::Unavailable(format!("out-of-range coordinate {coord}")));
    }

    info!(city = body.city.as_deref().unwrap_or("?"), "IP geolocation fix: {coord}");
    Ok(coord)
}

impl LocationProvider for IpLocationProvider {
    fn services_enabled(&self) -> bool {
        true
    }

    fn subscribe(&self, request: &LocationRequest) -> Result<LocationSubscription, LocationError> {
        ensure_permitted(self.permissions.as_ref())?;
        if request.accuracy == Accuracy::HighAccuracy {
            debug!("IP geolocation cannot honour high accuracy; using city-level fixes");
        }

        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        Ok(spawn_periodic(request.interval, move || {
            let http = http.clone();
            let endpoint = endpoint.clone();
            async move {
                match lookup_ip(&http, &endpoint).await {
                    Ok(coord) => Some(coord),
                    Err(e) => {
                        warn!("Skipping location update: {e}");
                        None
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> LocationRequest {
        LocationRequest { interval: Duration::from_millis(20), ..Default::default() }
    }

    #[tokio::test]
    async fn consent_gate_outcomes() {
        assert_eq!(
            ConsentGate::new(Some(true)).request(&LOCATION_PERMISSIONS).await,
            PermissionOutcome::Granted
        );
        assert_eq!(
            ConsentGate::new(Some(false)).request(&LOCATION_PERMISSIONS).await,
            PermissionOutcome::Denied { permanently: true }
        );
        assert_eq!(
            ConsentGate::new(None).request(&LOCATION_PERMISSIONS).await,
            PermissionOutcome::RationaleRequired
        );
        assert!(!ConsentGate::new(None).is_granted(Permission::FineLocation));
    }

    #[tokio::test]
    async fn static_provider_streams_until_cancelled() {
        let coord = Coordinate::new(51.5, -0.12);
        let provider = StaticLocationProvider::new(Some(coord), Arc::new(ConsentGate::granted()));

        let mut sub = provider.subscribe(&fast()).expect("subscribe");
        assert_eq!(sub.next().await, Some(coord));
        assert_eq!(sub.next().await, Some(coord));
        assert!(sub.is_active());
        sub.cancel();
    }

    #[tokio::test]
    async fn zero_interval_still_streams() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut sub = spawn_periodic(Duration::ZERO, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Some(Coordinate::new(1.0, 2.0)) }
        });

        assert_eq!(sub.next().await, Some(Coordinate::new(1.0, 2.0)));
        assert_eq!(sub.next().await, Some(Coordinate::new(1.0, 2.0)));
        assert!(calls.load(Ordering::SeqCst) >= 2);
        sub.cancel();
    }

    #[tokio::test]
    async fn producer_ends_after_drop() {
        let (tx, _stop, sub) = LocationSubscription::channel(1);
        drop(sub);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn static_provider_without_coordinate_is_disabled() {
        let provider = StaticLocationProvider::new(None, Arc::new(ConsentGate::granted()));
        assert!(!provider.services_enabled());
        assert!(matches!(provider.subscribe(&fast()), Err(LocationError::ServicesDisabled)));
    }

    #[tokio::test]
    async fn subscribe_without_permission_is_reported() {
        let provider = StaticLocationProvider::new(
            Some(Coordinate::new(0.0, 0.0)),
            Arc::new(ConsentGate::new(Some(false))),
        );
        assert!(matches!(provider.subscribe(&fast()), Err(LocationError::PermissionNotGranted)));
    }

    #[tokio::test]
    async fn ip_lookup_parses_coordinates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success", "lat": 52.52, "lon": 13.405, "city": "Berlin"
            })))
            .mount(&server)
            .await;

        let provider =
            IpLocationProvider::new(&server.uri(), Arc::new(ConsentGate::granted())).expect("new");
        let coord = provider.lookup().await.expect("fix");
        assert_eq!(coord, Coordinate::new(52.52, 13.405));

        let mut sub = provider.subscribe(&fast()).expect("subscribe");
        assert_eq!(sub.next().await, Some(coord));
        sub.cancel();
    }

    #[tokio::test]
    async fn ip_lookup_failure_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "fail", "message": "private range"
            })))
            .mount(&server)
            .await;

        let provider =
            IpLocationProvider::new(&server.uri(), Arc::new(ConsentGate::granted())).expect("new");
        let err = provider.lookup().await.unwrap_err();
        assert!(err.to_string().contains("private range"));
    }

    #[tokio::test]
    async fn ip_subscription_skips_failed_lookups() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success", "lat": 1.0, "lon": 2.0
            })))
            .mount(&server)
            .await;

        let provider =
            IpLocationProvider::new(&server.uri(), Arc::new(ConsentGate::granted())).expect("new");
        let mut sub = provider.subscribe(&fast()).expect("subscribe");

        let fix = tokio::time::timeout(Duration::from_secs(5), sub.next()).await;
        assert_eq!(fix.expect("fix after a failed tick"), Some(Coordinate::new(1.0, 2.0)));
        sub.cancel();
    }
}
