//! The location-to-weather pipeline.
//!
//! [`Orchestrator`] walks `Idle -> AwaitingPermission -> AwaitingLocationFix
//! -> FetchingWeather -> Rendered | Failed`. Every step runs on the caller's
//! task, so cache writes and renders never race each other. User-facing
//! output leaves through the [`Presenter`] only.

use chrono::{Local, TimeZone};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{KeyValueStore, ResponseCache},
    client::{FetchError, HttpStatus, WeatherClient},
    connectivity::Connectivity,
    display::{ConditionPolicy, DisplayModel, to_display_model},
    location::{
        LOCATION_PERMISSIONS, LocationError, LocationProvider, LocationRequest,
        LocationSubscription, PermissionGate, PermissionOutcome,
    },
    model::{Coordinate, Units, WeatherResponse},
};

pub const MSG_LOCATION_OFF: &str = "Your location provider is turned off. Please turn it on.";
pub const MSG_PERMISSION_DENIED: &str =
    "You have denied location permission. Please allow it as it is mandatory.";
pub const MSG_PERMISSION_RATIONALE: &str = "It looks like you have turned off permissions required \
     for this feature. It can be enabled under Application Settings.";
pub const MSG_LOCATION_UNAVAILABLE: &str = "Could not determine your location.";
pub const MSG_OFFLINE: &str = "No internet connection available.";
pub const MSG_FETCH_FAILED: &str = "Failed to get weather data";
pub const MSG_HTTP_ERROR: &str = "The weather service rejected the request.";

pub const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    LocationServicesOff,
    PermissionDenied,
    /// The location stream ended or stayed silent past the fix timeout.
    LocationUnavailable,
    Offline,
    /// `None` when the answer was 2xx but not a usable payload.
    HttpError { status: Option<u16> },
    TransportError,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::LocationServicesOff => f.write_str("location services off"),
            Failure::PermissionDenied => f.write_str("location permission denied"),
            Failure::LocationUnavailable => f.write_str("location unavailable"),
            Failure::Offline => f.write_str("offline"),
            Failure::HttpError { status: Some(code) } => write!(f, "HTTP error {code}"),
            Failure::HttpError { status: None } => f.write_str("malformed weather response"),
            Failure::TransportError => f.write_str("transport error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingPermission,
    AwaitingLocationFix,
    FetchingWeather,
    Rendered,
    Failed(Failure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Toast,
    Dialog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsTarget {
    /// System switch for location sources.
    LocationSources,
    /// This application's permission settings.
    AppDetails,
}

/// Short user-facing message, optionally offering a way into settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub action: Option<SettingsTarget>,
}

impl Notice {
    pub fn toast(message: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Toast, message: message.into(), action: None }
    }

    pub fn dialog(message: impl Into<String>, action: SettingsTarget) -> Self {
        Self { kind: NoticeKind::Dialog, message: message.into(), action: Some(action) }
    }
}

/// UI boundary of the pipeline.
pub trait Presenter: Send + Sync {
    fn show_busy(&self);
    fn hide_busy(&self);
    fn notify(&self, notice: Notice);
    fn render(&self, model: &DisplayModel);
    fn open_settings(&self, target: SettingsTarget);
}

/// Busy indicator held for the lifetime of a fetch; released on drop,
/// unwinding included.
pub struct BusyIndicator<'a> {
    presenter: &'a dyn Presenter,
}

impl<'a> BusyIndicator<'a> {
    pub fn acquire(presenter: &'a dyn Presenter) -> Self {
        presenter.show_busy();
        Self { presenter }
    }
}

impl Drop for BusyIndicator<'_> {
    fn drop(&mut self) {
        self.presenter.hide_busy();
    }
}

pub struct Collaborators {
    pub connectivity: Arc<dyn Connectivity>,
    pub location: Arc<dyn LocationProvider>,
    pub permissions: Arc<dyn PermissionGate>,
    pub client: Arc<dyn WeatherClient>,
    pub store: Arc<dyn KeyValueStore>,
    pub presenter: Arc<dyn Presenter>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub units: Units,
    /// Region code deciding the displayed temperature unit.
    pub region: String,
    pub condition_policy: ConditionPolicy,
    pub location_request: LocationRequest,
    pub fix_timeout: Duration,
    /// Tell the user about HTTP-level failures instead of only logging them.
    pub notify_http_errors: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            units: Units::Metric,
            region: String::new(),
            condition_policy: ConditionPolicy::LastWins,
            location_request: LocationRequest::default(),
            fix_timeout: DEFAULT_FIX_TIMEOUT,
            notify_http_errors: true,
        }
    }
}

pub struct Orchestrator<Tz = Local> {
    connectivity: Arc<dyn Connectivity>,
    location: Arc<dyn LocationProvider>,
    permissions: Arc<dyn PermissionGate>,
    client: Arc<dyn WeatherClient>,
    presenter: Arc<dyn Presenter>,
    cache: ResponseCache,
    options: PipelineOptions,
    tz: Tz,
    state: State,
    subscription: Option<LocationSubscription>,
}

impl Orchestrator<Local> {
    /// Orchestrator rendering times in the device's local zone.
    pub fn new(collaborators: Collaborators, options: PipelineOptions) -> Self {
        Self::with_time_zone(collaborators, options, Local)
    }
}

impl<Tz> Orchestrator<Tz>
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    pub fn with_time_zone(collaborators: Collaborators, options: PipelineOptions, tz: Tz) -> Self {
        Self {
            connectivity: collaborators.connectivity,
            location: collaborators.location,
            permissions: collaborators.permissions,
            client: collaborators.client,
            presenter: collaborators.presenter,
            cache: ResponseCache::new(collaborators.store),
            options,
            tz,
            state: State::Idle,
            subscription: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Render whatever is cached. Enters `Rendered` when there was something.
    pub fn render_cached(&mut self) -> bool {
        if self.render_from_cache() {
            self.transition(State::Rendered);
            true
        } else {
            false
        }
    }

    /// Cold start: cached render first, then location checks and a refresh.
    pub async fn start(&mut self) -> State {
        self.render_cached();

        if !self.location.services_enabled() {
            return self.location_services_off();
        }

        self.transition(State::AwaitingPermission);
        match self.permissions.request(&LOCATION_PERMISSIONS).await {
            PermissionOutcome::Granted => self.refresh().await,
            PermissionOutcome::Denied { permanently } => {
                info!(permanently, "Location permission denied");
                self.presenter.notify(Notice::toast(MSG_PERMISSION_DENIED));
                self.fail(Failure::PermissionDenied)
            }
            PermissionOutcome::RationaleRequired => {
                self.presenter
                    .notify(Notice::dialog(MSG_PERMISSION_RATIONALE, SettingsTarget::AppDetails));
                self.presenter.open_settings(SettingsTarget::AppDetails);
                self.fail(Failure::PermissionDenied)
            }
        }
    }

    /// Take one fix and fetch weather for it. Any subscription left over
    /// from an abandoned refresh is cancelled first.
    pub async fn refresh(&mut self) -> State {
        if let Some(previous) = self.subscription.take() {
            debug!("Cancelling outstanding location subscription");
            previous.cancel();
        }

        self.transition(State::AwaitingLocationFix);
        let subscription = match self.location.subscribe(&self.options.location_request) {
            Ok(sub) => sub,
            Err(LocationError::ServicesDisabled) => return self.location_services_off(),
            Err(LocationError::PermissionNotGranted) => {
                self.presenter.notify(Notice::toast(MSG_PERMISSION_DENIED));
                return self.fail(Failure::PermissionDenied);
            }
            Err(e @ LocationError::Unavailable(_)) => {
                warn!("{e}");
                self.presenter.notify(Notice::toast(MSG_LOCATION_UNAVAILABLE));
                return self.fail(Failure::LocationUnavailable);
            }
        };

        let fix_timeout = self.options.fix_timeout;
        let sub = self.subscription.insert(subscription);
        let fix = tokio::time::timeout(fix_timeout, sub.next()).await;
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
        }

        match fix {
            Ok(Some(coord)) => {
                info!("Location fix: {coord}");
                self.fetch_for(coord).await
            }
            Ok(None) => {
                warn!("Location updates ended before a fix arrived");
                self.presenter.notify(Notice::toast(MSG_LOCATION_UNAVAILABLE));
                self.fail(Failure::LocationUnavailable)
            }
            Err(_) => {
                warn!(timeout = ?fix_timeout, "No location fix in time");
                self.presenter.notify(Notice::toast(MSG_LOCATION_UNAVAILABLE));
                self.fail(Failure::LocationUnavailable)
            }
        }
    }

    /// Connectivity gate, request, cache write and render for one coordinate.
    pub async fn fetch_for(&mut self, coord: Coordinate) -> State {
        self.transition(State::FetchingWeather);

        if !self.connectivity.is_network_available() {
            self.presenter.notify(Notice::toast(MSG_OFFLINE));
            return self.fail(Failure::Offline);
        }

        let result = {
            let _busy = BusyIndicator::acquire(self.presenter.as_ref());
            self.client.fetch_weather(coord, self.options.units).await
        };

        match result {
            Ok(payload) => {
                info!(location = %payload.name, "Weather data received");
                self.transition(State::Rendered);
                match self.cache.save(&payload) {
                    Ok(()) => {
                        self.render_from_cache();
                    }
                    Err(e) => {
                        warn!("Could not cache weather payload: {e}");
                        self.render_payload(&payload);
                    }
                }
                self.state
            }
            Err(FetchError::Http { status }) => {
                match status {
                    HttpStatus::BadRequest => error!("Error 400: Bad Request"),
                    HttpStatus::NotFound => error!("Error 404: Not Found"),
                    HttpStatus::Other(code) => error!(code, "Error: Generic Error"),
                }
                self.http_failure(Some(status.code()))
            }
            Err(FetchError::Malformed(detail)) => {
                error!("Unusable weather response: {detail}");
                self.http_failure(None)
            }
            Err(FetchError::Transport(detail)) => {
                error!("Weather API call failed: {detail}");
                self.presenter.notify(Notice::toast(MSG_FETCH_FAILED));
                self.fail(Failure::TransportError)
            }
        }
    }

    fn http_failure(&mut self, status: Option<u16>) -> State {
        if self.options.notify_http_errors {
            self.presenter.notify(Notice::toast(MSG_HTTP_ERROR));
        }
        self.fail(Failure::HttpError { status })
    }

    fn location_services_off(&mut self) -> State {
        self.presenter.notify(Notice::toast(MSG_LOCATION_OFF));
        self.presenter.open_settings(SettingsTarget::LocationSources);
        self.fail(Failure::LocationServicesOff)
    }

    fn render_from_cache(&self) -> bool {
        match self.cache.load() {
            Some(payload) => {
                self.render_payload(&payload);
                true
            }
            None => false,
        }
    }

    fn render_payload(&self, payload: &WeatherResponse) {
        let model = to_display_model(
            payload,
            &self.options.region,
            &self.tz,
            self.options.condition_policy,
        );
        self.presenter.render(&model);
    }

    fn transition(&mut self, next: State) {
        debug!(from = ?self.state, to = ?next, "Pipeline transition");
        self.state = next;
    }

    fn fail(&mut self, failure: Failure) -> State {
        self.transition(State::Failed(failure));
        self.state
    }
}
