//! Core library for the `geoweather` CLI.
//!
//! This crate defines:
//! - The location-to-weather pipeline and its state machine
//! - Collaborator traits for connectivity, location, the weather API,
//!   key-value storage and presentation
//! - The response cache and the display mapping
//! - Configuration & credentials handling
//!
//! It is used by `geoweather-cli`, but can also be reused by other front ends.

pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod display;
pub mod location;
pub mod model;
pub mod pipeline;

pub use cache::{FileStore, KeyValueStore, MemoryStore, ResponseCache};
pub use client::{FetchError, HttpStatus, OpenWeatherClient, WeatherClient};
pub use config::{Config, LocationSource};
pub use connectivity::{Connectivity, StaticConnectivity, SystemConnectivity};
pub use display::{ConditionPolicy, DisplayModel, IconCategory};
pub use location::{LocationProvider, PermissionGate};
pub use model::{Coordinate, Units, WeatherResponse};
pub use pipeline::{
    Collaborators, Failure, Notice, NoticeKind, Orchestrator, PipelineOptions, Presenter,
    SettingsTarget, State,
};
