use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand};
use inquire::{Confirm, CustomType, Password, Select};
use tracing::info;

use geoweather_core::{
    Collaborators, Config, Connectivity, Coordinate, FileStore, LocationProvider, LocationSource,
    OpenWeatherClient, Orchestrator, PermissionGate, ResponseCache, State, StaticConnectivity,
    Units,
    display::to_display_model,
    location::{ConsentGate, IpLocationProvider, StaticLocationProvider},
};

use crate::presenter::ConsolePresenter;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "geoweather", version, about = "Current weather for where you are")]
pub struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set the API key, units and location source interactively.
    Configure,

    /// Show the last fetched weather without using the network.
    Show,

    /// Locate, fetch and show the current weather.
    Refresh(FetchArgs),

    /// Refresh periodically until interrupted.
    Watch {
        /// Seconds between refreshes.
        #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u64).range(1..))]
        every: u64,

        #[command(flatten)]
        fetch: FetchArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Latitude to use instead of the configured location.
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,

    /// Longitude to use instead of the configured location.
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    pub lon: Option<f64>,

    /// Locate by IP address.
    #[arg(long, conflicts_with_all = ["lat", "lon"])]
    pub ip: bool,

    /// Behave as if no network were available.
    #[arg(long)]
    pub offline: bool,
}

impl FetchArgs {
    fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        }
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        match self.command {
            Command::Configure => {
                configure()?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Show => show(),
            Command::Refresh(args) => {
                let mut orch = build_orchestrator(&args)?;
                let state = orch.start().await;
                Ok(exit_code(state))
            }
            Command::Watch { every, fetch } => watch(&fetch, Duration::from_secs(every)).await,
        }
    }
}

fn exit_code(state: State) -> ExitCode {
    match state {
        State::Failed(failure) => {
            info!("Finished with failure: {failure}");
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    }
}

fn locale() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.is_empty())
}

fn system_connectivity() -> Arc<dyn Connectivity> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(geoweather_core::SystemConnectivity::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(StaticConnectivity::online())
    }
}

fn build_orchestrator(args: &FetchArgs) -> anyhow::Result<Orchestrator> {
    let config = Config::load()?;
    let api_key = config.api_key()?;
    let config_path = Config::config_file_path().ok();

    let client =
        OpenWeatherClient::with_endpoint(api_key, &config.base_url, config.request_timeout())?;

    // Explicit coordinates need no consent to locate the user.
    let explicit = args.coordinate();
    if let Some(coord) = explicit {
        anyhow::ensure!(coord.is_valid(), "Coordinate {coord} is out of range.");
    }
    let permissions: Arc<dyn PermissionGate> = if explicit.is_some() {
        Arc::new(ConsentGate::granted())
    } else {
        Arc::new(ConsentGate::new(config.location_consent))
    };

    let use_ip = args.ip || (explicit.is_none() && config.location.source == LocationSource::Ip);
    let location: Arc<dyn LocationProvider> = if use_ip {
        Arc::new(IpLocationProvider::new(&config.location.ip_endpoint, permissions.clone())?)
    } else {
        Arc::new(StaticLocationProvider::new(
            explicit.or_else(|| config.coordinate()),
            permissions.clone(),
        ))
    };

    let connectivity: Arc<dyn Connectivity> = if args.offline {
        Arc::new(StaticConnectivity::offline())
    } else {
        system_connectivity()
    };

    let store = FileStore::new(config.store_path()?);
    let region = config.region_or_locale(locale().as_deref());
    info!(region = %region, store = %store.path().display(), "Building pipeline");

    Ok(Orchestrator::new(
        Collaborators {
            connectivity,
            location,
            permissions,
            client: Arc::new(client),
            store: Arc::new(store),
            presenter: Arc::new(ConsolePresenter::new(config_path)),
        },
        config.pipeline_options(region),
    ))
}

fn show() -> anyhow::Result<ExitCode> {
    let config = Config::load()?;
    let cache = ResponseCache::new(Arc::new(FileStore::new(config.store_path()?)));

    let Some(payload) = cache.load() else {
        eprintln!("No cached weather yet.\nHint: run `geoweather refresh` first.");
        return Ok(ExitCode::FAILURE);
    };

    let region = config.region_or_locale(locale().as_deref());
    let model = to_display_model(&payload, &region, &Local, config.condition_policy);
    println!("{}", crate::presenter::format_model(&model));
    Ok(ExitCode::SUCCESS)
}

async fn watch(args: &FetchArgs, every: Duration) -> anyhow::Result<ExitCode> {
    let mut orch = build_orchestrator(args)?;
    let mut state = orch.start().await;
    if matches!(
        state,
        State::Failed(
            geoweather_core::Failure::LocationServicesOff
                | geoweather_core::Failure::PermissionDenied
        )
    ) {
        // Needs the user to act first; refreshing cannot fix it.
        return Ok(exit_code(state));
    }

    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, stopping");
                break;
            }
            next = async {
                ticker.tick().await;
                orch.refresh().await
            } => state = next,
        }
    }

    Ok(exit_code(state))
}

fn configure() -> anyhow::Result<()> {
    let path = Config::config_file_path()?;
    let mut config = Config::load()?;

    let key = Password::new("OpenWeatherMap API key (leave empty to keep current):")
        .without_confirmation()
        .prompt()?;
    if !key.trim().is_empty() {
        config.api_key = Some(key.trim().to_string());
    }

    let units = Select::new(
        "Units:",
        vec!["auto (from region)", Units::Metric.as_str(), Units::Imperial.as_str()],
    )
    .prompt()?;
    config.units = units.parse::<Units>().ok();

    let sources = vec!["fixed coordinate", "IP geolocation"];
    let source = Select::new("Location source:", sources).prompt()?;
    if source == "IP geolocation" {
        config.location.source = LocationSource::Ip;
    } else {
        config.location.source = LocationSource::Static;
        let lat = CustomType::<f64>::new("Latitude:")
            .with_error_message("Please enter a number")
            .prompt()?;
        let lon = CustomType::<f64>::new("Longitude:")
            .with_error_message("Please enter a number")
            .prompt()?;
        config.set_coordinate(Coordinate::new(lat, lon))?;
    }

    let consent = Confirm::new("Allow geoweather to use your location?")
        .with_default(config.location_consent.unwrap_or(true))
        .prompt()?;
    config.location_consent = Some(consent);

    config.save()?;
    println!("Saved configuration to {}", path.display());
    Ok(())
}
