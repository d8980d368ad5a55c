use std::{
    io::Write,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use geoweather_core::{DisplayModel, Notice, NoticeKind, Presenter, SettingsTarget};

/// Terminal presenter: weather on stdout, everything else on stderr.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    config_path: Option<PathBuf>,
    busy: AtomicBool,
}

impl ConsolePresenter {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path, busy: AtomicBool::new(false) }
    }

    fn config_hint(&self) -> String {
        match &self.config_path {
            Some(path) => format!(" (config: {})", path.display()),
            None => String::new(),
        }
    }
}

impl Presenter for ConsolePresenter {
    fn show_busy(&self) {
        if !self.busy.swap(true, Ordering::SeqCst) {
            eprint!("Fetching weather... ");
            if let Err(e) = std::io::stderr().flush() {
                tracing::debug!("Could not flush stderr: {e}");
            }
        }
    }

    fn hide_busy(&self) {
        if self.busy.swap(false, Ordering::SeqCst) {
            eprintln!("done");
        }
    }

    fn notify(&self, notice: Notice) {
        eprintln!("{}", format_notice(&notice));
    }

    fn render(&self, model: &DisplayModel) {
        println!("{}", format_model(model));
    }

    fn open_settings(&self, target: SettingsTarget) {
        let hint = match target {
            SettingsTarget::LocationSources => {
                "Set a location with `geoweather configure`, or pass --lat/--lon or --ip."
            }
            SettingsTarget::AppDetails => {
                "Location consent is managed by `geoweather configure`."
            }
        };
        eprintln!("{hint}{}", self.config_hint());
    }
}

pub fn format_notice(notice: &Notice) -> String {
    let mut out = match notice.kind {
        NoticeKind::Toast => format!("! {}", notice.message),
        NoticeKind::Dialog => format!("? {}", notice.message),
    };
    match notice.action {
        Some(SettingsTarget::AppDetails) => {
            out.push_str("\n  Run `geoweather configure` to open the settings.")
        }
        Some(SettingsTarget::LocationSources) => {
            out.push_str("\n  Run `geoweather configure` to choose a location source.")
        }
        None => {}
    }
    out
}

pub fn format_model(model: &DisplayModel) -> String {
    let place = match (model.name.is_empty(), model.country.is_empty()) {
        (false, false) => format!("{}, {}", model.name, model.country),
        (false, true) => model.name.clone(),
        (true, false) => model.country.clone(),
        (true, true) => "Unknown location".to_string(),
    };

    let condition = if model.description.is_empty() {
        model.main.clone()
    } else {
        format!("{}: {}", model.main, model.description)
    };

    format!(
        "{place}\n\
         {condition} [{icon}]\n\
         Temperature  {temp} ({min} / {max})\n\
         Humidity     {humidity}\n\
         Wind         {wind}\n\
         Sunrise      {sunrise}\n\
         Sunset       {sunset}",
        icon = model.icon,
        temp = model.temperature,
        min = model.temp_min,
        max = model.temp_max,
        humidity = model.humidity,
        wind = model.wind_speed,
        sunrise = model.sunrise,
        sunset = model.sunset,
    )
}
