//! Turns a cached payload into the strings and icon the screen shows.
//!
//! Everything here is pure; the time zone is passed in by the caller.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{Units, WeatherResponse};

/// Regions that display temperatures in Fahrenheit.
pub const IMPERIAL_REGIONS: [&str; 3] = ["US", "LR", "MM"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconCategory {
    Clear,
    Cloud,
    Rain,
    Storm,
    Snow,
    Unknown,
}

impl IconCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IconCategory::Clear => "clear",
            IconCategory::Cloud => "cloud",
            IconCategory::Rain => "rain",
            IconCategory::Storm => "storm",
            IconCategory::Snow => "snow",
            IconCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IconCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API icon codes the app has artwork for. Night codes reuse day artwork the
/// way the shipped screen did, so `01n` and `10n` show clouds and `11n` rain.
pub const ICON_TABLE: [(&str, IconCategory); 14] = [
    ("01d", IconCategory::Clear),
    ("02d", IconCategory::Cloud),
    ("03d", IconCategory::Cloud),
    ("04d", IconCategory::Cloud),
    ("04n", IconCategory::Cloud),
    ("10d", IconCategory::Rain),
    ("11d", IconCategory::Storm),
    ("13d", IconCategory::Snow),
    ("01n", IconCategory::Cloud),
    ("02n", IconCategory::Cloud),
    ("03n", IconCategory::Cloud),
    ("10n", IconCategory::Cloud),
    ("11n", IconCategory::Rain),
    ("13n", IconCategory::Snow),
];

pub fn icon_for_code(code: &str) -> IconCategory {
    ICON_TABLE
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, icon)| *icon)
        .unwrap_or(IconCategory::Unknown)
}

fn is_imperial_region(region: &str) -> bool {
    let region = region.trim();
    IMPERIAL_REGIONS.iter().any(|r| r.eq_ignore_ascii_case(region))
}

pub fn unit_symbol(region: &str) -> &'static str {
    if is_imperial_region(region) { "°F" } else { "°C" }
}

/// Unit system to request so the numbers match [`unit_symbol`].
pub fn units_for_region(region: &str) -> Units {
    if is_imperial_region(region) { Units::Imperial } else { Units::Metric }
}

/// Region part of a POSIX or BCP 47 locale tag: `en_US.UTF-8` -> `US`.
pub fn region_from_locale(locale: &str) -> Option<String> {
    let tag = locale.split(['.', '@']).next()?;
    let region = tag.split(['_', '-']).nth(1)?;

    let is_alpha2 = region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic());
    let is_un_m49 = region.len() == 3 && region.chars().all(|c| c.is_ascii_digit());
    (is_alpha2 || is_un_m49).then(|| region.to_ascii_uppercase())
}

/// `HH:mm` on a 24-hour clock in `tz`.
pub fn format_clock<Tz>(epoch_secs: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    match DateTime::from_timestamp(epoch_secs, 0) {
        Some(utc) => utc.with_timezone(tz).format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

/// Which condition entry fills the single-valued display fields when the
/// payload carries several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    #[default]
    LastWins,
    FirstWins,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayModel {
    pub main: String,
    pub description: String,
    pub icon: IconCategory,
    pub temperature: String,
    pub unit: &'static str,
    pub humidity: String,
    pub temp_min: String,
    pub temp_max: String,
    pub wind_speed: String,
    pub name: String,
    pub country: String,
    pub sunrise: String,
    pub sunset: String,
}

pub fn to_display_model<Tz>(
    payload: &WeatherResponse,
    region: &str,
    tz: &Tz,
    policy: ConditionPolicy,
) -> DisplayModel
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let unit = unit_symbol(region);
    let conditions = payload.conditions();
    let condition = match policy {
        ConditionPolicy::LastWins => conditions.iter().last(),
        ConditionPolicy::FirstWins => conditions.first(),
    };

    let (main, description, icon) = match condition {
        Some(c) => (c.main.clone(), c.description.clone(), icon_for_code(&c.icon)),
        None => (String::new(), String::new(), IconCategory::Unknown),
    };

    DisplayModel {
        main,
        description,
        icon,
        temperature: format!("{:.1}{unit}", payload.main.temp),
        unit,
        humidity: format!("{} per cent", payload.main.humidity),
        temp_min: format!("{:.1}{unit} min", payload.main.temp_min),
        temp_max: format!("{:.1}{unit} max", payload.main.temp_max),
        wind_speed: format!("{}", payload.wind.speed),
        name: payload.name.clone(),
        country: payload.sys.country.clone(),
        sunrise: format_clock(payload.sys.sunrise, tz),
        sunset: format_clock(payload.sys.sunset, tz),
    }
}
