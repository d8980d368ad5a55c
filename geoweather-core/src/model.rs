use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A resolved device position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Unit system requested from the weather API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            _ => Err(anyhow::anyhow!(
                "Unknown unit system '{value}'. Supported: metric, imperial."
            )),
        }
    }
}

/// One entry of the `weather` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainBlock {
    pub temp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feels_like: Option<f64>,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sys {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub sunrise: i64,
    #[serde(default)]
    pub sunset: i64,
}

/// Immutable snapshot of one weather API answer.
///
/// Field names follow the API's JSON so the same shape is used on the wire
/// and in the cache. Blocks the screen can live without default when missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coord: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Vec<Condition>>,
    pub main: MainBlock,
    #[serde(default)]
    pub wind: Wind,
    #[serde(default)]
    pub sys: Sys,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<i64>,
    /// Shift in seconds from UTC at the reported location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPayload {
    #[error("condition list is present but empty")]
    EmptyConditions,
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
}

impl WeatherResponse {
    /// Condition entries, empty when the block was absent.
    pub fn conditions(&self) -> &[Condition] {
        self.weather.as_deref().unwrap_or_default()
    }

    /// Check the payload invariants: a present condition list is non-empty
    /// and every numeric field is finite.
    pub fn validate(&self) -> Result<(), InvalidPayload> {
        if matches!(&self.weather, Some(list) if list.is_empty()) {
            return Err(InvalidPayload::EmptyConditions);
        }

        let mut numbers = vec![
            ("main.temp", self.main.temp),
            ("main.temp_min", self.main.temp_min),
            ("main.temp_max", self.main.temp_max),
            ("main.pressure", self.main.pressure),
            ("wind.speed", self.wind.speed),
        ];
        if let Some(v) = self.main.feels_like {
            numbers.push(("main.feels_like", v));
        }
        if let Some(v) = self.wind.deg {
            numbers.push(("wind.deg", v));
        }
        if let Some(c) = self.coord {
            numbers.push(("coord.lat", c.latitude));
            numbers.push(("coord.lon", c.longitude));
        }

        match numbers.into_iter().find(|(_, v)| !v.is_finite()) {
            Some((field, _)) => Err(InvalidPayload::NonFinite(field)),
            None => Ok(()),
        }
    }
}
