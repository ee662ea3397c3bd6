//! Weather lookup tool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatTool, ToolContext};

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";

/// Current-weather lookup by coordinates.
pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentWeather,
    #[serde(default)]
    current_units: Option<CurrentUnits>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
}

#[derive(Debug, Deserialize)]
struct CurrentUnits {
    temperature_2m: String,
}

impl WeatherTool {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl ChatTool for WeatherTool {
    fn name(&self) -> &'static str {
        "get_weather"
    }

    fn description(&self) -> &'static str {
        "Get the current weather at a location."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": { "type": "number" },
                "longitude": { "type": "number" }
            },
            "required": ["latitude", "longitude"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: serde_json::Value) -> Result<String> {
        let args: WeatherArgs =
            serde_json::from_value(arguments).context("get_weather arguments")?;

        let url = format!(
            "{}/v1/forecast?latitude={}&longitude={}&current=temperature_2m",
            self.base_url.trim_end_matches('/'),
            args.latitude,
            args.longitude
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("requesting weather")?;
        if !response.status().is_success() {
            anyhow::bail!("weather endpoint returned {}", response.status());
        }

        let forecast: ForecastResponse =
            response.json().await.context("decoding weather response")?;
        let unit = forecast
            .current_units
            .map(|u| u.temperature_2m)
            .unwrap_or_else(|| "°C".to_string());

        Ok(format!(
            "Current temperature at ({}, {}): {}{}",
            args.latitude, args.longitude, forecast.current.temperature_2m, unit
        ))
    }
}
