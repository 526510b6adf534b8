use std::time::Duration;

use agent_neo_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://wttr.in";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const AGENT_NAME: &str = "agent-neo/0.1";

/// Where to look up the weather.
#[derive(Deserialize, JsonSchema)]
pub struct WeatherParameters {
    #[schemars(description = "City name, e.g. 'London' or 'Tokyo, Japan'.")]
    location: String,
}

/// Builder for [`WeatherTool`].
#[derive(Clone, Debug)]
pub struct WeatherToolBuilder {
    base_url: String,
    timeout: Duration,
}

impl WeatherToolBuilder {
    /// Sets the address of the weather service, `https://wttr.in` by
    /// default.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the timeout of a single lookup, 10 seconds by default.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the tool. Fails if the HTTP client can't be initialized.
    pub fn build(self) -> Result<WeatherTool, reqwest::Error> {
        let client = Client::builder()
            .user_agent(AGENT_NAME)
            .timeout(self.timeout)
            .build()?;
        Ok(WeatherTool {
            client,
            base_url: self.base_url,
            parameter_schema: schema_for!(WeatherParameters).to_value(),
        })
    }
}

impl Default for WeatherToolBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A tool that looks up the current weather of a location on wttr.in.
///
/// Failed lookups are reported to the model as a sentence describing what
/// went wrong.
pub struct WeatherTool {
    client: Client,
    base_url: String,
    parameter_schema: Value,
}

impl WeatherTool {
    /// Creates a new weather tool that talks to wttr.in.
    #[inline]
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    /// Creates a builder.
    #[inline]
    pub fn builder() -> WeatherToolBuilder {
        WeatherToolBuilder::default()
    }
}

impl Tool for WeatherTool {
    type Input = WeatherParameters;

    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: WeatherParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        async move {
            let location = input.location;
            let url = report_url(&base_url, &location)?;
            debug!("looking up weather: {url}");

            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|err| request_failed(err, &location))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ToolError::execution_error().with_reason(format!(
                    "Weather service returned an error: {}.",
                    status.as_u16()
                )));
            }
            let body = resp
                .bytes()
                .await
                .map_err(|err| request_failed(err, &location))?;

            let condition = serde_json::from_slice::<WeatherReport>(&body)
                .ok()
                .and_then(|report| report.current_condition.into_iter().next())
                .and_then(|condition| condition.summary())
                .ok_or_else(|| {
                    ToolError::execution_error().with_reason(format!(
                        "Could not parse weather data for '{location}'."
                    ))
                })?;
            Ok(format!(
                "{location}: {}, {}°C (feels like {}°C)",
                condition.description, condition.temp_c, condition.feels_like_c
            ))
        }
    }
}

fn report_url(base_url: &str, location: &str) -> Result<Url, ToolError> {
    let invalid = |reason: &str| {
        ToolError::execution_error()
            .with_reason(format!("Could not reach weather service: {reason}."))
    };
    let mut url =
        Url::parse(base_url).map_err(|err| invalid(&err.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("invalid service address"))?
        .pop_if_empty()
        .push(location);
    url.query_pairs_mut().append_pair("format", "j1");
    Ok(url)
}

fn request_failed(err: reqwest::Error, location: &str) -> ToolError {
    if err.is_timeout() {
        warn!("weather request timed out: {err}");
        return ToolError::execution_error().with_reason(format!(
            "Weather request timed out for '{location}'."
        ));
    }
    warn!("weather request failed: {err}");
    ToolError::execution_error()
        .with_reason(format!("Could not reach weather service: {err}."))
}

#[derive(Deserialize)]
struct WeatherReport {
    current_condition: Vec<CurrentCondition>,
}

#[derive(Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    #[serde(rename = "FeelsLikeC")]
    feels_like_c: String,
    #[serde(rename = "weatherDesc")]
    weather_desc: Vec<TextValue>,
}

#[derive(Deserialize)]
struct TextValue {
    value: String,
}

struct ConditionSummary {
    description: String,
    temp_c: String,
    feels_like_c: String,
}

impl CurrentCondition {
    fn summary(self) -> Option<ConditionSummary> {
        let description = self.weather_desc.into_iter().next()?.value;
        Some(ConditionSummary {
            description,
            temp_c: self.temp_c,
            feels_like_c: self.feels_like_c,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_url() {
        let url = report_url("https://wttr.in", "Tokyo, Japan").unwrap();
        assert_eq!(url.as_str(), "https://wttr.in/Tokyo,%20Japan?format=j1");

        let url = report_url("http://127.0.0.1:8080/", "London").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/London?format=j1");

        let err = report_url("not a url", "London").unwrap_err();
        assert!(
            err.reason().starts_with("Could not reach weather service: "),
            "{err}"
        );
    }

    #[test]
    fn test_schema_describes_location() {
        let tool = WeatherTool::new().unwrap();
        let schema = tool.parameter_schema();
        assert_eq!(schema["required"], serde_json::json!(["location"]));
        assert_eq!(
            schema["properties"]["location"]["description"],
            "City name, e.g. 'London' or 'Tokyo, Japan'."
        );
    }

    #[test]
    fn test_condition_without_description() {
        let report: WeatherReport = serde_json::from_str(
            r#"{"current_condition":[{"temp_C":"1","FeelsLikeC":"0","weatherDesc":[]}]}"#,
        )
        .unwrap();
        let condition = report.current_condition.into_iter().next().unwrap();
        assert!(condition.summary().is_none());
    }
}
