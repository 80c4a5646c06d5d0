//! InfluxDB v2 HTTP writer
//!
//! Points are encoded as line protocol and posted to `/api/v2/write` with
//! nanosecond precision. One request is issued per point so a rejected point
//! never takes others down with it.

use super::{async_trait, MetricsSink, SinkError};
use crate::models::Point;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default InfluxDB endpoint
pub const DEFAULT_INFLUX_URL: &str = "http://influxdb:8086";

/// Default request timeout for a single write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the InfluxDB writer
#[derive(Clone)]
pub struct InfluxConfig {
    /// Base URL (e.g., "http://influxdb:8086")
    pub url: String,
    /// API token, sent as `Authorization: Token <token>`
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Request timeout
    pub timeout: Duration,
}

impl InfluxConfig {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
            timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Time-series sink writing to InfluxDB over HTTP
pub struct InfluxWriter {
    client: Client,
    write_url: Url,
    auth_header: String,
}

impl InfluxWriter {
    /// Create the writer; the HTTP client is built once and reused
    pub fn new(config: &InfluxConfig) -> Result<Self, SinkError> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| SinkError::InvalidConfig(format!("invalid URL {}: {}", config.url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut write_url = base
            .join("api/v2/write")
            .map_err(|e| SinkError::InvalidConfig(e.to_string()))?;
        write_url
            .query_pairs_mut()
            .append_pair("org", &config.org)
            .append_pair("bucket", &config.bucket)
            .append_pair("precision", "ns");

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            write_url,
            auth_header: format!("Token {}", config.token),
        })
    }

    /// Full write endpoint including query parameters
    pub fn write_url(&self) -> &Url {
        &self.write_url
    }
}

impl std::fmt::Debug for InfluxWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxWriter")
            .field("write_url", &self.write_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MetricsSink for InfluxWriter {
    async fn write_point(&self, point: &Point) -> Result<(), SinkError> {
        let body = line_protocol(point);
        debug!(measurement = %point.measurement, line = %body, "Writing point");

        let response = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Encode a point as a single line of InfluxDB line protocol
pub fn line_protocol(point: &Point) -> String {
    let mut line = escape_measurement(&point.measurement);

    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        let _ = write!(line, ",{}={}", escape_key(key), escape_tag_value(value));
    }

    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_key(key), value))
        .collect();
    line.push(' ');
    line.push_str(&fields.join(","));

    let nanos = point.timestamp.timestamp_nanos_opt().unwrap_or_else(|| {
        point.timestamp.timestamp_micros().saturating_mul(1_000)
    });
    let _ = write!(line, " {}", nanos);

    line
}

/// Escape a measurement name (commas and spaces)
pub fn escape_measurement(value: &str) -> String {
    escape(value, &[',', ' '])
}

/// Escape a tag or field key (commas, equals signs and spaces)
pub fn escape_key(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

/// Escape a tag value (commas, equals signs and spaces)
pub fn escape_tag_value(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
