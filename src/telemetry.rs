//! Fire-and-forget telemetry sinks.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use url::Url;

use crate::error::Result;

/// Records named events. Implementations never block the caller and swallow their own failures.
pub trait TelemetrySink: Send + Sync {
    fn track_event(&self, name: &str, properties: HashMap<String, String>);
}

/// Writes events to the application log only.
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn track_event(&self, name: &str, properties: HashMap<String, String>) {
        info!("Telemetry event {}: {:?}", name, properties);
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    name: &'static str,
    time: String,
    i_key: String,
    data: EnvelopeData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeData {
    base_type: &'static str,
    base_data: EventData,
}

#[derive(Debug, Serialize)]
struct EventData {
    ver: u8,
    name: String,
    properties: HashMap<String, String>,
}

fn build_envelope(
    instrumentation_key: &str,
    name: &str,
    properties: HashMap<String, String>,
    time: DateTime<Utc>,
) -> Envelope {
    Envelope {
        name: "Microsoft.ApplicationInsights.Event",
        time: time.to_rfc3339_opts(SecondsFormat::Millis, true),
        i_key: instrumentation_key.to_string(),
        data: EnvelopeData {
            base_type: "EventData",
            base_data: EventData {
                ver: 2,
                name: name.to_string(),
                properties,
            },
        },
    }
}

/// Sends custom events to the Application Insights ingestion endpoint.
pub struct AppInsightsSink {
    client: reqwest::Client,
    track_url: Url,
    instrumentation_key: String,
}

impl AppInsightsSink {
    pub fn new(client: reqwest::Client, endpoint: &Url, instrumentation_key: String) -> Result<Self> {
        Ok(Self {
            client,
            track_url: endpoint.join("v2/track")?,
            instrumentation_key,
        })
    }
}

impl TelemetrySink for AppInsightsSink {
    fn track_event(&self, name: &str, properties: HashMap<String, String>) {
        let envelope = build_envelope(&self.instrumentation_key, name, properties, Utc::now());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, dropping telemetry event {}", name);
            return;
        };

        let client = self.client.clone();
        let url = self.track_url.clone();
        runtime.spawn(async move {
            let event_name = envelope.data.base_data.name.clone();
            match client.post(url).json(&[envelope]).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Telemetry event {} accepted", event_name);
                }
                Ok(response) => {
                    warn!(
                        "Telemetry endpoint rejected event {} ({})",
                        event_name,
                        response.status()
                    );
                }
                Err(e) => warn!("Failed to send telemetry event {}: {}", event_name, e),
            }
        });
    }
}
