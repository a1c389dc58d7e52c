use std::env::{self, VarError};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, error, info};
use url::Url;

use crate::error::{BotError, Result};

const DEFAULT_TOP: u32 = 1;
const DEFAULT_SCORE_THRESHOLD: f64 = 0.3;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_APPINSIGHTS_ENDPOINT: &str = "https://dc.services.visualstudio.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub qna: QnaConfig,
    pub telemetry: TelemetryConfig,
    /// Reply to non-message gateway events (reactions) as well
    pub announce_events: bool,
}

#[derive(Debug, Clone)]
pub struct QnaConfig {
    pub knowledge_base_id: String,
    pub endpoint_key: String,
    pub endpoint_host: Url,
    pub top: u32,
    pub score_threshold: f64,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Events are only logged locally when unset
    pub instrumentation_key: Option<String>,
    pub endpoint: Url,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        debug!("Loading configuration from environment");
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key))
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, VarError>,
    {
        let discord_token = required(&lookup, "DISCORD_TOKEN")?;
        let knowledge_base_id = required(&lookup, "QNA_KNOWLEDGE_BASE_ID")?;
        let endpoint_key = required(&lookup, "QNA_ENDPOINT_KEY")?;
        let endpoint_host = Url::parse(&required(&lookup, "QNA_ENDPOINT_HOST")?)?;

        let top = parse_or(&lookup, "QNA_TOP", DEFAULT_TOP)?;
        if top == 0 {
            return Err(BotError::Config("QNA_TOP must be at least 1".to_string()));
        }

        let score_threshold = parse_or(&lookup, "QNA_SCORE_THRESHOLD", DEFAULT_SCORE_THRESHOLD)?;
        if !(0.0..=1.0).contains(&score_threshold) {
            return Err(BotError::Config(format!(
                "QNA_SCORE_THRESHOLD must be between 0 and 1, got {score_threshold}"
            )));
        }

        let timeout = Duration::from_secs(parse_or(
            &lookup,
            "QNA_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        )?);

        let instrumentation_key = optional(&lookup, "APPINSIGHTS_INSTRUMENTATION_KEY");
        let telemetry_endpoint = Url::parse(
            &optional(&lookup, "APPINSIGHTS_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_APPINSIGHTS_ENDPOINT.to_string()),
        )?;

        let announce_events = parse_or(&lookup, "ANNOUNCE_EVENTS", false)?;

        info!("Configuration loaded successfully");
        debug!("Discord token length: {} characters", discord_token.len());
        debug!("QnA endpoint host: {}", endpoint_host);
        debug!("QnA knowledge base: {}", knowledge_base_id);
        debug!("QnA endpoint key length: {} characters", endpoint_key.len());
        debug!(
            "QnA top: {}, score threshold: {}, timeout: {:?}",
            top, score_threshold, timeout
        );
        debug!(
            "Application Insights telemetry: {}",
            if instrumentation_key.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );

        Ok(Self {
            discord_token,
            qna: QnaConfig {
                knowledge_base_id,
                endpoint_key,
                endpoint_host,
                top,
                score_threshold,
                timeout,
            },
            telemetry: TelemetryConfig {
                instrumentation_key,
                endpoint: telemetry_endpoint,
            },
            announce_events,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> std::result::Result<String, VarError>,
{
    lookup(key).map_err(|e| {
        error!("Failed to load {} from environment: {}", key, e);
        BotError::EnvVar(e)
    })
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> std::result::Result<String, VarError>,
{
    lookup(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> std::result::Result<String, VarError>,
    T: FromStr,
    T::Err: Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            error!("Invalid value for {}: {}", key, e);
            BotError::Config(format!("{key}: {e}"))
        }),
        None => Ok(default),
    }
}
