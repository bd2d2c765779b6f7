use std::env;
use std::time::Duration;

use callgenie_core::UnknownTierPolicy;

const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

/// Runtime settings, read from `CALLGENIE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub bind: String,
    pub database_url: Option<String>,
    pub unknown_tier: UnknownTierPolicy,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: "dev-callgenie-key".to_string(),
            bind: "0.0.0.0:8080".to_string(),
            database_url: None,
            unknown_tier: UnknownTierPolicy::Reject,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 120,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let unknown_tier = match env::var("CALLGENIE_UNKNOWN_TIER") {
            Ok(value) => UnknownTierPolicy::parse(&value).unwrap_or_else(|| {
                tracing::warn!(value = %value, "unrecognised CALLGENIE_UNKNOWN_TIER, rejecting unknown tiers");
                UnknownTierPolicy::Reject
            }),
            Err(_) => defaults.unknown_tier,
        };

        Self {
            api_key: env::var("CALLGENIE_API_KEY").unwrap_or(defaults.api_key),
            bind: env::var("CALLGENIE_BIND").unwrap_or(defaults.bind),
            database_url: env::var("CALLGENIE_DATABASE_URL")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            unknown_tier,
            rate_limit_window: env::var("CALLGENIE_RATE_LIMIT_WINDOW_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: env::var("CALLGENIE_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.rate_limit_max),
            allowed_origins: env::var("CALLGENIE_ALLOWED_ORIGINS")
                .ok()
                .map(|value| {
                    value
                        .split(',')
                        .map(|origin| origin.trim().trim_end_matches('/').to_string())
                        .filter(|origin| !origin.is_empty())
                        .collect::<Vec<_>>()
                })
                .unwrap_or(defaults.allowed_origins),
        }
    }
}
