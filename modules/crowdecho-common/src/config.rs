use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Content source
    pub apify_api_key: String,

    // AI classifier
    pub anthropic_api_key: String,

    // Email delivery. Optional: when unset, alerts fall back to the no-op sink.
    pub resend_api_key: Option<String>,
    pub alert_from_address: String,

    // Items requested per channel fetch.
    pub fetch_page_size: u32,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            apify_api_key: required_env("APIFY_API_KEY"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            resend_api_key: env::var("RESEND_API_KEY").ok(),
            alert_from_address: env::var("ALERT_FROM_ADDRESS")
                .unwrap_or_else(|_| "alerts@crowdecho.dev".to_string()),
            fetch_page_size: env::var("FETCH_PAGE_SIZE")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .expect("FETCH_PAGE_SIZE must be a number"),
        }
    }

    /// Log the loaded configuration with secrets redacted.
    pub fn log_redacted(&self) {
        info!(
            database_url = %redact_url(&self.database_url),
            apify_api_key = %redact(&self.apify_api_key),
            anthropic_api_key = %redact(&self.anthropic_api_key),
            email_enabled = self.resend_api_key.is_some(),
            from = %self.alert_from_address,
            fetch_page_size = self.fetch_page_size,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn redact(secret: &str) -> String {
    if secret.len() <= 6 {
        "***".to_string()
    } else {
        let head: String = secret.chars().take(4).collect();
        format!("{head}***")
    }
}

fn redact_url(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("postgres://***@{host}"),
        None => url.to_string(),
    }
}
