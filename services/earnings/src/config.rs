use std::time::Duration;

use serde::Deserialize;

use payday_core::config::Config;

/// Earnings service configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct EarningsConfig {
    /// PostgreSQL connection URL. Env var: `DATABASE_URL`.
    pub database_url: String,
    /// TCP port to listen on (default 3115). Env var: `EARNINGS_PORT`.
    #[serde(default = "default_port")]
    pub earnings_port: u16,
    /// Platform secret API key. Env var: `STRIPE_SECRET_KEY`.
    pub stripe_secret_key: String,
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,
    /// Signing secret of the platform-events endpoint.
    pub stripe_webhook_platform_secret: String,
    /// Signing secret of the connected-account-events endpoint.
    pub stripe_webhook_connect_secret: String,
    pub app_name: String,
    pub unique_runner_id: String,
    pub unique_run_number: String,
    /// Daily instead of weekly pay periods (staging).
    #[serde(default)]
    pub use_short_pay_period: bool,
    #[serde(default = "default_aggregation_interval_secs")]
    pub aggregation_interval_secs: u64,
    #[serde(default = "default_processing_interval_secs")]
    pub processing_interval_secs: u64,
}

impl Config for EarningsConfig {}

fn default_port() -> u16 {
    3115
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_owned()
}

fn default_aggregation_interval_secs() -> u64 {
    60 * 60
}

fn default_processing_interval_secs() -> u64 {
    15 * 60
}

impl EarningsConfig {
    /// Tag written into processor metadata so events can be attributed to this deployment.
    pub fn generated_by(&self) -> String {
        format!(
            "{}-{}-{}",
            self.app_name, self.unique_runner_id, self.unique_run_number
        )
    }

    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs)
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_secs(self.processing_interval_secs)
    }
}
