use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// How long a hold reserves its dates while checkout is in flight.
    pub hold_minutes: i64,
    /// Service fee in basis points charged on top of the stay cost.
    pub service_fee_bps: u32,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            hold_minutes: 20,
            service_fee_bps: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub failure_threshold: usize,
    pub cooldown_seconds: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            failure_threshold: 5,
            cooldown_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    pub interval_seconds: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_seconds: 300 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider.
    pub jwt_secret: String,
    pub audience: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    pub api_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_stripe_base_url")]
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_seconds: i64,
}

fn default_stripe_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_webhook_tolerance() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_topic_prefix() -> String {
    "trailhead".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Environment overlay and untracked local overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // TRAILHEAD__STRIPE__API_KEY -> stripe.api_key
            .add_source(config::Environment::with_prefix("TRAILHEAD").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
