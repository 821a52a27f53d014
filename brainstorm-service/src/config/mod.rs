use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::models::UsageTier;

const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_GROK_MODEL: &str = "grok-2-1212";

#[derive(Debug, Clone, Deserialize)]
pub struct BrainstormConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    /// `None` selects the in-memory stores (dev and tests only).
    pub mongodb: Option<MongoConfig>,
    pub jwt: JwtConfig,
    pub participants: ParticipantsConfig,
    pub turns: TurnConfig,
    pub usage: UsageLimitsConfig,
    pub security: SecurityConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("Unknown ENVIRONMENT '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 shared secret used by the identity layer.
    pub secret: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub model: String,
    /// Completion endpoint. The scripted mock provider is used when unset.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantsConfig {
    pub claude: ProviderConfig,
    pub grok: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnConfig {
    /// How long a turn waits for a session lock held by another turn.
    pub lock_timeout_ms: u64,
    /// Number of trailing messages sent to the provider as context.
    pub context_window: usize,
    pub default_turn_duration_secs: u32,
    pub default_max_turns: u32,
}

impl TurnConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            context_window: 20,
            default_turn_duration_secs: 60,
            default_max_turns: 10,
        }
    }
}

/// Daily admission ceilings per tier. `None` means unlimited.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageLimitsConfig {
    pub free: Option<u64>,
    pub pro: Option<u64>,
    pub business: Option<u64>,
}

impl UsageLimitsConfig {
    pub fn limit_for(&self, tier: UsageTier) -> Option<u64> {
        match tier {
            UsageTier::Free => self.free,
            UsageTier::Pro => self.pro,
            UsageTier::Business => self.business,
        }
    }
}

impl Default for UsageLimitsConfig {
    fn default() -> Self {
        Self {
            free: Some(20),
            pro: Some(200),
            business: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Bounded per-connection outbound queue; overflow drops frames.
    pub send_queue: usize,
    /// Relayed `brainstorm:message` frames allowed per user per minute.
    pub relay_per_minute: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            send_queue: 256,
            relay_per_minute: 60,
        }
    }
}

impl BrainstormConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let mongodb = match env::var("MONGODB_URI") {
            Ok(uri) => Some(MongoConfig {
                uri,
                database: get_env("MONGODB_DATABASE", Some("brainstorm_db"), is_prod)?,
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "MONGODB_URI is required in production but not set"
                )));
            }
            Err(_) => None,
        };

        let jwt = JwtConfig {
            secret: env::var("JWT_SECRET").ok(),
            public_key_path: env::var("JWT_PUBLIC_KEY_PATH").ok(),
        };
        if jwt.secret.is_none() && jwt.public_key_path.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Either JWT_SECRET or JWT_PUBLIC_KEY_PATH must be set"
            )));
        }

        let defaults = TurnConfig::default();
        let usage_defaults = UsageLimitsConfig::default();
        let realtime_defaults = RealtimeConfig::default();

        Ok(BrainstormConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("brainstorm-service"), false)?,
            mongodb,
            jwt,
            participants: ParticipantsConfig {
                claude: provider_from_env("CLAUDE", DEFAULT_CLAUDE_MODEL, is_prod)?,
                grok: provider_from_env("GROK", DEFAULT_GROK_MODEL, is_prod)?,
            },
            turns: TurnConfig {
                lock_timeout_ms: parse_env("TURN_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
                context_window: parse_env("TURN_CONTEXT_WINDOW", defaults.context_window)?,
                default_turn_duration_secs: parse_env(
                    "TURN_DEFAULT_DURATION_SECS",
                    defaults.default_turn_duration_secs,
                )?,
                default_max_turns: parse_env("TURN_DEFAULT_MAX_TURNS", defaults.default_max_turns)?,
            },
            usage: UsageLimitsConfig {
                free: parse_limit("USAGE_LIMIT_FREE", usage_defaults.free)?,
                pro: parse_limit("USAGE_LIMIT_PRO", usage_defaults.pro)?,
                business: parse_limit("USAGE_LIMIT_BUSINESS", usage_defaults.business)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                global_ip_limit: parse_env("GLOBAL_IP_LIMIT", 300)?,
                global_ip_window_seconds: parse_env("GLOBAL_IP_WINDOW_SECONDS", 60)?,
            },
            realtime: RealtimeConfig {
                send_queue: parse_env("WS_SEND_QUEUE", realtime_defaults.send_queue)?,
                relay_per_minute: parse_env(
                    "WS_RELAY_PER_MINUTE",
                    realtime_defaults.relay_per_minute,
                )?,
            },
        })
    }
}

fn provider_from_env(
    prefix: &str,
    default_model: &str,
    is_prod: bool,
) -> Result<ProviderConfig, AppError> {
    let endpoint = env::var(format!("{}_ENDPOINT", prefix)).ok();
    if is_prod && endpoint.is_none() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{}_ENDPOINT is required in production but not set",
            prefix
        )));
    }

    Ok(ProviderConfig {
        model: get_env(&format!("{}_MODEL", prefix), Some(default_model), false)?,
        endpoint,
        api_key: env::var(format!("{}_API_KEY", prefix)).ok(),
    })
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

/// `unlimited` (or an empty value) lifts the ceiling for that tier.
fn parse_limit(key: &str, default: Option<u64>) -> Result<Option<u64>, AppError> {
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("unlimited") => {
            Ok(None)
        }
        Ok(raw) => raw.trim().parse().map(Some).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}
