//! Configuration for the dispatcher
//!
//! Command-line arguments (each bound to a `LAMBDO_*` environment variable)
//! are resolved once into immutable sub-configs grouped in
//! [`DispatcherConfig`], which is passed to constructors.

use clap::Args;
use lambdo_machines::{DEFAULT_API_BASE_URL, DEFAULT_ORG};
use thiserror::Error;
use tracing::warn;

/// Upper bound SQS accepts for messages per receive
pub const MAX_EVENTS_PER_MACHINE: i32 = 10;

/// Platform-provided variable used when `LAMBDO_FLY_APP` is unset
pub const FLY_APP_NAME_VAR: &str = "FLY_APP_NAME";
/// Platform-provided variable used when `LAMBDO_FLY_REGION` is unset
pub const FLY_REGION_VAR: &str = "FLY_REGION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{primary} or {fallback} must be set")]
    MissingEither {
        primary: &'static str,
        fallback: &'static str,
    },
}

/// Queue arguments
#[derive(Args, Debug, Clone)]
pub struct QueueArgs {
    /// SQS queue URL to consume
    #[arg(long, env = "LAMBDO_SQS_QUEUE_URL", global = true)]
    pub queue_url: Option<String>,

    /// Long-poll wait in seconds (0 disables long polling)
    #[arg(long, env = "LAMBDO_SQS_LONG_POLL_SECONDS", default_value_t = 10, global = true)]
    pub long_poll_seconds: u32,

    /// Visibility timeout in seconds for received messages
    #[arg(long, env = "LAMBDO_SQS_VISIBILITY_TIMEOUT", default_value_t = 30, global = true)]
    pub visibility_timeout: u32,

    /// Maximum messages per receive, clamped to 1..=10
    #[arg(
        long,
        env = "LAMBDO_EVENTS_PER_MACHINE",
        default_value_t = 5,
        allow_negative_numbers = true,
        global = true
    )]
    pub events_per_machine: i32,
}

/// Fly Machines arguments
#[derive(Args, Debug, Clone)]
pub struct FlyArgs {
    /// Machines API token
    #[arg(long, env = "LAMBDO_FLY_TOKEN", hide_env_values = true, global = true)]
    pub fly_token: Option<String>,

    /// App that machines are created in (falls back to FLY_APP_NAME)
    #[arg(long, env = "LAMBDO_FLY_APP", global = true)]
    pub fly_app: Option<String>,

    /// Primary region (falls back to FLY_REGION)
    #[arg(long, env = "LAMBDO_FLY_REGION", global = true)]
    pub fly_region: Option<String>,

    /// Comma-separated regions tried after the primary one
    #[arg(
        long,
        env = "LAMBDO_FLY_FALLBACK_REGIONS",
        value_delimiter = ',',
        default_values = ["bos", "dfw", "den", "mia"],
        global = true
    )]
    pub fly_fallback_regions: Vec<String>,

    /// Organization slug used when creating the app
    #[arg(long, env = "LAMBDO_FLY_ORG", default_value = DEFAULT_ORG, global = true)]
    pub fly_org: String,

    /// Machines API base URL
    #[arg(long, env = "LAMBDO_FLY_API_URL", default_value = DEFAULT_API_BASE_URL, global = true)]
    pub fly_api_url: String,
}

/// Queue consumption settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_url: String,
    pub long_poll_seconds: u32,
    pub visibility_timeout: u32,
    /// Messages per receive, always within 1..=10
    pub max_messages: u32,
}

/// Machines API access
#[derive(Clone, PartialEq, Eq)]
pub struct FlyConfig {
    pub api_url: String,
    pub token: String,
    pub app: String,
    pub org: String,
    /// Primary region followed by the fallbacks, without duplicates
    pub regions: Vec<String>,
}

impl std::fmt::Debug for FlyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("app", &self.app)
            .field("org", &self.org)
            .field("regions", &self.regions)
            .finish()
    }
}

/// Everything the consumer needs, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub queue: QueueConfig,
    pub fly: FlyConfig,
}

impl DispatcherConfig {
    /// Resolve from parsed arguments, reading platform fallbacks from the
    /// process environment.
    pub fn resolve(queue: &QueueArgs, fly: &FlyArgs) -> Result<Self, ConfigError> {
        Self::resolve_with(queue, fly, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit lookup for the platform fallback variables.
    pub fn resolve_with(
        queue: &QueueArgs,
        fly: &FlyArgs,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let fly_config = fly.resolve_with(&lookup)?;
        if fly_config.regions.is_empty() {
            return Err(ConfigError::MissingEither {
                primary: "LAMBDO_FLY_REGION",
                fallback: FLY_REGION_VAR,
            });
        }
        Ok(Self {
            queue: queue.resolve()?,
            fly: fly_config,
        })
    }
}

impl QueueArgs {
    pub fn resolve(&self) -> Result<QueueConfig, ConfigError> {
        let queue_url = non_empty(self.queue_url.as_deref()).ok_or(ConfigError::Missing {
            name: "LAMBDO_SQS_QUEUE_URL",
        })?;

        Ok(QueueConfig {
            queue_url,
            long_poll_seconds: self.long_poll_seconds,
            visibility_timeout: self.visibility_timeout,
            max_messages: clamp_events_per_machine(self.events_per_machine),
        })
    }
}

impl FlyArgs {
    /// Resolve API access. The primary region is optional here; operator
    /// commands do not need one, the consumer checks for it.
    pub fn resolve(&self) -> Result<FlyConfig, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<FlyConfig, ConfigError> {
        let token = non_empty(self.fly_token.as_deref()).ok_or(ConfigError::Missing {
            name: "LAMBDO_FLY_TOKEN",
        })?;

        let app = non_empty(self.fly_app.as_deref())
            .or_else(|| non_empty(lookup(FLY_APP_NAME_VAR).as_deref()))
            .ok_or(ConfigError::MissingEither {
                primary: "LAMBDO_FLY_APP",
                fallback: FLY_APP_NAME_VAR,
            })?;

        let primary = non_empty(self.fly_region.as_deref())
            .or_else(|| non_empty(lookup(FLY_REGION_VAR).as_deref()));

        let regions = match primary {
            Some(primary) => region_priority(&primary, &self.fly_fallback_regions),
            None => Vec::new(),
        };

        Ok(FlyConfig {
            api_url: self.fly_api_url.clone(),
            token,
            app,
            org: self.fly_org.clone(),
            regions,
        })
    }
}

/// Primary region first, then fallbacks in order, skipping blanks and repeats.
pub fn region_priority(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut regions: Vec<String> = Vec::with_capacity(fallbacks.len() + 1);
    for region in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        let region = region.trim();
        if !region.is_empty() && !regions.iter().any(|r| r == region) {
            regions.push(region.to_string());
        }
    }
    regions
}

fn clamp_events_per_machine(requested: i32) -> u32 {
    let clamped = requested.clamp(1, MAX_EVENTS_PER_MACHINE);
    if clamped != requested {
        warn!(
            requested,
            using = clamped,
            "LAMBDO_EVENTS_PER_MACHINE out of range"
        );
    }
    clamped.unsigned_abs()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
