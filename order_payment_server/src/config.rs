use std::{env, fmt::Display, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use opg_common::{parse_boolean_flag, Amount, Secret};
use order_payment_engine::EngineConfig;
use rand::{distributions::Alphanumeric, thread_rng, Rng};

const DEFAULT_OPG_HOST: &str = "127.0.0.1";
const DEFAULT_OPG_PORT: u16 = 8370;
const DEFAULT_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(300);
const DEFAULT_DISPATCH_INTERVAL: StdDuration = StdDuration::from_secs(10);
const DEFAULT_MAX_CONNECTIONS: u32 = 25;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address.
    pub use_forwarded: bool,
    pub gateway: GatewayConfig,
    /// Requests against `/api` must carry this key in the `opg_admin_key` header.
    pub admin_api_key: Secret<String>,
    /// How often the reconciliation sweeper runs.
    pub sweep_interval: StdDuration,
    /// How often the notification dispatcher polls for due events.
    pub dispatch_interval: StdDuration,
    pub engine: EngineConfig,
}

#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    /// The shared secret the payment gateway signs its webhooks with.
    pub hmac_secret: Secret<String>,
    /// Only set this to false in development. Unsigned webhooks will then be accepted as genuine.
    pub hmac_checks: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OPG_HOST.to_string(),
            port: DEFAULT_OPG_PORT,
            database_url: String::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            use_x_forwarded_for: false,
            use_forwarded: false,
            gateway: GatewayConfig { hmac_secret: Secret::default(), hmac_checks: true },
            admin_api_key: Secret::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("OPG_HOST").ok().unwrap_or_else(|| DEFAULT_OPG_HOST.into());
        let port = parse_env("OPG_PORT", DEFAULT_OPG_PORT);
        let database_url = env::var("OPG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ OPG_DATABASE_URL is not set. Please set it to the URL for the order payment database.");
            String::default()
        });
        let max_connections = parse_env("OPG_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let use_x_forwarded_for = parse_boolean_flag(env::var("OPG_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("OPG_USE_FORWARDED").ok(), false);
        let gateway = GatewayConfig::from_env_or_defaults();
        let admin_api_key = configure_admin_key();
        let sweep_interval = StdDuration::from_secs(parse_env("OPG_SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL.as_secs()));
        let dispatch_interval =
            StdDuration::from_secs(parse_env("OPG_DISPATCH_INTERVAL", DEFAULT_DISPATCH_INTERVAL.as_secs()));
        let engine = engine_config_from_env();
        Self {
            host,
            port,
            database_url,
            max_connections,
            use_x_forwarded_for,
            use_forwarded,
            gateway,
            admin_api_key,
            sweep_interval,
            dispatch_interval,
            engine,
        }
    }
}

impl GatewayConfig {
    pub fn from_env_or_defaults() -> Self {
        let hmac_secret = env::var("OPG_GATEWAY_HMAC_SECRET").ok().unwrap_or_else(|| {
            error!(
                "🪛️ OPG_GATEWAY_HMAC_SECRET is not set. Please set it to the webhook signing secret of your payment \
                 gateway."
            );
            String::default()
        });
        let hmac_checks = parse_boolean_flag(env::var("OPG_GATEWAY_HMAC_CHECKS").ok(), true);
        if !hmac_checks {
            warn!("🚨️ Gateway webhook signatures are NOT being checked. Never run production like this. 🚨️");
        }
        Self { hmac_secret: Secret::new(hmac_secret), hmac_checks }
    }
}

fn configure_admin_key() -> Secret<String> {
    match env::var("OPG_ADMIN_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Secret::new(key.trim().to_string()),
        _ => {
            let key = thread_rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect::<String>();
            warn!(
                "🚨️🚨️🚨️ OPG_ADMIN_API_KEY has not been set. I'm using a random value for this session, so the admin \
                 API is effectively locked. Set OPG_ADMIN_API_KEY to use it. 🚨️🚨️🚨️"
            );
            Secret::new(key)
        },
    }
}

fn engine_config_from_env() -> EngineConfig {
    let defaults = EngineConfig::default();
    EngineConfig {
        amount_tolerance: Amount::from(parse_env("OPG_AMOUNT_TOLERANCE", defaults.amount_tolerance.value())),
        queued_timeout: Duration::seconds(parse_env("OPG_QUEUED_TIMEOUT", defaults.queued_timeout.num_seconds())),
        processing_timeout: Duration::seconds(parse_env(
            "OPG_PROCESSING_TIMEOUT",
            defaults.processing_timeout.num_seconds(),
        )),
        dispatch_batch_size: parse_env("OPG_DISPATCH_BATCH_SIZE", defaults.dispatch_batch_size),
        max_notification_retries: parse_env("OPG_MAX_NOTIFICATION_RETRIES", defaults.max_notification_retries),
        rate_limit_window: Duration::seconds(parse_env(
            "OPG_RATE_LIMIT_WINDOW",
            defaults.rate_limit_window.num_seconds(),
        )),
        rate_limit_max: parse_env("OPG_RATE_LIMIT_MAX", defaults.rate_limit_max),
        ..defaults
    }
}

/// Reads `name` from the environment, falling back to `default` (with a log message) if it is missing or invalid.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// A subset of the server configuration that is used to configure the server's behaviour. Generally we try to keep this
/// as small as possible, and exclude secrets to avoid passing sensitive information around the system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServerOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self { use_x_forwarded_for: config.use_x_forwarded_for, use_forwarded: config.use_forwarded }
    }
}
