/// Relay API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Secret used to verify user tokens. Minimum 32 characters.
    pub jwt_secret: String,
    /// Secret used to verify signed cookies. Falls back to `jwt_secret`.
    pub cookie_secret: String,
    /// Shared secret expected in webhook publish bodies.
    pub webhook_token: String,
    /// Redis connection settings. `None` runs the service without a bus or
    /// durable store (degraded single-instance mode).
    pub redis: Option<RedisConfig>,
    /// Allowed CORS origins. Mandatory in production.
    pub cors_origins: Vec<String>,
    /// VAPID key pair for Web Push. Push delivery is disabled when absent.
    pub vapid: Option<VapidConfig>,
    /// Telegram relay credentials. The relay is disabled when absent.
    pub telegram: Option<TelegramConfig>,
    /// True when `NODE_ENV=production`.
    pub production: bool,
    /// Grace period between socket accept and successful authenticate.
    pub auth_grace: std::time::Duration,
}

/// Default authentication grace period.
pub const AUTH_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

/// How to reach Redis.
#[derive(Debug, Clone)]
pub enum RedisConfig {
    Standalone {
        host: String,
        port: u16,
        password: Option<String>,
    },
    /// High-availability discovery: ask a Sentinel for the current primary.
    Sentinel {
        host: String,
        port: u16,
        service_name: String,
        password: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing
    /// or malformed. These are the only fatal conditions in the service.
    pub fn from_env() -> Self {
        let production = std::env::var("NODE_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let jwt_secret = required_var("JWT_SECRET");
        if jwt_secret.len() < 32 {
            panic!("JWT_SECRET must be at least 32 characters");
        }

        let cookie_secret = std::env::var("COOKIE_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| jwt_secret.clone());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGIN")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if production && cors_origins.is_empty() {
            panic!("CORS_ORIGIN is required in production");
        }

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            jwt_secret,
            cookie_secret,
            webhook_token: required_var("WEBHOOK_TOKEN"),
            redis: redis_from_env(),
            cors_origins,
            vapid: vapid_from_env(),
            telegram: telegram_from_env(),
            production,
            auth_grace: AUTH_GRACE,
        }
    }
}

fn redis_from_env() -> Option<RedisConfig> {
    let mode = std::env::var("REDIS_MODE").unwrap_or_else(|_| "standalone".to_string());
    let password = std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty());

    if mode == "sentinel" {
        let host = std::env::var("REDIS_SENTINEL_HOST").ok()?;
        Some(RedisConfig::Sentinel {
            host,
            port: std::env::var("REDIS_SENTINEL_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(26379),
            service_name: std::env::var("REDIS_SENTINEL_NAME")
                .unwrap_or_else(|_| "mymaster".to_string()),
            password,
        })
    } else {
        let host = std::env::var("REDIS_HOST").ok()?;
        Some(RedisConfig::Standalone {
            host,
            port: std::env::var("REDIS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6379),
            password,
        })
    }
}

fn vapid_from_env() -> Option<VapidConfig> {
    let public_key = std::env::var("VAPID_PUBLIC_KEY").ok().filter(|s| !s.is_empty())?;
    let private_key = std::env::var("VAPID_PRIVATE_KEY").ok().filter(|s| !s.is_empty())?;
    Some(VapidConfig {
        public_key,
        private_key,
        subject: std::env::var("VAPID_SUBJECT")
            .unwrap_or_else(|_| "mailto:ops@example.com".to_string()),
    })
}

fn telegram_from_env() -> Option<TelegramConfig> {
    let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty())?;
    let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty())?;
    Some(TelegramConfig { bot_token, chat_id })
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
