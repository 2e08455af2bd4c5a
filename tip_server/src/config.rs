use std::{env, path::PathBuf};

use log::*;
use tip_common::{parse_boolean_flag, Secret};
use tip_engine::{
    LndConfig,
    MailConfig,
    SmtpConfig,
    SupervisorConfig,
    DEFAULT_DATABASE_URL,
    DEFAULT_LND_REST_HOST,
    DEFAULT_MAIL_COMMAND,
};

const DEFAULT_TIP_EXPIRY: u64 = 3600;
const DEFAULT_RECONNECT_INTERVAL: u64 = 0;
const DEFAULT_KEEPALIVE_INTERVAL: u64 = 0;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Seconds until an unpaid invoice expires.
    pub tip_expiry: u64,
    /// Seconds between attempts to reconnect to the backend. Zero means losing the backend shuts the server down.
    pub reconnect_interval: u64,
    /// Seconds between keepalive requests to the backend. Zero disables keepalives.
    pub keepalive_interval: u64,
    /// Settled tips are recorded here.
    pub database_url: String,
    pub lnd: LndConfig,
    /// Mail notifications are only sent when a recipient is configured.
    pub mail: Option<MailConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tip_expiry: DEFAULT_TIP_EXPIRY,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            lnd: LndConfig::default(),
            mail: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        let tip_expiry = seconds_or_default("LT_TIP_EXPIRY", env::var("LT_TIP_EXPIRY").ok(), DEFAULT_TIP_EXPIRY);
        let tip_expiry = if tip_expiry == 0 {
            warn!("🪛️ LT_TIP_EXPIRY must be positive. Using the default, {DEFAULT_TIP_EXPIRY}s, instead.");
            DEFAULT_TIP_EXPIRY
        } else {
            tip_expiry
        };
        let reconnect_interval = seconds_or_default(
            "LT_RECONNECT_INTERVAL",
            env::var("LT_RECONNECT_INTERVAL").ok(),
            DEFAULT_RECONNECT_INTERVAL,
        );
        if reconnect_interval == 0 {
            info!("🪛️ Reconnecting is disabled. The server will stop if it loses the connection to LND.");
        }
        let keepalive_interval = seconds_or_default(
            "LT_KEEPALIVE_INTERVAL",
            env::var("LT_KEEPALIVE_INTERVAL").ok(),
            DEFAULT_KEEPALIVE_INTERVAL,
        );
        let database_url = env::var("LT_DATABASE_URL").ok().unwrap_or_else(|| {
            info!("🪛️ LT_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let lnd = lnd_config_from_env();
        let mail = mail_config_from_env();
        Self { tip_expiry, reconnect_interval, keepalive_interval, database_url, lnd, mail }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::from_secs(self.reconnect_interval, self.keepalive_interval)
    }
}

fn lnd_config_from_env() -> LndConfig {
    let rest_host = env::var("LT_LND_REST_HOST").ok().unwrap_or_else(|| DEFAULT_LND_REST_HOST.to_string());
    let cert_file = env::var("LT_LND_CERT_FILE").ok().map(PathBuf::from);
    let macaroon_file = env::var("LT_LND_MACAROON_FILE").ok().map(PathBuf::from);
    if macaroon_file.is_none() {
        warn!("🪛️ LT_LND_MACAROON_FILE is not set. This only works if LND runs with --no-macaroons.");
    }
    LndConfig { rest_host, cert_file, macaroon_file }
}

fn mail_config_from_env() -> Option<MailConfig> {
    let Some(recipient) = env::var("LT_MAIL_RECIPIENT").ok().filter(|s| !s.trim().is_empty()) else {
        info!("🪛️ LT_MAIL_RECIPIENT is not set. Mail notifications are disabled.");
        return None;
    };
    let mut config = MailConfig::new(recipient.trim());
    if let Some(sender) = env::var("LT_MAIL_SENDER").ok().filter(|s| !s.trim().is_empty()) {
        config = config.with_sender(sender.trim());
    }
    if let Some(smtp) = smtp_config_from_env() {
        info!("🪛️ Tip notifications will be mailed to {recipient} through {}", smtp.server);
        return Some(config.with_smtp(smtp));
    }
    let command = env::var("LT_MAIL_COMMAND").ok().unwrap_or_else(|| DEFAULT_MAIL_COMMAND.to_string());
    info!("🪛️ Tip notifications will be mailed to {recipient} using {command}");
    Some(config.with_command(command))
}

fn smtp_config_from_env() -> Option<SmtpConfig> {
    let server = env::var("LT_MAIL_SMTP_SERVER").ok().filter(|s| !s.trim().is_empty())?;
    let ssl = parse_boolean_flag(env::var("LT_MAIL_SMTP_SSL").ok(), false);
    let config = SmtpConfig::new(server.trim()).with_ssl(ssl);
    match env::var("LT_MAIL_SMTP_USER").ok().filter(|s| !s.trim().is_empty()) {
        Some(user) => {
            let password = env::var("LT_MAIL_SMTP_PASSWORD").ok().unwrap_or_default();
            if password.is_empty() {
                warn!("🪛️ LT_MAIL_SMTP_USER is set but LT_MAIL_SMTP_PASSWORD is not. Using an empty password.");
            }
            Some(config.with_credentials(user.trim(), Secret::new(password)))
        },
        None => Some(config),
    }
}

/// Parses a number of seconds, falling back to `default` (with a log message) when the value is missing or invalid.
fn seconds_or_default(name: &str, value: Option<String>, default: u64) -> u64 {
    match value {
        None => {
            debug!("🪛️ {name} is not set. Using the default value of {default}s.");
            default
        },
        Some(s) => s.trim().parse::<u64>().unwrap_or_else(|e| {
            warn!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}s, instead.");
            default
        }),
    }
}
