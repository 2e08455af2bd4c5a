//! The server is configured through the environment alone. Any command line argument prints the settings it reads,
//! with their current values, and exits.
use std::env::{self, VarError};

/// A variable the server reads: its name, a description, and whether its value must never be printed.
struct Setting {
    name: &'static str,
    about: &'static str,
    secret: bool,
}

const fn setting(name: &'static str, about: &'static str) -> Setting {
    Setting { name, about, secret: false }
}

const SETTINGS: &[Setting] = &[
    setting("RUST_LOG", "Log level, e.g. `info` or `tip_engine=debug`"),
    setting("LT_TIP_EXPIRY", "Seconds until an unpaid invoice expires (default: 3600)"),
    setting(
        "LT_RECONNECT_INTERVAL",
        "Seconds between attempts to reconnect to LND. 0 (the default) stops the server with a non-zero exit status as \
         soon as LND is unreachable or the settlement stream ends.",
    ),
    setting("LT_KEEPALIVE_INTERVAL", "Seconds between keepalive requests to LND. 0 (the default) disables keepalives."),
    setting("LT_DATABASE_URL", "sqlite database for settled tips (default: sqlite://data/tips.db)"),
    setting("LT_LND_REST_HOST", "LND REST endpoint (default: https://localhost:8080)"),
    setting("LT_LND_CERT_FILE", "LND's TLS certificate (tls.cert), when it is self-signed"),
    setting("LT_LND_MACAROON_FILE", "Macaroon used to authenticate with LND (invoice.macaroon is sufficient)"),
    setting("LT_MAIL_RECIPIENT", "Mail a notification for every tip to this address. Unset disables notifications."),
    setting("LT_MAIL_SENDER", "Optional From: address for notifications"),
    setting("LT_MAIL_COMMAND", "The mail command to use when no SMTP server is set (default: /usr/bin/mail)"),
    setting("LT_MAIL_SMTP_SERVER", "Send notifications through this SMTP server (host:port) instead of the command"),
    setting("LT_MAIL_SMTP_SSL", "Connect to the SMTP server over TLS rather than STARTTLS (default: false)"),
    setting("LT_MAIL_SMTP_USER", "User for authenticating with the SMTP server"),
    Setting { name: "LT_MAIL_SMTP_PASSWORD", about: "Password for authenticating with the SMTP server", secret: true },
];

/// Returns true, after printing the help text, when any argument was given.
pub fn handle_command_line_args() -> bool {
    if env::args().len() <= 1 {
        return false;
    }
    println!("{}", help_text());
    true
}

fn help_text() -> String {
    let mut text = format!("\n{}\nSettings:\n", include_str!("./cli-help.txt").trim_end());
    for s in SETTINGS {
        text.push_str(&format!("  {:<24} {}\n", s.name, s.about));
    }
    text.push_str("\nCurrent values:\n");
    for s in SETTINGS {
        text.push_str(&format!("  {:<24} {}\n", s.name, current_value(s, env::var(s.name))));
    }
    text
}

fn current_value(setting: &Setting, value: Result<String, VarError>) -> String {
    match value {
        Err(VarError::NotPresent) => "Not set".into(),
        Ok(_) if setting.secret => "****".into(),
        Ok(s) => s,
        Err(VarError::NotUnicode(_)) if setting.secret => "****".into(),
        Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
    }
}
