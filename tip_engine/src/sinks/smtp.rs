//! Tip notifications delivered straight to an SMTP server
//!
//! With `ssl` set the connection is TLS from the first byte (usually port 465). Otherwise the notifier upgrades with
//! STARTTLS when the server offers it and falls back to plain text when it does not.
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport,
    AsyncTransport,
    Message,
    Tokio1Executor,
};
use log::*;
use tip_common::{Satoshis, Secret};

use crate::{
    events::SettlementEvent,
    sinks::{
        mail::{mail_body, MailConfig, MAIL_SUBJECT},
        SettlementSink,
        SinkError,
    },
};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Default)]
pub struct SmtpConfig {
    /// `host:port` of the SMTP server
    pub server: String,
    /// Use implicit TLS rather than STARTTLS
    pub ssl: bool,
    /// Authenticate with these credentials when set
    pub user: Option<String>,
    pub password: Secret<String>,
}

impl SmtpConfig {
    pub fn new(server: &str) -> Self {
        Self { server: server.to_string(), ..Default::default() }
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_credentials(mut self, user: &str, password: Secret<String>) -> Self {
        self.user = Some(user.to_string());
        self.password = password;
        self
    }

    /// Splits `server` into host and port.
    pub fn host_and_port(&self) -> Result<(String, u16), SinkError> {
        let (host, port) = self
            .server
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| SinkError::Configuration(format!("SMTP server '{}' has no port", self.server)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(SinkError::Configuration(format!("SMTP server '{}' has no host", self.server)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| SinkError::Configuration(format!("Invalid port in SMTP server '{}'. {e}", self.server)))?;
        Ok((host.to_string(), port))
    }
}

pub struct SmtpNotifier {
    from: Mailbox,
    to: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    /// Validates the addresses and the server settings. Nothing is sent until the first settlement.
    ///
    /// Mail is sent from the recipient's own address when no sender is configured.
    pub fn new(mail: &MailConfig, smtp: &SmtpConfig) -> Result<Self, SinkError> {
        let to = parse_mailbox(&mail.recipient)?;
        let from = match &mail.sender {
            Some(sender) => parse_mailbox(sender)?,
            None => to.clone(),
        };
        let (host, port) = smtp.host_and_port()?;
        let tls = TlsParameters::new(host.clone())
            .map_err(|e| SinkError::Configuration(format!("Could not set up TLS for {host}. {e}")))?;
        let tls = if smtp.ssl { Tls::Wrapper(tls) } else { Tls::Opportunistic(tls) };
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host.as_str())
            .port(port)
            .tls(tls)
            .timeout(Some(SMTP_TIMEOUT));
        if let Some(user) = &smtp.user {
            builder = builder.credentials(Credentials::new(user.clone(), smtp.password.reveal().clone()));
        }
        debug!("✉️ Tip notifications will go through SMTP server {host}:{port} (ssl: {})", smtp.ssl);
        Ok(Self { from, to, transport: builder.build() })
    }

    pub fn build_message(&self, amount: Satoshis, message: Option<&str>) -> Result<Message, SinkError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(MAIL_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(mail_body(amount, message))
            .map_err(|e| SinkError::Notification(format!("Could not build the notification mail. {e}")))
    }

    pub async fn send_mail(&self, amount: Satoshis, message: Option<&str>) -> Result<(), SinkError> {
        let mail = self.build_message(amount, message)?;
        self.transport.send(mail).await.map_err(|e| SinkError::Notification(e.to_string()))?;
        debug!("✉️ Sent tip notification to {} over SMTP", self.to);
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SinkError> {
    address.parse::<Mailbox>().map_err(|e| SinkError::Configuration(format!("Invalid mail address '{address}'. {e}")))
}

#[async_trait]
impl SettlementSink for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn accept(&self, event: &SettlementEvent) -> Result<(), SinkError> {
        self.send_mail(event.amount, event.message.as_deref()).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn notifier(sender: Option<&str>, server: &str) -> Result<SmtpNotifier, SinkError> {
        let mut mail = MailConfig::new("me@example.com");
        if let Some(sender) = sender {
            mail = mail.with_sender(sender);
        }
        SmtpNotifier::new(&mail, &SmtpConfig::new(server))
    }

    #[test]
    fn message_carries_headers_and_body() {
        let notifier = notifier(Some("tips@example.com"), "smtp.example.com:587").unwrap();
        let mail = notifier.build_message(Satoshis::from(21), Some("thanks!")).unwrap();
        let raw = String::from_utf8(mail.formatted()).unwrap();
        assert!(raw.contains("Subject: You received a tip\r\n"));
        assert!(raw.contains("From: tips@example.com\r\n"));
        assert!(raw.contains("To: me@example.com\r\n"));
        assert!(raw.contains("Content-Type: text/plain"));
        assert!(raw.contains("You received a tip of 21 satoshis with the message \"thanks!\""));
    }

    #[test]
    fn recipient_doubles_as_sender() {
        let notifier = notifier(None, "smtp.example.com:25").unwrap();
        let raw = String::from_utf8(notifier.build_message(Satoshis::from(5), None).unwrap().formatted()).unwrap();
        assert!(raw.contains("From: me@example.com\r\n"));
        assert!(raw.contains("You received a tip of 5 satoshis"));
    }

    #[test]
    fn server_needs_host_and_port() {
        assert_eq!(SmtpConfig::new("smtp.example.com:587").host_and_port().unwrap(), ("smtp.example.com".into(), 587));
        assert_eq!(SmtpConfig::new("[::1]:25").host_and_port().unwrap(), ("::1".into(), 25));
        for server in ["smtp.example.com", "smtp.example.com:smtp", ":25", "smtp.example.com:70000"] {
            assert!(matches!(SmtpConfig::new(server).host_and_port(), Err(SinkError::Configuration(_))), "{server}");
        }
        assert!(matches!(notifier(Some("not an address"), "smtp.example.com:25"), Err(SinkError::Configuration(_))));
    }

    #[test]
    fn password_stays_hidden() {
        let config = SmtpConfig::new("smtp.example.com:465")
            .with_ssl(true)
            .with_credentials("tips", Secret::new("hunter2".to_string()));
        let shown = format!("{config:?}");
        assert!(shown.contains("tips"));
        assert!(!shown.contains("hunter2"));
    }

    #[tokio::test]
    async fn unreachable_server_is_reported() {
        let notifier = notifier(None, "127.0.0.1:1").unwrap();
        let err = notifier.send_mail(Satoshis::from(1), None).await.unwrap_err();
        assert!(matches!(err, SinkError::Notification(_)));
    }
}
