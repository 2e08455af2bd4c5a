//! Mail notifications for received tips
//!
//! [`MailNotifier`] pipes a short message into the system `mail` command, which builds and delivers the mail. When an
//! SMTP server is configured, [`crate::sinks::smtp::SmtpNotifier`] talks to it directly instead.
use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use log::*;
use tip_common::Satoshis;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    events::SettlementEvent,
    sinks::{smtp::SmtpConfig, SettlementSink, SinkError},
};

pub const DEFAULT_MAIL_COMMAND: &str = "/usr/bin/mail";
pub const MAIL_SUBJECT: &str = "You received a tip";

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub recipient: String,
    /// Added as a `From:` header when set
    pub sender: Option<String>,
    pub command: PathBuf,
    /// Deliver through this SMTP server rather than the mail command
    pub smtp: Option<SmtpConfig>,
}

impl MailConfig {
    pub fn new(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            sender: None,
            command: PathBuf::from(DEFAULT_MAIL_COMMAND),
            smtp: None,
        }
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    pub fn with_command<P: Into<PathBuf>>(mut self, command: P) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_smtp(mut self, smtp: SmtpConfig) -> Self {
        self.smtp = Some(smtp);
        self
    }
}

pub struct MailNotifier {
    config: MailConfig,
}

impl MailNotifier {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    fn command_args(&self) -> Vec<String> {
        let mut args = vec!["-s".to_string(), MAIL_SUBJECT.to_string()];
        if let Some(sender) = &self.config.sender {
            args.push("-a".into());
            args.push(format!("From: {sender}"));
        }
        args.push(self.config.recipient.clone());
        args
    }

    pub async fn send_mail(&self, amount: Satoshis, message: Option<&str>) -> Result<(), SinkError> {
        let body = mail_body(amount, message);
        let mut child = Command::new(&self.config.command)
            .args(self.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SinkError::Notification(format!("Could not run {}: {e}", self.config.command.display())))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SinkError::Notification("The mail command's stdin is not available".into()))?;
        stdin.write_all(body.as_bytes()).await.map_err(|e| SinkError::Notification(e.to_string()))?;
        // Closing stdin is what tells `mail` the body is complete
        drop(stdin);
        let output = child.wait_with_output().await.map_err(|e| SinkError::Notification(e.to_string()))?;
        if output.status.success() {
            debug!("✉️ Sent tip notification to {}", self.config.recipient);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SinkError::Notification(format!("{} exited with {}. {}", self.config.command.display(), output.status, stderr.trim())))
        }
    }
}

pub(super) fn mail_body(amount: Satoshis, message: Option<&str>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!("You received a tip of {} satoshis with the message \"{m}\"", amount.value()),
        _ => format!("You received a tip of {} satoshis", amount.value()),
    }
}

#[async_trait]
impl SettlementSink for MailNotifier {
    fn name(&self) -> &str {
        "mail"
    }

    async fn accept(&self, event: &SettlementEvent) -> Result<(), SinkError> {
        self.send_mail(event.amount, event.message.as_deref()).await
    }
}
