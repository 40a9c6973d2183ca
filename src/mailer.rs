//! Outbound email through an HTTP relay.
//!
//! Delivery is awaited inside the request so callers can roll back on
//! failure (registration deletes the just-created account when the
//! confirmation mail bounces at the relay).

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::config::MailConfig;

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;
}

/// POSTs messages as JSON to the configured relay endpoint.
pub struct HttpMailer {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        let resp = self.http.post(&self.endpoint).json(&message).send().await?;
        if let Err(e) = resp.error_for_status_ref() {
            error!(status = %resp.status(), "mail relay rejected message");
            return Err(e.into());
        }
        info!("mail accepted by relay");
        Ok(())
    }
}

/// Builds the account-confirmation message. `nickname` falls back to the
/// email local part when the user has not set one.
pub fn confirmation_message(config: &MailConfig, to: &str, nickname: &str, token: &str) -> OutboundMessage {
    let link = format!("{}/api/v1/auth/confirm/{}", config.base_url, token);
    OutboundMessage {
        to: to.into(),
        from: config.from_address.clone(),
        subject: format!("[{}] Confirm your email address", config.site_name),
        body: format!(
            "Hi {},\n\nFollow this link to activate your account:\n{}\n\n\
             Only the most recently sent link is valid.",
            nickname, link
        ),
    }
}

/// Builds the password-reset message.
pub fn reset_message(config: &MailConfig, to: &str, token: &str) -> OutboundMessage {
    let link = format!("{}/api/v1/auth/reset-password/{}", config.base_url, token);
    OutboundMessage {
        to: to.into(),
        from: config.from_address.clone(),
        subject: format!("[{}] Reset your password", config.site_name),
        body: format!("Follow this link to choose a new password:\n{}", link),
    }
}
