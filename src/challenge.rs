//! Step-up human-verification challenge (reCAPTCHA-style).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ChallengeConfig;

/// Typed verification result. Anything that is not an explicit success from
/// the verification service is a failure with a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Passed,
    Failed(String),
}

impl ChallengeOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ChallengeOutcome::Passed)
    }
}

#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    /// Validates a client-supplied challenge response token.
    async fn verify(&self, response_token: &str, client_ip: &str) -> anyhow::Result<ChallengeOutcome>;
}

/// Shape of the verification service's JSON reply.
#[derive(Debug, Deserialize)]
struct VerifyReply {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

/// Calls the remote siteverify endpoint over HTTPS.
pub struct RecaptchaVerifier {
    http: reqwest::Client,
    verify_url: String,
    secret: String,
}

impl RecaptchaVerifier {
    pub fn new(config: &ChallengeConfig, secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            verify_url: config.verify_url.clone(),
            secret,
        }
    }

    fn outcome_from_reply(reply: VerifyReply) -> ChallengeOutcome {
        if reply.success {
            ChallengeOutcome::Passed
        } else if reply.error_codes.is_empty() {
            ChallengeOutcome::Failed("verification service rejected the response".into())
        } else {
            ChallengeOutcome::Failed(reply.error_codes.join(", "))
        }
    }
}

#[async_trait]
impl ChallengeVerifier for RecaptchaVerifier {
    async fn verify(&self, response_token: &str, client_ip: &str) -> anyhow::Result<ChallengeOutcome> {
        let reply: VerifyReply = self
            .http
            .post(&self.verify_url)
            .form(&[
                ("secret", self.secret.as_str()),
                ("response", response_token),
                ("remoteip", client_ip),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let outcome = Self::outcome_from_reply(reply);
        match &outcome {
            ChallengeOutcome::Passed => info!(ip = %client_ip, "challenge passed"),
            ChallengeOutcome::Failed(reason) => {
                warn!(ip = %client_ip, reason = %reason, "challenge failed")
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_reply_maps_to_passed() {
        let reply: VerifyReply = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(RecaptchaVerifier::outcome_from_reply(reply).passed());
    }

    #[test]
    fn failure_reply_carries_error_codes() {
        let reply: VerifyReply = serde_json::from_str(
            r#"{"success": false, "error-codes": ["timeout-or-duplicate"]}"#,
        )
        .unwrap();
        match RecaptchaVerifier::outcome_from_reply(reply) {
            ChallengeOutcome::Failed(reason) => assert!(reason.contains("timeout-or-duplicate")),
            ChallengeOutcome::Passed => panic!("expected failure"),
        }
    }

    #[test]
    fn failure_reply_without_codes_still_fails() {
        let reply: VerifyReply = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!RecaptchaVerifier::outcome_from_reply(reply).passed());
    }
}
