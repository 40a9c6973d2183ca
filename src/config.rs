use serde::Deserialize;

use crate::access::AccessRules;
use crate::throttle::ThrottleConfig;

/// Deployment mode. Challenge verification only runs in `Production`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// HTTP relay endpoint the mailer POSTs messages to.
    pub endpoint: String,
    pub from_address: String,
    pub site_name: String,
    /// Public base URL used to build confirmation/reset links.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    /// Shared secret for the verification service; unset disables enforcement.
    pub secret: Option<String>,
    pub verify_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    pub registration_open: bool,
    pub jwt: JwtConfig,
    pub throttle: ThrottleConfig,
    pub challenge: ChallengeConfig,
    pub mail: MailConfig,
    pub access_rules: AccessRules,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let environment = match std::env::var("APP_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };
        let registration_open = std::env::var("REGISTRATION_OPEN")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "accountd".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "accountd-users".into()),
            ttl_minutes: env_i64("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_i64("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let throttle = ThrottleConfig {
            max_attempts: env_i64("THROTTLE_MAX_ATTEMPTS", 5) as u32,
            window_secs: env_i64("THROTTLE_WINDOW_SECS", 600) as u64,
            step_up_threshold: env_i64("THROTTLE_STEP_UP_THRESHOLD", 3) as u32,
        };
        let challenge = ChallengeConfig {
            secret: std::env::var("CHALLENGE_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            verify_url: std::env::var("CHALLENGE_VERIFY_URL")
                .unwrap_or_else(|_| "https://www.google.com/recaptcha/api/siteverify".into()),
        };
        let mail = MailConfig {
            endpoint: std::env::var("MAIL_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8025/api/send".into()),
            from_address: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "no-reply@localhost".into()),
            site_name: std::env::var("SITE_NAME").unwrap_or_else(|_| "accountd".into()),
            base_url: std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into()),
        };
        let access_rules = match std::env::var("ACCESS_RULES") {
            Ok(json) => serde_json::from_str(&json)?,
            Err(_) => AccessRules::default(),
        };
        Ok(Self {
            database_url,
            environment,
            registration_open,
            jwt,
            throttle,
            challenge,
            mail,
            access_rules,
        })
    }

    /// Step-up and registration challenges are only verified in production
    /// with a configured secret. Everywhere else the check is bypassed.
    pub fn challenge_enforced(&self) -> bool {
        self.environment == Environment::Production && self.challenge.secret.is_some()
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(environment: Environment, secret: Option<&str>) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/test".into(),
            environment,
            registration_open: true,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            throttle: ThrottleConfig::default(),
            challenge: ChallengeConfig {
                secret: secret.map(Into::into),
                verify_url: "http://localhost/verify".into(),
            },
            mail: MailConfig {
                endpoint: "http://localhost/send".into(),
                from_address: "no-reply@test".into(),
                site_name: "test".into(),
                base_url: "http://localhost".into(),
            },
            access_rules: AccessRules::default(),
        }
    }

    #[test]
    fn challenge_enforced_only_in_production_with_secret() {
        assert!(base_config(Environment::Production, Some("s")).challenge_enforced());
        assert!(!base_config(Environment::Production, None).challenge_enforced());
        assert!(!base_config(Environment::Development, Some("s")).challenge_enforced());
        assert!(!base_config(Environment::Development, None).challenge_enforced());
    }
}
