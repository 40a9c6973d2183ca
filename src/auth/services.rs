pub(crate) use crate::auth::dto::{Claims, JwtKeys, TokenKind};
use crate::challenge::ChallengeVerifier;
use crate::config::JwtConfig;
use crate::error::{ApiError, FieldError};
use crate::state::AppState;
use crate::throttle::ThrottleLedger;
use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Random single-use token for confirmation links and password resets.
pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(60)
        .map(char::from)
        .collect()
}

/// Masks an email for logs and reset-probe responses: `alice@x.com`
/// becomes `a***@x.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let head = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", head, domain)
        }
        None => "***".to_string(),
    }
}

/// Minimum password length for registration and resets.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Shared shape check for "choose a password" forms.
pub fn validate_new_password(password: &str, password_again: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if password.len() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new("password", "password is too short"));
    }
    if password != password_again {
        errors.push(FieldError::new("password_again", "passwords do not match"));
    }
    errors
}

/// Gate run before every credential check, in order: throttle block,
/// attempt accounting, step-up challenge. Returns the attempt count after
/// this call's increment.
///
/// The increment happens whether or not the credentials later verify, so
/// repeated bad passwords drive the challenge requirement and the block.
pub async fn gate_login_attempt(
    throttle: &ThrottleLedger,
    verifier: Option<&dyn ChallengeVerifier>,
    enforced: bool,
    key: &str,
    challenge_response: Option<&str>,
    ip: &str,
) -> Result<u32, ApiError> {
    if throttle.is_blocked(key).await {
        let retry_after_secs = throttle.retry_after(key).await.as_secs().max(1);
        return Err(ApiError::Throttled { retry_after_secs });
    }

    let attempts = throttle.record_attempt(key).await;
    let prior_attempts = attempts.saturating_sub(1);

    if enforced && prior_attempts >= throttle.config().step_up_threshold {
        let verifier =
            verifier.ok_or_else(|| anyhow::anyhow!("challenge enforced without a verifier"))?;
        let token = challenge_response
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::ChallengeFailed)?;
        if !verifier.verify(token, ip).await?.passed() {
            return Err(ApiError::ChallengeFailed);
        }
    }

    Ok(attempts)
}

/// Registration challenge: the response must be present from the first
/// attempt; it is verified against the service only when enforcement is on.
pub async fn require_registration_challenge(
    verifier: Option<&dyn ChallengeVerifier>,
    enforced: bool,
    challenge_response: Option<&str>,
    ip: &str,
) -> Result<(), ApiError> {
    let token = challenge_response.filter(|t| !t.is_empty()).ok_or_else(|| {
        ApiError::Validation(vec![FieldError::new(
            "challenge_response",
            "challenge response is required",
        )])
    })?;
    if enforced {
        let verifier =
            verifier.ok_or_else(|| anyhow::anyhow!("challenge enforced without a verifier"))?;
        if !verifier.verify(token, ip).await?.passed() {
            return Err(ApiError::ChallengeFailed);
        }
    }
    Ok(())
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs((ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_minutes as u64) * 60),
        }
    }
}

impl JwtKeys {
    fn sign_with_kind(&self, user_id: i64, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: i64) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Access)
    }

    pub fn sign_refresh(&self, user_id: i64) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Refresh)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("user.name+tag@sub.domain.org"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("nodomain"));
        assert!(!is_valid_email("spaces in@x.com"));
        assert!(!is_valid_email("a@nodot"));
    }

    #[test]
    fn random_tokens_are_long_and_distinct() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 60);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn mask_email_keeps_only_first_char_and_domain() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[test]
    fn new_password_rules() {
        assert!(validate_new_password("secret1", "secret1").is_empty());
        let errors = validate_new_password("short", "different");
        assert_eq!(errors.len(), 2);
    }
}


#[cfg(test)]
mod jwt_tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        let state = AppState::fake();
        JwtKeys::from_ref(&state)
    }

    #[tokio::test]
    async fn sign_and_verify_access_token() {
        let keys = make_keys();
        let token = keys.sign_access(42).expect("sign access");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[tokio::test]
    async fn verify_refresh_rejects_access_token() {
        let keys = make_keys();
        let token = keys.sign_access(42).expect("sign access");
        let err = keys.verify_refresh(&token).unwrap_err();
        assert!(err.to_string().contains("not a refresh token"));
    }

    #[tokio::test]
    async fn tampered_token_fails_verification() {
        let keys = make_keys();
        let mut token = keys.sign_access(42).expect("sign access");
        token.push('x');
        assert!(keys.verify(&token).is_err());
    }
}
