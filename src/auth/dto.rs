use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token type used to distinguish Access and Refresh JWTs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Standard JWT claims used in the app.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,        // user ID
    pub exp: usize,      // expiration time
    pub iat: usize,      // issued at
    pub iss: String,     // issuer
    pub aud: String,     // audience
    pub kind: TokenKind, // access or refresh
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Request body for user registration. The challenge response is required
/// from the very first attempt, unlike login.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub password_again: String,
    pub challenge_response: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Only consulted once the step-up threshold is reached.
    pub challenge_response: Option<String>,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
    pub password_again: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub password: String,
    pub password_again: String,
}

/// Response returned after a successful login or token refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
    /// Where the client should navigate next after a login (the page
    /// visited beforehand, or the home page). Absent on refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub nickname: Option<String>,
    pub confirmed: bool,
}

/// Generic success notice.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returned by the reset-link validity probe; the email is masked.
#[derive(Debug, Serialize)]
pub struct ResetTokenInfo {
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_serializes_expected_fields() {
        let user = PublicUser {
            id: 7,
            email: "test@example.com".into(),
            nickname: None,
            confirmed: true,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("\"confirmed\":true"));
    }

    #[test]
    fn refresh_response_omits_redirect() {
        let response = AuthResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            user: PublicUser {
                id: 7,
                email: "test@example.com".into(),
                nickname: None,
                confirmed: true,
            },
            redirect_to: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("redirect_to"));

        let response = AuthResponse {
            redirect_to: Some("/articles/42".into()),
            ..response
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"redirect_to\":\"/articles/42\""));
    }

    #[test]
    fn login_request_challenge_is_optional() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b.com","password":"secret1"}"#).unwrap();
        assert!(req.challenge_response.is_none());
    }
}
