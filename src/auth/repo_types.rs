use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub nickname: Option<String>,
    pub debug: bool,
    #[serde(skip_serializing)]
    pub confirm_code: String, // blanked once the email is confirmed
    pub confirm_at: Option<OffsetDateTime>,
    pub register_ip: String,
    pub register_at: OffsetDateTime,
    pub lastlogin_ip: Option<String>,
    pub lastlogin_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl User {
    /// Confirmed accounts have a timestamp set and the code blanked.
    pub fn is_confirmed(&self) -> bool {
        self.confirm_at.is_some()
    }

    /// Nickname, or the email local part when unset.
    pub fn display_name(&self) -> &str {
        match self.nickname.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}

/// Live password-reset token. At most one row per email.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordReset {
    pub email: String,
    pub token: String,
    pub created_at: OffsetDateTime,
}

/// Named permission group.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn user(nickname: Option<&str>, confirm_at: Option<OffsetDateTime>) -> User {
        User {
            id: 1,
            email: "alice@example.com".into(),
            password_hash: "x".into(),
            nickname: nickname.map(Into::into),
            debug: false,
            confirm_code: String::new(),
            confirm_at,
            register_ip: "127.0.0.1".into(),
            register_at: datetime!(2024-01-01 00:00 UTC),
            lastlogin_ip: None,
            lastlogin_at: None,
            created_at: datetime!(2024-01-01 00:00 UTC),
        }
    }

    #[test]
    fn confirmation_state_follows_timestamp() {
        assert!(!user(None, None).is_confirmed());
        assert!(user(None, Some(datetime!(2024-01-02 00:00 UTC))).is_confirmed());
    }

    #[test]
    fn display_name_prefers_nickname() {
        assert_eq!(user(Some("Alice"), None).display_name(), "Alice");
        assert_eq!(user(Some(""), None).display_name(), "alice");
        assert_eq!(user(None, None).display_name(), "alice");
    }

    #[test]
    fn password_hash_never_serializes() {
        let json = serde_json::to_string(&user(None, None)).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("confirm_code"));
    }
}
