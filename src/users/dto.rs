use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Full profile view (own profile, or another user's for admins/owners).
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: i64,
    pub email: String,
    pub nickname: Option<String>,
    pub confirmed: bool,
    pub debug: bool,
    /// Debug flag only takes effect for administrators.
    pub in_debug_mode: bool,
    pub roles: Vec<String>,
    pub register_at: OffsetDateTime,
    pub lastlogin_at: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub nickname: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

/// Admin edit of another account: profile fields plus the full role set.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub nickname: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    /// Fuzzy match against email and nickname.
    pub q: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub nickname: Option<String>,
    pub confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserSummary>,
    pub total: i64,
}
