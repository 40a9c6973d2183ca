use crate::error::FieldError;

pub const MAX_NICKNAME_LEN: usize = 100;

pub fn validate_nickname(nickname: Option<&str>) -> Vec<FieldError> {
    match nickname {
        Some(n) if n.chars().count() > MAX_NICKNAME_LEN => vec![FieldError::new(
            "nickname",
            "nickname must be at most 100 characters",
        )],
        _ => Vec::new(),
    }
}

/// Final role set after an admin reassigns roles in bulk. Admins editing
/// their own account always keep `admin`, whatever the request said, so
/// they cannot lock themselves out mid-edit.
pub fn roles_after_reassignment(
    editor_id: i64,
    target_id: i64,
    requested: Vec<String>,
) -> Vec<String> {
    let mut roles = requested;
    roles.sort();
    roles.dedup();
    if editor_id == target_id && !roles.iter().any(|r| r == "admin") {
        roles.push("admin".to_string());
    }
    roles
}
