//! Role and permission decisions.
//!
//! The inheritance and permission tables are plain configuration handed to
//! [`AccessPolicy::new`] at startup; nothing here reads ambient state, and
//! the authenticated identity is passed in explicitly on every check.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::error::ApiError;

/// The authenticated caller, loaded once per request by the extractor and
/// passed explicitly into handlers and access checks.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub nickname: Option<String>,
    pub confirmed: bool,
    pub debug: bool,
    pub roles: Vec<String>,
}

impl Identity {
    /// Display name: nickname, or the email local part when unset.
    pub fn display_name(&self) -> &str {
        match self.nickname.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }

    /// The debug flag only takes effect for administrators.
    pub fn in_debug_mode(&self, policy: &AccessPolicy) -> bool {
        self.debug && policy.has_role(self, "admin")
    }
}

/// Static-ish reference data: which roles imply which, and what each role
/// is allowed to do.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessRules {
    /// role -> roles it implicitly grants.
    pub inheritance: HashMap<String, Vec<String>>,
    /// role -> permission names it carries.
    pub permissions: HashMap<String, Vec<String>>,
}

impl Default for AccessRules {
    fn default() -> Self {
        let mut inheritance = HashMap::new();
        inheritance.insert("admin".to_string(), vec!["staff".to_string()]);
        inheritance.insert("staff".to_string(), vec![]);

        let mut permissions = HashMap::new();
        permissions.insert(
            "admin".to_string(),
            vec!["users.manage".to_string(), "users.view".to_string()],
        );
        permissions.insert("staff".to_string(), vec!["users.view".to_string()]);

        Self {
            inheritance,
            permissions,
        }
    }
}

/// Why an access check refused the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    Unauthenticated,
    MissingRole,
    EmailUnconfirmed,
}

impl From<AccessDenied> for ApiError {
    fn from(denied: AccessDenied) -> Self {
        match denied {
            AccessDenied::Unauthenticated => ApiError::Unauthenticated,
            AccessDenied::MissingRole => ApiError::Permission,
            AccessDenied::EmailUnconfirmed => ApiError::EmailUnconfirmed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    rules: AccessRules,
}

impl AccessPolicy {
    pub fn new(rules: AccessRules) -> Self {
        Self { rules }
    }

    /// Direct membership first, then the inheritance table: a held role
    /// grants `role` when `role` appears in its inheritance set.
    pub fn has_role(&self, identity: &Identity, role: &str) -> bool {
        if identity.roles.iter().any(|r| r == role) {
            return true;
        }
        identity.roles.iter().any(|held| {
            self.rules
                .inheritance
                .get(held)
                .map(|implied| implied.iter().any(|r| r == role))
                .unwrap_or(false)
        })
    }

    /// Every role the identity effectively holds, inherited ones included.
    fn effective_roles<'a>(&'a self, identity: &'a Identity) -> HashSet<&'a str> {
        let mut out: HashSet<&str> = identity.roles.iter().map(String::as_str).collect();
        for held in &identity.roles {
            if let Some(implied) = self.rules.inheritance.get(held) {
                out.extend(implied.iter().map(String::as_str));
            }
        }
        out
    }

    /// Permission-based check over the effective role set.
    pub fn permitted(&self, identity: &Identity, permission: &str) -> bool {
        self.effective_roles(identity).iter().any(|role| {
            self.rules
                .permissions
                .get(*role)
                .map(|perms| perms.iter().any(|p| p == permission))
                .unwrap_or(false)
        })
    }

    /// Full gate for protected areas: a caller must be authenticated, hold
    /// the role (directly or by inheritance), and have a confirmed email.
    /// The confirmation gate is independent of which role is required.
    pub fn authorize(&self, identity: Option<&Identity>, role: &str) -> Result<(), AccessDenied> {
        let identity = identity.ok_or(AccessDenied::Unauthenticated)?;
        if !self.has_role(identity, role) {
            return Err(AccessDenied::MissingRole);
        }
        if !identity.confirmed {
            return Err(AccessDenied::EmailUnconfirmed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(roles: &[&str], confirmed: bool) -> Identity {
        Identity {
            id: 1,
            email: "a@b.com".into(),
            nickname: None,
            confirmed,
            debug: false,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn policy() -> AccessPolicy {
        AccessPolicy::new(AccessRules::default())
    }

    #[test]
    fn direct_membership_grants_role() {
        assert!(policy().has_role(&identity(&["staff"], true), "staff"));
    }

    #[test]
    fn admin_inherits_staff_but_not_the_reverse() {
        let policy = policy();
        assert!(policy.has_role(&identity(&["admin"], true), "staff"));
        assert!(!policy.has_role(&identity(&["staff"], true), "admin"));
    }

    #[test]
    fn unknown_role_is_denied() {
        assert!(!policy().has_role(&identity(&["admin"], true), "auditor"));
    }

    #[test]
    fn no_roles_means_no_access() {
        assert!(!policy().has_role(&identity(&[], true), "staff"));
    }

    #[test]
    fn unauthenticated_caller_is_always_denied() {
        assert_eq!(
            policy().authorize(None, "staff"),
            Err(AccessDenied::Unauthenticated)
        );
    }

    #[test]
    fn unconfirmed_email_blocks_even_with_the_role() {
        assert_eq!(
            policy().authorize(Some(&identity(&["admin"], false)), "admin"),
            Err(AccessDenied::EmailUnconfirmed)
        );
    }

    #[test]
    fn confirmed_admin_passes_staff_gate() {
        assert!(policy()
            .authorize(Some(&identity(&["admin"], true)), "staff")
            .is_ok());
    }

    #[test]
    fn permissions_flow_through_inheritance() {
        let policy = policy();
        assert!(policy.permitted(&identity(&["admin"], true), "users.manage"));
        assert!(policy.permitted(&identity(&["admin"], true), "users.view"));
        assert!(policy.permitted(&identity(&["staff"], true), "users.view"));
        assert!(!policy.permitted(&identity(&["staff"], true), "users.manage"));
    }

    #[test]
    fn custom_rules_are_honored() {
        let mut inheritance = HashMap::new();
        inheritance.insert("owner".to_string(), vec!["admin".to_string()]);
        let rules = AccessRules {
            inheritance,
            permissions: HashMap::new(),
        };
        let policy = AccessPolicy::new(rules);
        assert!(policy.has_role(&identity(&["owner"], true), "admin"));
    }

    #[test]
    fn debug_mode_requires_admin() {
        let policy = policy();
        let mut admin = identity(&["admin"], true);
        admin.debug = true;
        let mut plain = identity(&[], true);
        plain.debug = true;
        assert!(admin.in_debug_mode(&policy));
        assert!(!plain.in_debug_mode(&policy));
    }

    #[test]
    fn display_name_falls_back_to_email_local_part() {
        let mut id = identity(&[], true);
        assert_eq!(id.display_name(), "a");
        id.nickname = Some("Alice".into());
        assert_eq!(id.display_name(), "Alice");
    }
}
