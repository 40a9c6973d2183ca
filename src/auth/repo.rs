use sqlx::PgPool;

use crate::auth::repo_types::{PasswordReset, Role, User};

const USER_COLUMNS: &str = "id, email, password_hash, nickname, debug, confirm_code, confirm_at, \
                            register_ip, register_at, lastlogin_ip, lastlogin_at, created_at";

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Creates an unconfirmed user with a fresh confirmation code.
    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        confirm_code: &str,
        register_ip: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, confirm_code, register_ip)
             VALUES ($1, $2, $3, $4)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(password_hash)
        .bind(confirm_code)
        .bind(register_ip)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Hard delete. Used to roll back a registration whose confirmation
    /// email could not be delivered.
    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Atomically consumes a confirmation token: only matches while the
    /// account is still unconfirmed, then stamps the time and blanks the
    /// code so every issued link goes permanently inert.
    pub async fn confirm_by_token(db: &PgPool, token: &str) -> anyhow::Result<Option<User>> {
        if token.is_empty() {
            return Ok(None);
        }
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET confirm_at = now(), confirm_code = ''
             WHERE confirm_code = $1 AND confirm_at IS NULL
             RETURNING {USER_COLUMNS}"
        ))
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Replaces the confirmation code, invalidating every earlier link.
    pub async fn rotate_confirm_code(db: &PgPool, id: i64, code: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET confirm_code = $2 WHERE id = $1 AND confirm_at IS NULL")
            .bind(id)
            .bind(code)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn record_login(db: &PgPool, id: i64, ip: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET lastlogin_ip = $2, lastlogin_at = now() WHERE id = $1")
            .bind(id)
            .bind(ip)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_password(db: &PgPool, id: i64, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_profile(
        db: &PgPool,
        id: i64,
        nickname: Option<&str>,
        debug: bool,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET nickname = $2, debug = $3 WHERE id = $1")
            .bind(id)
            .bind(nickname)
            .bind(debug)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Fuzzy search over email and nickname, newest first.
    pub async fn search(
        db: &PgPool,
        q: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<User>> {
        let pattern = q.map(|q| format!("%{}%", q));
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE $1::text IS NULL OR email ILIKE $1 OR nickname ILIKE $1
             ORDER BY id DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn count(db: &PgPool, q: Option<&str>) -> anyhow::Result<i64> {
        let pattern = q.map(|q| format!("%{}%", q));
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users
             WHERE $1::text IS NULL OR email ILIKE $1 OR nickname ILIKE $1",
        )
        .bind(pattern)
        .fetch_one(db)
        .await?;
        Ok(count.0)
    }

    /// Names of the roles this user holds directly.
    pub async fn role_names(db: &PgPool, user_id: i64) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.name FROM roles r
             JOIN role_user ru ON ru.role_id = r.id
             WHERE ru.user_id = $1
             ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Replaces the user's role set wholesale. Unknown role names are
    /// silently skipped.
    pub async fn set_roles(db: &PgPool, user_id: i64, role_names: &[String]) -> anyhow::Result<()> {
        let mut tx = db.begin().await?;
        sqlx::query("DELETE FROM role_user WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO role_user (user_id, role_id)
             SELECT $1, id FROM roles WHERE name = ANY($2)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(role_names)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

impl PasswordReset {
    /// One live token per email: a second request overwrites the first.
    pub async fn upsert(db: &PgPool, email: &str, token: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO password_resets (email, token, created_at)
             VALUES ($1, $2, now())
             ON CONFLICT (email) DO UPDATE SET token = $2, created_at = now()",
        )
        .bind(email)
        .bind(token)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn find_by_token(db: &PgPool, token: &str) -> anyhow::Result<Option<PasswordReset>> {
        if token.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, PasswordReset>(
            "SELECT email, token, created_at FROM password_resets WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Consumes every token for the email (reset success or login success).
    pub async fn delete_for_email(db: &PgPool, email: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM password_resets WHERE email = $1")
            .bind(email)
            .execute(db)
            .await?;
        Ok(())
    }
}

impl Role {
    pub async fn all(db: &PgPool) -> anyhow::Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name, display_name FROM roles ORDER BY name",
        )
        .fetch_all(db)
        .await?;
        Ok(roles)
    }
}

/// Tests against a live Postgres. They run only when `TEST_DATABASE_URL`
/// (or `DATABASE_URL`) points at a reachable server; otherwise each test
/// prints a notice and passes without asserting anything.
#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::auth::services::random_token;

    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        sqlx::migrate!("./migrations").run(&pool).await.ok()?;
        Some(pool)
    }

    fn unique_email(tag: &str) -> String {
        format!("{}-{}@example.com", tag, &random_token()[..12])
    }

    async fn seed_user(db: &PgPool, tag: &str) -> (User, String) {
        let code = random_token();
        let user = User::create(db, &unique_email(tag), "hash", &code, "127.0.0.1")
            .await
            .unwrap();
        (user, code)
    }

    macro_rules! pool_or_skip {
        () => {
            match test_pool().await {
                Some(pool) => pool,
                None => {
                    eprintln!("skipping: no database configured");
                    return;
                }
            }
        };
    }

    #[tokio::test]
    async fn confirmation_token_is_single_use() {
        let db = pool_or_skip!();
        let (user, code) = seed_user(&db, "confirm").await;
        assert!(!user.is_confirmed());
        assert!(!code.is_empty());

        let confirmed = User::confirm_by_token(&db, &code).await.unwrap().unwrap();
        assert_eq!(confirmed.id, user.id);
        assert!(confirmed.is_confirmed());
        assert!(confirmed.confirm_code.is_empty());

        // The same link again, and the blank code, both go nowhere.
        assert!(User::confirm_by_token(&db, &code).await.unwrap().is_none());
        assert!(User::confirm_by_token(&db, "").await.unwrap().is_none());

        User::delete(&db, user.id).await.unwrap();
    }

    #[tokio::test]
    async fn rotating_the_code_invalidates_earlier_links() {
        let db = pool_or_skip!();
        let (user, first) = seed_user(&db, "resend").await;

        let second = random_token();
        User::rotate_confirm_code(&db, user.id, &second).await.unwrap();

        assert!(User::confirm_by_token(&db, &first).await.unwrap().is_none());
        let confirmed = User::confirm_by_token(&db, &second).await.unwrap().unwrap();
        assert_eq!(confirmed.id, user.id);

        // Confirmed accounts ignore further rotations.
        let third = random_token();
        User::rotate_confirm_code(&db, user.id, &third).await.unwrap();
        assert!(User::confirm_by_token(&db, &third).await.unwrap().is_none());

        User::delete(&db, user.id).await.unwrap();
    }

    #[tokio::test]
    async fn reset_upsert_keeps_one_live_token_per_email() {
        let db = pool_or_skip!();
        let email = unique_email("reset");
        let (first, second) = (random_token(), random_token());

        PasswordReset::upsert(&db, &email, &first).await.unwrap();
        PasswordReset::upsert(&db, &email, &second).await.unwrap();

        assert!(PasswordReset::find_by_token(&db, &first).await.unwrap().is_none());
        let live = PasswordReset::find_by_token(&db, &second)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.email, email);

        PasswordReset::delete_for_email(&db, &email).await.unwrap();
        assert!(PasswordReset::find_by_token(&db, &second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn login_bookkeeping_stamps_and_consumes() {
        let db = pool_or_skip!();
        let (user, _) = seed_user(&db, "login").await;
        let token = random_token();
        PasswordReset::upsert(&db, &user.email, &token).await.unwrap();

        // What a successful login performs.
        User::record_login(&db, user.id, "203.0.113.9").await.unwrap();
        PasswordReset::delete_for_email(&db, &user.email).await.unwrap();

        let fresh = User::find_by_id(&db, user.id).await.unwrap().unwrap();
        assert_eq!(fresh.lastlogin_ip.as_deref(), Some("203.0.113.9"));
        assert!(fresh.lastlogin_at.is_some());
        assert!(PasswordReset::find_by_token(&db, &token).await.unwrap().is_none());

        User::delete(&db, user.id).await.unwrap();
    }

    #[tokio::test]
    async fn seeded_roles_are_listable() {
        let db = pool_or_skip!();
        let names: Vec<_> = Role::all(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert!(names.contains(&"admin".to_string()));
        assert!(names.contains(&"staff".to_string()));
    }

    #[tokio::test]
    async fn set_roles_replaces_the_whole_set() {
        let db = pool_or_skip!();
        let (user, _) = seed_user(&db, "roles").await;

        User::set_roles(&db, user.id, &["admin".into(), "staff".into()])
            .await
            .unwrap();
        assert_eq!(User::role_names(&db, user.id).await.unwrap(), ["admin", "staff"]);

        // Unknown names are skipped, known ones replace the old set.
        User::set_roles(&db, user.id, &["staff".into(), "butler".into()])
            .await
            .unwrap();
        assert_eq!(User::role_names(&db, user.id).await.unwrap(), ["staff"]);

        User::delete(&db, user.id).await.unwrap();
    }
}
