use axum::{
    extract::{FromRef, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, JwtKeys, LoginRequest,
            MessageResponse, PublicUser, RefreshRequest, RegisterRequest, ResetPasswordRequest,
            ResetTokenInfo,
        },
        extractors::{ClientIp, CurrentUser},
        password::{hash_password, verify_password},
        repo_types::{PasswordReset, User},
        services::{
            gate_login_attempt, is_valid_email, mask_email, random_token,
            require_registration_challenge, validate_new_password,
        },
    },
    error::{ApiError, FieldError},
    mailer::{confirmation_message, reset_message},
    state::AppState,
    throttle::ThrottleLedger,
};

const PREVIOUS_URL_COOKIE: &str = "previous-url";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login_page).post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/register", post(register))
        .route("/auth/confirm/:token", get(confirm))
        .route("/auth/resend", post(resend_confirmation))
        .route("/auth/forgot-password", post(forgot_password))
        .route(
            "/auth/reset-password/:token",
            get(reset_password_probe).post(reset_password),
        )
        .route("/auth/change-password", post(change_password))
}

/// Pages we never want to bounce the user back to after login.
fn should_remember_previous_url(url: &str) -> bool {
    !(url.contains("login") || url.contains("register") || url.contains("_debugbar"))
}

/// Visiting the login page records where the visitor came from, so a
/// successful login can send them back there.
async fn login_page(jar: CookieJar, headers: HeaderMap) -> (CookieJar, Json<MessageResponse>) {
    let referer = headers
        .get(header::REFERER)
        .and_then(|h| h.to_str().ok())
        .filter(|url| should_remember_previous_url(url));

    let jar = match referer {
        Some(url) => jar.add(Cookie::new(PREVIOUS_URL_COOKIE, url.to_string())),
        None => jar,
    };
    (jar, Json(MessageResponse::new("ready")))
}

#[instrument(skip(state, jar, payload))]
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    // Shape check first; malformed input never touches the throttle.
    let mut field_errors = Vec::new();
    if !is_valid_email(&payload.email) {
        field_errors.push(FieldError::new("email", "must be a valid email"));
    }
    if payload.password.is_empty() {
        field_errors.push(FieldError::new("password", "password is required"));
    }
    if !field_errors.is_empty() {
        return Err(ApiError::Validation(field_errors));
    }

    let key = ThrottleLedger::key(&ip, &payload.email);
    gate_login_attempt(
        &state.throttle,
        state.challenge.as_deref(),
        state.config.challenge_enforced(),
        &key,
        payload.challenge_response.as_deref(),
        &ip,
    )
    .await?;

    let found = User::find_by_email(&state.db, &payload.email).await?;
    let verified = match &found {
        Some(u) => verify_password(&payload.password, &u.password_hash)?,
        None => false,
    };
    let Some(user) = found.filter(|_| verified) else {
        // One generic failure path: no account-existence leak.
        warn!(email = %mask_email(&payload.email), %ip, "login failed");
        return Err(ApiError::Credentials);
    };

    PasswordReset::delete_for_email(&state.db, &user.email).await?;
    User::record_login(&state.db, user.id, &ip).await?;
    state.throttle.clear(&key).await;

    let redirect_to = jar
        .get(PREVIOUS_URL_COOKIE)
        .map(|c| c.value().to_string())
        .unwrap_or_else(|| "/".to_string());
    let jar = jar.remove(Cookie::from(PREVIOUS_URL_COOKIE));

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    info!(email = %mask_email(&user.email), %ip, "login succeeded");
    let confirmed = user.is_confirmed();
    Ok((
        jar,
        Json(AuthResponse {
            access_token,
            refresh_token,
            user: PublicUser {
                id: user.id,
                email: user.email,
                nickname: user.nickname,
                confirmed,
            },
            redirect_to: Some(redirect_to),
        }),
    ))
}

/// Exchanges a refresh token for a fresh access/refresh pair.
#[instrument(skip(state, payload))]
async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|_| ApiError::Unauthenticated)?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    let confirmed = user.is_confirmed();
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser {
            id: user.id,
            email: user.email,
            nickname: user.nickname,
            confirmed,
        },
        redirect_to: None,
    }))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    if !state.config.registration_open {
        return Err(ApiError::RegistrationClosed);
    }

    payload.email = payload.email.trim().to_lowercase();

    let mut field_errors = Vec::new();
    if !is_valid_email(&payload.email) {
        field_errors.push(FieldError::new("email", "must be a valid email"));
    }
    field_errors.extend(validate_new_password(
        &payload.password,
        &payload.password_again,
    ));
    if !field_errors.is_empty() {
        return Err(ApiError::Validation(field_errors));
    }

    // Unlike login, registration demands a challenge from the first attempt.
    require_registration_challenge(
        state.challenge.as_deref(),
        state.config.challenge_enforced(),
        payload.challenge_response.as_deref(),
        &ip,
    )
    .await?;

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %mask_email(&payload.email), %ip, "duplicate registration");
        return Err(ApiError::DuplicateEmail);
    }

    let hash = hash_password(&payload.password)?;
    let code = random_token();
    let user = User::create(&state.db, &payload.email, &hash, &code, &ip).await?;

    let message = confirmation_message(
        &state.config.mail,
        &user.email,
        user.display_name(),
        &code,
    );
    if let Err(e) = state.mailer.send(message).await {
        // No orphaned accounts behind an undeliverable address.
        warn!(email = %mask_email(&user.email), %ip, error = %e, "confirmation mail failed, rolling back registration");
        if let Err(e) = User::delete(&state.db, user.id).await {
            error!(error = %e, "failed to roll back user after delivery error");
        }
        return Err(ApiError::Delivery);
    }

    info!(email = %mask_email(&user.email), %ip, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "registered; check your inbox for the confirmation link",
        )),
    ))
}

#[instrument(skip(state, token))]
async fn confirm(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    match User::confirm_by_token(&state.db, &token).await? {
        Some(user) => {
            info!(email = %mask_email(&user.email), "account confirmed");
            Ok(Json(MessageResponse::new("account activated")))
        }
        // Unknown, already consumed, or superseded by a newer link.
        None => Err(ApiError::TokenInvalid),
    }
}

#[instrument(skip(state, identity))]
async fn resend_confirmation(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<MessageResponse>, ApiError> {
    if identity.confirmed {
        return Err(ApiError::Validation(vec![FieldError::new(
            "email",
            "account is already confirmed",
        )]));
    }

    // A fresh code makes every previously mailed link inert.
    let code = random_token();
    User::rotate_confirm_code(&state.db, identity.id, &code).await?;

    let message = confirmation_message(
        &state.config.mail,
        &identity.email,
        identity.display_name(),
        &code,
    );
    if let Err(e) = state.mailer.send(message).await {
        // The account already exists; report failure, nothing to roll back.
        warn!(email = %mask_email(&identity.email), %ip, error = %e, "resend failed");
        return Err(ApiError::Delivery);
    }

    info!(email = %mask_email(&identity.email), "confirmation resent");
    Ok(Json(MessageResponse::new(
        "confirmation resent; only the newest link is valid",
    )))
}

#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    if !is_valid_email(&payload.email) {
        return Err(ApiError::Validation(vec![FieldError::new(
            "email",
            "must be a valid email",
        )]));
    }

    // The reply below is identical whether or not the address is
    // registered, so the endpoint cannot be used for enumeration.
    if let Some(user) = User::find_by_email(&state.db, &payload.email).await? {
        let token = random_token();
        PasswordReset::upsert(&state.db, &user.email, &token).await?;

        let message = reset_message(&state.config.mail, &user.email, &token);
        if let Err(e) = state.mailer.send(message).await {
            warn!(email = %mask_email(&user.email), %ip, error = %e, "reset mail failed");
            return Err(ApiError::Delivery);
        }
        info!(email = %mask_email(&user.email), %ip, "reset link sent");
    } else {
        info!(email = %mask_email(&payload.email), %ip, "reset requested for unknown email");
    }

    Ok(Json(MessageResponse::new(
        "if the address is registered, a reset link has been sent",
    )))
}

#[instrument(skip(state, token))]
async fn reset_password_probe(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ResetTokenInfo>, ApiError> {
    let reset = PasswordReset::find_by_token(&state.db, &token)
        .await?
        .ok_or(ApiError::TokenInvalid)?;
    let user = User::find_by_email(&state.db, &reset.email)
        .await?
        .ok_or(ApiError::TokenInvalid)?;
    Ok(Json(ResetTokenInfo {
        email: mask_email(&user.email),
    }))
}

#[instrument(skip(state, token, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let reset = PasswordReset::find_by_token(&state.db, &token)
        .await?
        .ok_or(ApiError::TokenInvalid)?;
    let user = User::find_by_email(&state.db, &reset.email)
        .await?
        .ok_or(ApiError::TokenInvalid)?;

    let field_errors = validate_new_password(&payload.password, &payload.password_again);
    if !field_errors.is_empty() {
        return Err(ApiError::Validation(field_errors));
    }

    let hash = hash_password(&payload.password)?;
    User::update_password(&state.db, user.id, &hash).await?;
    // Consume the token; reuse must fail from here on.
    PasswordReset::delete_for_email(&state.db, &user.email).await?;

    info!(email = %mask_email(&user.email), "password reset");
    Ok(Json(MessageResponse::new(
        "password updated; log in with your new password",
    )))
}

#[instrument(skip(state, identity, payload))]
async fn change_password(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = User::find_by_id(&state.db, identity.id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !verify_password(&payload.old_password, &user.password_hash)? {
        return Err(ApiError::Validation(vec![FieldError::new(
            "old_password",
            "old password is incorrect",
        )]));
    }

    let field_errors = validate_new_password(&payload.password, &payload.password_again);
    if !field_errors.is_empty() {
        return Err(ApiError::Validation(field_errors));
    }

    let hash = hash_password(&payload.password)?;
    User::update_password(&state.db, user.id, &hash).await?;

    info!(email = %mask_email(&user.email), "password changed");
    Ok(Json(MessageResponse::new("password changed")))
}
