use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    access::Identity,
    auth::{
        extractors::CurrentUser,
        repo_types::{Role, User},
        services::mask_email,
    },
    error::ApiError,
    state::AppState,
    users::{
        dto::{
            AdminUpdateUserRequest, ProfileResponse, UpdateProfileRequest, UserListQuery,
            UserListResponse, UserSummary,
        },
        services::{roles_after_reassignment, validate_nickname},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/me", get(my_profile).put(update_my_profile))
        .route("/users/:id", get(user_profile).put(admin_update_user))
        .route("/roles", get(list_roles))
}

/// Assignable roles, for the admin edit surface.
#[instrument(skip(state, identity))]
async fn list_roles(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<Vec<Role>>, ApiError> {
    state.access.authorize(Some(&identity), "admin")?;
    Ok(Json(Role::all(&state.db).await?))
}

async fn profile_of(state: &AppState, user: User) -> Result<ProfileResponse, ApiError> {
    let roles = User::role_names(&state.db, user.id).await?;
    let confirmed = user.is_confirmed();
    let identity = Identity {
        id: user.id,
        email: user.email.clone(),
        nickname: user.nickname.clone(),
        confirmed,
        debug: user.debug,
        roles: roles.clone(),
    };
    Ok(ProfileResponse {
        id: user.id,
        email: user.email,
        nickname: user.nickname,
        confirmed,
        debug: user.debug,
        in_debug_mode: identity.in_debug_mode(&state.access),
        roles,
        register_at: user.register_at,
        lastlogin_at: user.lastlogin_at,
    })
}

#[instrument(skip(state, identity))]
async fn my_profile(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = User::find_by_id(&state.db, identity.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(profile_of(&state, user).await?))
}

#[instrument(skip(state, identity, payload))]
async fn update_my_profile(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let field_errors = validate_nickname(payload.nickname.as_deref());
    if !field_errors.is_empty() {
        return Err(ApiError::Validation(field_errors));
    }

    User::update_profile(
        &state.db,
        identity.id,
        payload.nickname.as_deref(),
        payload.debug,
    )
    .await?;

    let user = User::find_by_id(&state.db, identity.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    info!(email = %mask_email(&user.email), "profile updated");
    Ok(Json(profile_of(&state, user).await?))
}

/// Another user's profile: only an administrator or the owner may look.
#[instrument(skip(state, identity))]
async fn user_profile(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<ProfileResponse>, ApiError> {
    if identity.id != id && !state.access.has_role(&identity, "admin") {
        warn!(email = %mask_email(&identity.email), target = id, "profile view denied");
        return Err(ApiError::Permission);
    }
    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(profile_of(&state, user).await?))
}

/// Admin-only paginated listing with fuzzy search over email and nickname.
#[instrument(skip(state, identity))]
async fn list_users(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    state.access.authorize(Some(&identity), "admin")?;

    let limit = query.limit.clamp(1, 200);
    let q = query.q.as_deref().filter(|q| !q.is_empty());
    let users = User::search(&state.db, q, limit, query.offset.max(0)).await?;
    let total = User::count(&state.db, q).await?;

    let users = users
        .into_iter()
        .map(|u| UserSummary {
            confirmed: u.is_confirmed(),
            id: u.id,
            email: u.email,
            nickname: u.nickname,
        })
        .collect();
    Ok(Json(UserListResponse { users, total }))
}

/// Admin edit of any account: profile fields and the full role set.
#[instrument(skip(state, identity, payload))]
async fn admin_update_user(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    state.access.authorize(Some(&identity), "admin")?;

    let target = User::find_by_id(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let field_errors = validate_nickname(payload.nickname.as_deref());
    if !field_errors.is_empty() {
        return Err(ApiError::Validation(field_errors));
    }

    let roles = roles_after_reassignment(identity.id, target.id, payload.roles);
    User::set_roles(&state.db, target.id, &roles).await?;
    User::update_profile(&state.db, target.id, payload.nickname.as_deref(), payload.debug).await?;

    let user = User::find_by_id(&state.db, target.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    info!(
        editor = %mask_email(&identity.email),
        target = %mask_email(&user.email),
        "account updated by administrator"
    );
    Ok(Json(profile_of(&state, user).await?))
}
