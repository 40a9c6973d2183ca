use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::access::Identity;
use crate::auth::dto::{JwtKeys, TokenKind};
use crate::auth::repo_types::User;
use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated caller. Verifies the bearer token, then loads the user row
/// and role names so handlers receive a complete, explicit [`Identity`]
/// instead of reaching for ambient session state.
pub struct CurrentUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthenticated)?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|_| ApiError::Unauthenticated)?;
        if claims.kind != TokenKind::Access {
            return Err(ApiError::Unauthenticated);
        }

        let user = User::find_by_id(&state.db, claims.sub)
            .await?
            .ok_or(ApiError::Unauthenticated)?;
        let roles = User::role_names(&state.db, user.id).await?;

        let confirmed = user.is_confirmed();
        Ok(CurrentUser(Identity {
            id: user.id,
            email: user.email,
            nickname: user.nickname,
            confirmed,
            debug: user.debug,
            roles,
        }))
    }
}

/// Requester address, preferring `X-Forwarded-For` over the socket peer.
/// Never rejects; an unknown origin degrades to a placeholder.
pub struct ClientIp(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());

        let ip = forwarded.unwrap_or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        });

        Ok(ClientIp(ip))
    }
}
