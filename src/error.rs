use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Per-field validation failure surfaced to the caller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every failure the account subsystem can surface at the request boundary.
/// All variants map to a JSON body; none crash the process.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("too many attempts")]
    Throttled { retry_after_secs: u64 },

    #[error("challenge verification failed")]
    ChallengeFailed,

    /// Generic on purpose: never reveals whether the email exists.
    #[error("invalid email or password")]
    Credentials,

    #[error("email already registered")]
    DuplicateEmail,

    /// Token not found, already consumed, or superseded by a newer one.
    #[error("link is invalid or has expired")]
    TokenInvalid,

    #[error("could not deliver email")]
    Delivery,

    #[error("not found")]
    NotFound,

    #[error("authentication required")]
    Unauthenticated,

    #[error("insufficient privileges")]
    Permission,

    #[error("email confirmation required")]
    EmailUnconfirmed,

    #[error("registration is closed")]
    RegistrationClosed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a [FieldError]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ChallengeFailed => StatusCode::BAD_REQUEST,
            ApiError::Credentials => StatusCode::UNAUTHORIZED,
            ApiError::DuplicateEmail => StatusCode::CONFLICT,
            ApiError::TokenInvalid => StatusCode::NOT_FOUND,
            ApiError::Delivery => StatusCode::BAD_GATEWAY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Permission | ApiError::EmailUnconfirmed | ApiError::RegistrationClosed => {
                StatusCode::FORBIDDEN
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let ApiError::Internal(ref e) = self {
            error!(error = %e, "internal error");
            let body = Json(ErrorBody {
                error: "internal server error",
                fields: None,
                retry_after_secs: None,
            });
            return (status, body).into_response();
        }

        let message = self.to_string();
        match self {
            ApiError::Validation(ref fields) => {
                let body = Json(ErrorBody {
                    error: &message,
                    fields: Some(fields),
                    retry_after_secs: None,
                });
                (status, body).into_response()
            }
            ApiError::Throttled { retry_after_secs } => {
                let body = Json(ErrorBody {
                    error: &message,
                    fields: None,
                    retry_after_secs: Some(retry_after_secs),
                });
                (
                    status,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    body,
                )
                    .into_response()
            }
            _ => {
                let body = Json(ErrorBody {
                    error: &message,
                    fields: None,
                    retry_after_secs: None,
                });
                (status, body).into_response()
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}
