use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{ApiError, AppState, RegisterRequest, RegisterResponse};
use crate::services::UserAccount;

/// POST /users/
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let registration = state
        .accounts
        .register(&payload.username, payload.password.as_deref())
        .await?;

    let response = match registration.token {
        Some(token) => (StatusCode::CREATED, Json(RegisterResponse { token })).into_response(),
        None => StatusCode::CREATED.into_response(),
    };

    Ok(response)
}

/// GET /users/me/
pub async fn read_current_user(Extension(account): Extension<UserAccount>) -> Json<UserAccount> {
    Json(account)
}
