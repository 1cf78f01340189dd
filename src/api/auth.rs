use axum::{
    Form, Json,
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;

use super::{ApiError, AppState, LoginForm};
use super::observability::AuthenticatedCaller;
use crate::services::{AccessToken, AccountError};

// ============================================================================
// Middleware
// ============================================================================

/// Resolves `Authorization: Bearer <token>` to an account and stores the
/// resulting `UserAccount` in the request extensions. The account id is
/// echoed into the response extensions for the request log.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let Some(token) = extract_bearer_token(&headers) else {
        tracing::debug!("Rejected request without bearer token");
        return Err(AccountError::InvalidToken.into());
    };

    let account = state.accounts.resolve_from_token(&token).await?;
    let caller = AuthenticatedCaller(account.id);
    request.extensions_mut().insert(account);

    let mut response = next.run(request).await;
    response.extensions_mut().insert(caller);
    Ok(response)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /token
/// Exchange username and password (or opaque token) for a bearer token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Json<AccessToken>, ApiError> {
    if form.username.is_empty() || form.password.is_empty() {
        return Err(ApiError::validation("Username and password are required"));
    }

    let token = state.accounts.login(&form.username, &form.password).await?;

    Ok(Json(token))
}
