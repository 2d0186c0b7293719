use crate::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use super::claims::{UserClaims, UserContext};

/// Validate an optional bearer token and attach the caller to the request.
///
/// Absent tokens pass through unless `security.jwt_required` is set, so
/// anonymous sessions keep working.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(token) = auth_header.and_then(|value| value.strip_prefix("Bearer ")) else {
        if state.config.security.jwt_required {
            return ApiError::Unauthorized("missing bearer token".to_string()).into_response();
        }
        return next.run(request).await;
    };

    let secret = &state.config.security.jwt_secret;
    if secret.is_empty() {
        // Without a key every signature would check out, so the token proves nothing.
        if state.config.security.jwt_required {
            return ApiError::Unauthorized("token validation is not configured".to_string())
                .into_response();
        }
        tracing::warn!(name: "auth.token.ignored", "Bearer token ignored; no signing secret configured");
        return next.run(request).await;
    }

    match verify_token(token, secret) {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(name: "auth.token.rejected", error = %e, "Bearer token rejected");
            ApiError::Unauthorized("invalid bearer token".to_string()).into_response()
        }
    }
}

/// Decode and validate an HS256 token. An empty secret never validates.
pub fn verify_token(token: &str, secret: &str) -> Result<UserContext, jsonwebtoken::errors::Error> {
    if secret.is_empty() {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidSignature.into());
    }
    let key = DecodingKey::from_secret(secret.as_bytes());
    let token_data = decode::<UserClaims>(token, &key, &Validation::default())?;
    let claims = token_data.claims;
    Ok(UserContext {
        user_id: claims.sub.clone(),
        claims,
    })
}
