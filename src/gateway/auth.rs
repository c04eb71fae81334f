//! Bearer-token authentication
//!
//! Tokens are HS256 JWTs issued elsewhere. The middleware verifies the
//! token and inserts a [`Caller`] into the request extensions; handlers then
//! check the capability they need with [`Caller::require`].

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::state::AppState;
use super::types::{ApiResponse, error_codes};
use crate::core_types::UserId;
use crate::error::LoanError;
use crate::roles::{Capability, Role};

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User identity
    pub sub: UserId,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// Authenticated caller, available to handlers as an extension
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn require(&self, capability: Capability) -> Result<(), LoanError> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            Err(LoanError::Forbidden)
        }
    }
}

pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims)
    }
}

/// Sign a token; used by tooling and tests, production tokens come from the issuer
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    role: Role,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        role,
        exp: (now + ttl_secs).max(0) as usize,
        iat: now.max(0) as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn unauthorized(code: i32, msg: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(code, msg)),
    )
}

pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized(error_codes::MISSING_AUTH, "Missing Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(error_codes::AUTH_FAILED, "Invalid token format"))?;

    match state.tokens.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(Caller {
                user_id: claims.sub,
                role: claims.role,
            });
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Token rejected");
            Err(unauthorized(error_codes::AUTH_FAILED, "Invalid or expired token"))
        }
    }
}
