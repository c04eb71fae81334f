//! API envelope, error mapping and request DTOs
//!
//! - `ApiResponse<T>`: unified `{code, msg, data}` wrapper
//! - `error_codes`: numeric codes carried in `code`
//! - `ApiError`: converts `LoanError` into an HTTP response

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core_types::LoanId;
use crate::error::LoanError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, absent on error
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const FORBIDDEN: i32 = 2003;

    // Business rule errors (3xxx)
    pub const BUSINESS_RULE: i32 = 3001;
    pub const DUPLICATE: i32 = 3009;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

// ============================================================================
// Error mapping
// ============================================================================

/// Handler error; the message carries the stable `LoanError` code
#[derive(Debug)]
pub struct ApiError(pub LoanError);

impl From<LoanError> for ApiError {
    fn from(e: LoanError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ApiError(LoanError::InvalidInput(msg.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match status.as_u16() {
            400 => error_codes::INVALID_PARAMETER,
            403 => error_codes::FORBIDDEN,
            404 => error_codes::NOT_FOUND,
            409 => error_codes::DUPLICATE,
            422 => error_codes::BUSINESS_RULE,
            503 => error_codes::SERVICE_UNAVAILABLE,
            _ => error_codes::INTERNAL_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }

        let body = ApiResponse::<()>::error(code, format!("{}: {}", err.code(), err));
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateLoanRequest {
    pub principal_amount: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApproveLoanRequest {
    #[validate(length(min = 1, max = 512))]
    pub proof_ref: String,
    /// Defaults to the time the request is handled
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DisburseLoanRequest {
    #[validate(length(min = 1, max = 512))]
    pub agreement_ref: String,
    #[serde(default)]
    pub disbursed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitInvestmentRequest {
    pub loan_id: LoanId,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct LoanListQuery {
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub pending_intents: usize,
    pub version: String,
}
