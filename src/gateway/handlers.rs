//! HTTP handlers
//!
//! Each handler checks the caller's capability, then calls exactly one core
//! operation. No business rule lives here.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use validator::Validate;

use super::auth::Caller;
use super::state::AppState;
use super::types::{
    ApiError, ApiResponse, ApiResult, ApproveLoanRequest, CreateLoanRequest, DisburseLoanRequest,
    HealthResponse, LoanListQuery, SubmitInvestmentRequest, ok,
};
use crate::core_types::LoanId;
use crate::investment::InvestmentReceipt;
use crate::loan::{Investment, Loan, LoanState};
use crate::roles::Capability;

fn parse_loan_id(raw: &str) -> Result<LoanId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::invalid(format!("malformed loan id: {}", raw)))
}

/// GET /health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let body = HealthResponse {
        status: "ok".to_string(),
        storage: state.store.name().to_string(),
        pending_intents: state.transport.pending_intents(),
        version: format!("{}+{}", env!("CARGO_PKG_VERSION"), env!("BUILD_REVISION")),
    };
    (StatusCode::OK, Json(ApiResponse::success(body)))
}

/// POST /api/v1/loans
pub async fn create_loan(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateLoanRequest>,
) -> ApiResult<Loan> {
    caller.require(Capability::ProposeLoan)?;
    let loan = state
        .loans
        .create_loan(caller.user_id, req.principal_amount, req.rate)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(loan))))
}

/// POST /api/v1/loans/{id}/approve
pub async fn approve_loan(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(req): Json<ApproveLoanRequest>,
) -> ApiResult<Loan> {
    caller.require(Capability::ApproveLoan)?;
    req.validate().map_err(|e| ApiError::invalid(e.to_string()))?;
    let loan_id = parse_loan_id(&id)?;

    let loan = state
        .loans
        .approve_loan(
            loan_id,
            caller.user_id,
            &req.proof_ref,
            req.approved_at.unwrap_or_else(Utc::now),
        )
        .await?;
    ok(loan)
}

/// POST /api/v1/loans/{id}/disburse
pub async fn disburse_loan(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(req): Json<DisburseLoanRequest>,
) -> ApiResult<Loan> {
    caller.require(Capability::DisburseLoan)?;
    req.validate().map_err(|e| ApiError::invalid(e.to_string()))?;
    let loan_id = parse_loan_id(&id)?;

    let loan = state
        .loans
        .disburse_loan(
            loan_id,
            caller.user_id,
            &req.agreement_ref,
            req.disbursed_at.unwrap_or_else(Utc::now),
        )
        .await?;
    ok(loan)
}

/// POST /api/v1/investments
///
/// 202: queued for settlement, not yet settled.
pub async fn submit_investment(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<SubmitInvestmentRequest>,
) -> ApiResult<InvestmentReceipt> {
    caller.require(Capability::Invest)?;
    let receipt = state
        .investments
        .submit_investment(caller.user_id, req.loan_id, req.amount)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(receipt))))
}

/// GET /api/v1/loans/{id}
pub async fn get_loan(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<Loan> {
    caller.require(Capability::ViewLoans)?;
    ok(state.loans.get_loan(parse_loan_id(&id)?).await?)
}

/// GET /api/v1/loans?state=approved
pub async fn list_loans(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<LoanListQuery>,
) -> ApiResult<Vec<Loan>> {
    caller.require(Capability::ViewLoans)?;
    let loan_state = match query.state.as_deref() {
        Some(s) => s.parse::<LoanState>().map_err(ApiError::invalid)?,
        None => LoanState::Approved,
    };
    ok(state.loans.loans_by_state(loan_state).await?)
}

/// GET /api/v1/loans/{id}/investments
pub async fn loan_investments(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Investment>> {
    caller.require(Capability::ViewLoans)?;
    ok(state
        .investments
        .investments_by_loan(parse_loan_id(&id)?)
        .await?)
}

/// GET /api/v1/loans/mine
pub async fn my_loans(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Vec<Loan>> {
    caller.require(Capability::ProposeLoan)?;
    ok(state.loans.loans_for_borrower(caller.user_id).await?)
}

/// GET /api/v1/investments/mine
pub async fn my_investments(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Vec<Investment>> {
    caller.require(Capability::Invest)?;
    ok(state
        .investments
        .investments_for_investor(caller.user_id)
        .await?)
}
