//! API Routes
//!
//! HTTP endpoint definitions. Bodies are camelCase JSON and 128-bit ids
//! travel as decimal strings.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::accounts::{CustomerAccount, CustomerAccountService, CustomerBalance};
use crate::domain::serde_ids::u128_string;
use crate::domain::Currency;
use crate::error::AppError;
use crate::handlers::{BankingEventHandler, FlowSnapshot};
use crate::sepa::{
    ProvisioningReport, SepaAccountProvisioner, SepaTransferOrchestrator, SepaTransferRequest,
    SepaTransferResult, SuspenseBalances, ValidationReport,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SepaTransferOrchestrator,
    pub provisioner: Arc<SepaAccountProvisioner>,
    pub accounts: CustomerAccountService,
    pub banking: Arc<BankingEventHandler>,
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    #[serde(with = "u128_string")]
    pub customer_ref: u128,
    pub currency: String,
}

// =========================================================================
// Router
// =========================================================================

/// API routes, to be nested under `/api/v1`
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(open_account))
        .route("/accounts/:account_id/balance", get(get_account_balance))
        .route("/sepa/transfers/outgoing", post(outgoing_transfer))
        .route("/sepa/transfers/incoming", post(incoming_transfer))
        .route("/sepa/suspense/:currency", get(get_suspense_balances))
        .route("/sepa/accounts/initialize", post(initialize_accounts))
        .route("/sepa/accounts/validate", get(validate_accounts))
        .route("/sepa/flows", get(get_flows))
}

/// Full application router
pub fn build_router(state: AppState, permissive_cors: bool) -> Router {
    let api_router = create_router().layer(middleware::from_fn(
        super::middleware::logging_middleware,
    ));

    let router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_router)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let router = if permissive_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

// =========================================================================
// Customer accounts
// =========================================================================

async fn open_account(
    State(state): State<AppState>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<CustomerAccount>), AppError> {
    let currency: Currency = request
        .currency
        .parse()
        .map_err(|e: crate::domain::CurrencyError| AppError::InvalidRequest(e.to_string()))?;

    let account = state.accounts.open(request.customer_ref, currency).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account_balance(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<CustomerBalance>, AppError> {
    let account_id: u128 = account_id
        .parse()
        .map_err(|_| AppError::InvalidRequest(format!("invalid account id: {}", account_id)))?;

    Ok(Json(state.accounts.balance(account_id).await?))
}

// =========================================================================
// SEPA
// =========================================================================

async fn outgoing_transfer(
    State(state): State<AppState>,
    Json(request): Json<SepaTransferRequest>,
) -> Result<(StatusCode, Json<SepaTransferResult>), AppError> {
    let result = state.orchestrator.process_outgoing(&request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn incoming_transfer(
    State(state): State<AppState>,
    Json(request): Json<SepaTransferRequest>,
) -> Result<(StatusCode, Json<SepaTransferResult>), AppError> {
    let result = state.orchestrator.process_incoming(&request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn get_suspense_balances(
    State(state): State<AppState>,
    Path(currency): Path<String>,
) -> Result<Json<SuspenseBalances>, AppError> {
    Ok(Json(state.orchestrator.get_suspense_balances(&currency).await?))
}

/// 200 when every account is in place, 207 on partial success
async fn initialize_accounts(
    State(state): State<AppState>,
) -> (StatusCode, Json<ProvisioningReport>) {
    let report = state.provisioner.provision_all().await;
    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, Json(report))
}

async fn validate_accounts(
    State(state): State<AppState>,
) -> (StatusCode, Json<ValidationReport>) {
    let report = state.provisioner.validate_all().await;
    let status = if report.valid {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn get_flows(State(state): State<AppState>) -> Json<FlowSnapshot> {
    Json(state.banking.snapshot())
}
