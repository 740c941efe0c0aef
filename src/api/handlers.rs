//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use utoipa::OpenApi;
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::domain::{
    AppError, BalanceResponse, CreatePartnerRequest, DatabaseError, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, PaginatedResponse, PaginationParams, Partner, Transaction,
    TransactionKind, TransactionRequest, ValidationError,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Partner Credit API",
        version = "0.1.0",
        description = "API for managing credits for partners in a B2B platform",
        contact(
            name = "API Support",
            email = "support@example.com"
        ),
        license(
            name = "MIT"
        )
    ),
    paths(
        create_partner_handler,
        get_partner_handler,
        get_balance_handler,
        add_credits_handler,
        consume_credits_handler,
        list_transactions_handler,
        get_transaction_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            Partner,
            CreatePartnerRequest,
            TransactionRequest,
            Transaction,
            crate::domain::TransactionKind,
            crate::domain::TransactionStatus,
            BalanceResponse,
            PaginationParams,
            PaginatedResponse<Transaction>,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "partners", description = "Partner profile endpoints"),
        (name = "credits", description = "Balance and transaction endpoints"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

fn validated<T: Validate>(payload: T) -> Result<T, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    Ok(payload)
}

/// Create a partner profile
#[utoipa::path(
    post,
    path = "/api/v1/partners",
    tag = "partners",
    request_body = CreatePartnerRequest,
    responses(
        (status = 201, description = "Partner created", body = Partner),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_partner_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePartnerRequest>,
) -> Result<(StatusCode, Json<Partner>), AppError> {
    let payload = validated(payload)?;
    let partner = state
        .service
        .create_partner(payload.name, payload.email)
        .await?;
    Ok((StatusCode::CREATED, Json(partner)))
}

/// Get a partner profile by ID
#[utoipa::path(
    get,
    path = "/api/v1/partners/{partner_id}",
    tag = "partners",
    params(
        ("partner_id" = Uuid, Path, description = "Partner ID")
    ),
    responses(
        (status = 200, description = "Partner found", body = Partner),
        (status = 404, description = "Partner not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_partner_handler(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<Uuid>,
) -> Result<Json<Partner>, AppError> {
    let partner = state.service.get_partner(partner_id).await?;
    Ok(Json(partner))
}

/// Get a partner's credit balance
#[utoipa::path(
    get,
    path = "/api/v1/partners/{partner_id}/balance",
    tag = "credits",
    params(
        ("partner_id" = Uuid, Path, description = "Partner ID")
    ),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 404, description = "Partner not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_balance_handler(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.service.get_balance(partner_id).await?;
    Ok(Json(BalanceResponse::from(balance)))
}

/// Add credits to a partner
///
/// Admits a CREDIT transaction idempotently on the supplied key and applies
/// it to the balance. Repeating a request with the same idempotency key
/// returns the originally admitted transaction without a second balance
/// effect.
#[utoipa::path(
    post,
    path = "/api/v1/partners/{partner_id}/credits",
    tag = "credits",
    params(
        ("partner_id" = Uuid, Path, description = "Partner ID")
    ),
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction processed", body = Transaction),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Partner not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Storage conflict or unavailable", body = ErrorResponse)
    )
)]
pub async fn add_credits_handler(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<Uuid>,
    Json(payload): Json<TransactionRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let payload = validated(payload)?;
    let transaction = state
        .service
        .create_and_process_transaction(
            partner_id,
            TransactionKind::Credit,
            payload.amount,
            payload.description,
            payload.idempotency_key,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Consume credits from a partner
///
/// Admits a DEBIT transaction idempotently on the supplied key. A debit
/// against an insufficient balance produces a FAILED transaction in a normal
/// 201 response; it is not an error.
#[utoipa::path(
    post,
    path = "/api/v1/partners/{partner_id}/debits",
    tag = "credits",
    params(
        ("partner_id" = Uuid, Path, description = "Partner ID")
    ),
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction processed (status may be 'failed' for insufficient balance)", body = Transaction),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Partner not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Storage conflict or unavailable", body = ErrorResponse)
    )
)]
pub async fn consume_credits_handler(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<Uuid>,
    Json(payload): Json<TransactionRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let payload = validated(payload)?;
    let transaction = state
        .service
        .create_and_process_transaction(
            partner_id,
            TransactionKind::Debit,
            payload.amount,
            payload.description,
            payload.idempotency_key,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Get a partner's transaction history
#[utoipa::path(
    get,
    path = "/api/v1/partners/{partner_id}/transactions",
    tag = "credits",
    params(
        ("partner_id" = Uuid, Path, description = "Partner ID"),
        ("limit" = Option<i64>, Query, description = "Maximum number of transactions to return (1-100, default: 20)"),
        ("cursor" = Option<Uuid>, Query, description = "Cursor for pagination (transaction ID to start after)")
    ),
    responses(
        (status = 200, description = "Transaction history", body = PaginatedResponse<Transaction>),
        (status = 400, description = "Invalid pagination parameters", body = ErrorResponse),
        (status = 404, description = "Partner not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_transactions_handler(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<Transaction>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let page = state
        .service
        .list_transactions(partner_id, limit, params.cursor)
        .await?;
    Ok(Json(page))
}

/// Get a single transaction by ID
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{id}",
    tag = "credits",
    params(
        ("id" = Uuid, Path, description = "Transaction ID")
    ),
    responses(
        (status = 200, description = "Transaction found", body = Transaction),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_transaction_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state.service.get_transaction(id).await?;
    Ok(Json(transaction))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::InsufficientBalance { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                self.to_string(),
            ),
            AppError::ConflictExhausted { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "conflict_exhausted",
                self.to_string(),
            ),
            AppError::Publish(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "publish_error",
                self.to_string(),
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
